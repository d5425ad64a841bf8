//! STACK: embeds plot images, which are served from a local plot directory
//! rather than the file store.

use async_trait::async_trait;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use crate::error::Result;
use crate::html::dispatcher::{FragmentTransform, TransformContext};
use crate::html::fragment::DocumentFragment;
use crate::html::markup::{collect_attribute, data_url, PLACEHOLDER_DATA_URL, PLACEHOLDER_SIZE};
use crate::overlay::{ImageInfo, OverlayRenderer};

const PLOT_IMAGE: &str = "div.stack_plot > img";

static VIEW_BOX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"viewBox\s*=\s*["']\s*[-\d.]+[\s,]+[-\d.]+[\s,]+([\d.]+)[\s,]+([\d.]+)\s*["']"#)
        .expect("valid regex")
});

pub struct StackTransform;

#[derive(Debug, Clone, PartialEq)]
struct EmbeddedPlot {
    src: String,
    width: u32,
    height: u32,
}

impl EmbeddedPlot {
    fn placeholder() -> Self {
        Self {
            src: PLACEHOLDER_DATA_URL.clone(),
            width: PLACEHOLDER_SIZE.0,
            height: PLACEHOLDER_SIZE.1,
        }
    }
}

/// Plot file name: the last path segment of the image URL.
fn plot_file_name(src: &str) -> Option<&str> {
    let path = src.split(['?', '#']).next()?;
    let name = path.rsplit('/').next()?;
    let is_plain_name = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    is_plain_name.then_some(name)
}

fn svg_size(bytes: &[u8], renderer: &OverlayRenderer) -> Option<(u32, u32)> {
    let text = std::str::from_utf8(bytes).ok()?;
    if let Some(captures) = VIEW_BOX.captures(text) {
        let width = captures.get(1)?.as_str().parse::<f64>().ok()?;
        let height = captures.get(2)?.as_str().parse::<f64>().ok()?;
        return Some((width.round() as u32, height.round() as u32));
    }
    renderer.svg_size(bytes)
}

async fn embed_plot(src: &str, ctx: &TransformContext<'_>) -> EmbeddedPlot {
    let Some(name) = plot_file_name(src) else {
        warn!(src, "Unusable plot reference");
        return EmbeddedPlot::placeholder();
    };
    let path = ctx.stack_plot_dir.join(name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Plot file not readable");
            return EmbeddedPlot::placeholder();
        }
    };

    if name.to_ascii_lowercase().ends_with(".svg") {
        if let Some((width, height)) = svg_size(&bytes, ctx.overlay) {
            return EmbeddedPlot {
                src: data_url("image/svg+xml", &bytes),
                width,
                height,
            };
        }
    } else if let Some(info) = ImageInfo::probe(&bytes) {
        return EmbeddedPlot {
            src: data_url(info.mime_type, &bytes),
            width: info.width,
            height: info.height,
        };
    }
    warn!(path = %path.display(), "Plot file is not a usable image");
    EmbeddedPlot::placeholder()
}

fn apply_plots(html: &str, plots: &HashMap<String, EmbeddedPlot>) -> Result<String> {
    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(PLOT_IMAGE, |el| {
                let src = el.get_attribute("src").unwrap_or_default();
                let plot = plots.get(&src).cloned().unwrap_or_else(EmbeddedPlot::placeholder);
                el.set_attribute("src", &plot.src)?;
                el.set_attribute("width", &plot.width.to_string())?;
                el.set_attribute("height", &plot.height.to_string())?;
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?;
    Ok(rewritten)
}

#[async_trait]
impl FragmentTransform for StackTransform {
    fn type_tag(&self) -> &'static str {
        "stack"
    }

    async fn transform(
        &self,
        fragment: &DocumentFragment,
        ctx: &TransformContext<'_>,
    ) -> Result<String> {
        let mut plots = HashMap::new();
        for src in collect_attribute(&fragment.raw_markup, PLOT_IMAGE, "src")? {
            if !plots.contains_key(&src) {
                let plot = embed_plot(&src, ctx).await;
                plots.insert(src, plot);
            }
        }
        apply_plots(&fragment.raw_markup, &plots)
    }

    fn css(&self) -> &'static str {
        ".que.stack .questiontestslink { display: none; }"
    }
}
