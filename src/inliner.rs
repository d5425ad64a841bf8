//! Embeds every image of a document as a `data:` URL.
//!
//! The converter runs without a session, so no image may point anywhere.
//! References into the file store are read from the [`BlobStore`], anything
//! else is fetched. Unresolvable images are replaced with a placeholder.

use async_trait::async_trait;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::blob::{BlobAddress, BlobStore};
use crate::error::{ExportError, Result};
use crate::html::markup::{collect_attribute, data_url, is_data_url, PLACEHOLDER_DATA_URL};
use crate::overlay::OverlayRenderer;

/// Timeout for fetching one remote image.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Image-bearing elements and the attribute holding their reference.
const IMAGE_REFERENCES: [(&str, &str); 3] = [
    ("img", "src"),
    ("image", "href"),
    ("image", "xlink:href"),
];

/// Loads the bytes behind a URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>>;
}

/// Fetches `http(s)` URLs with reqwest and `file` URLs from disk.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|err| ExportError::Fetch(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        match url.scheme() {
            "http" | "https" => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .and_then(|response| response.error_for_status())
                    .map_err(|err| ExportError::Fetch(err.to_string()))?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|err| ExportError::Fetch(err.to_string()))?;
                Ok(bytes.to_vec())
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| ExportError::Fetch(format!("not a local path: {}", url)))?;
                Ok(tokio::fs::read(path).await?)
            }
            other => Err(ExportError::Fetch(format!("unsupported scheme `{}`", other))),
        }
    }
}

pub struct AssetInliner {
    blobs: Arc<dyn BlobStore>,
    fetcher: Arc<dyn AssetFetcher>,
    overlay: OverlayRenderer,
    /// Base for relative references.
    site_url: Option<Url>,
}

impl AssetInliner {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        fetcher: Arc<dyn AssetFetcher>,
        overlay: OverlayRenderer,
        site_url: Option<Url>,
    ) -> Self {
        Self {
            blobs,
            fetcher,
            overlay,
            site_url,
        }
    }

    /// Returns `html` with every image reference embedded.
    pub async fn inline(&self, html: &str) -> Result<String> {
        let mut references = Vec::new();
        for (selector, attribute) in IMAGE_REFERENCES {
            references.extend(collect_attribute(html, selector, attribute)?);
        }

        let mut embedded: HashMap<String, String> = HashMap::new();
        for reference in references {
            if is_data_url(&reference) || embedded.contains_key(&reference) {
                continue;
            }
            let data = self.embed_reference(&reference).await;
            embedded.insert(reference, data);
        }
        debug!(images = embedded.len(), "Inlined document images");

        let embedded = &embedded;
        let handlers = IMAGE_REFERENCES
            .iter()
            .map(|(selector, attribute)| {
                element!(selector, move |el| {
                    let Some(reference) = el.get_attribute(attribute) else {
                        return Ok(());
                    };
                    if !is_data_url(&reference) {
                        let data = embedded
                            .get(&reference)
                            .map(String::as_str)
                            .unwrap_or(PLACEHOLDER_DATA_URL.as_str());
                        el.set_attribute(attribute, data)?;
                    }
                    if *selector == "img" {
                        el.remove_attribute("srcset");
                    }
                    Ok(())
                })
            })
            .collect();

        let rewritten = rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: handlers,
                ..RewriteStrSettings::default()
            },
        )?;
        Ok(rewritten)
    }

    /// Data URL for one reference; failures degrade to the placeholder.
    async fn embed_reference(&self, reference: &str) -> String {
        match self.resolve(reference).await {
            Ok(data) => data,
            Err(err) => {
                warn!(reference, error = %err, "Replacing unresolvable image with placeholder");
                PLACEHOLDER_DATA_URL.clone()
            }
        }
    }

    async fn resolve(&self, reference: &str) -> Result<String> {
        let reference = reference.trim().replace("&amp;", "&");
        if reference.is_empty() {
            return Err(ExportError::Fetch("empty image reference".to_string()));
        }

        if let Some(address) = BlobAddress::from_pluginfile_url(&reference) {
            let blob = self
                .blobs
                .get(&address)
                .await?
                .ok_or_else(|| ExportError::Fetch(format!("{} is not in the file store", reference)))?;
            return self.embed(&address.filename, &blob.bytes);
        }

        let url = self.absolute_url(&reference)?;
        let bytes = self.fetcher.fetch(&url).await?;
        self.embed(url.path(), &bytes)
    }

    fn absolute_url(&self, reference: &str) -> Result<Url> {
        match Url::parse(reference) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.site_url.as_ref().ok_or_else(|| {
                    ExportError::Fetch(format!("relative reference {} without a site URL", reference))
                })?;
                base.join(reference)
                    .map_err(|err| ExportError::Fetch(err.to_string()))
            }
            Err(err) => Err(ExportError::Fetch(err.to_string())),
        }
    }

    /// SVG is embedded as is; rasters must decode and are re-encoded as PNG.
    fn embed(&self, name: &str, bytes: &[u8]) -> Result<String> {
        if name.to_ascii_lowercase().ends_with(".svg") {
            return Ok(data_url("image/svg+xml", bytes));
        }
        let png = self.overlay.reencode_png(bytes)?;
        Ok(data_url("image/png", &png))
    }
}
