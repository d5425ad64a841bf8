//! Multiple choice: swaps the font-based correctness icons for embedded
//! images the converter can print.

use async_trait::async_trait;
use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use once_cell::sync::Lazy;

use crate::error::Result;
use crate::html::dispatcher::{FragmentTransform, TransformContext};
use crate::html::fragment::DocumentFragment;
use crate::html::markup::data_url;

const CORRECT_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="13" height="13" viewBox="0 0 13 13"><path d="M1.5 7 L5 10.5 L11.5 2.5" fill="none" stroke="#357a32" stroke-width="2.2" stroke-linecap="round" stroke-linejoin="round"/></svg>"##;
const INCORRECT_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="13" height="13" viewBox="0 0 13 13"><path d="M2.5 2.5 L10.5 10.5 M10.5 2.5 L2.5 10.5" fill="none" stroke="#ca3120" stroke-width="2.2" stroke-linecap="round"/></svg>"##;
const PARTIAL_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="13" height="13" viewBox="0 0 13 13"><path d="M1.5 7 L5 10.5 L11.5 2.5" fill="none" stroke="#f0ad4e" stroke-width="2.2" stroke-linecap="round" stroke-linejoin="round"/></svg>"##;

static ICONS: Lazy<[(&'static str, &'static str, String); 3]> = Lazy::new(|| {
    [
        ("div.answer .correct > i", "Correct", data_url("image/svg+xml", CORRECT_SVG.as_bytes())),
        ("div.answer .incorrect > i", "Incorrect", data_url("image/svg+xml", INCORRECT_SVG.as_bytes())),
        (
            "div.answer .partiallycorrect > i",
            "Partially correct",
            data_url("image/svg+xml", PARTIAL_SVG.as_bytes()),
        ),
    ]
});

const CSS: &str = r#".que.multichoice .answer div.r0,
.que.multichoice .answer div.r1 {
    display: table;
    width: 100%;
    padding: 0.2em 0;
}
.que.multichoice .answer div.r0 > *,
.que.multichoice .answer div.r1 > * {
    display: table-cell;
    vertical-align: top;
}
.que.multichoice .answer input {
    width: 1.5em;
}
.que.multichoice img.correctnessicon {
    margin-left: 0.4em;
    vertical-align: middle;
}"#;

pub struct MultichoiceTransform;

fn replace_icons(html: &str) -> Result<String> {
    let handlers = ICONS
        .iter()
        .map(|(selector, alt, src)| {
            element!(selector, move |el| {
                el.replace(
                    &format!(
                        r#"<img src="{}" class="correctnessicon" width="13" height="13" alt="{}">"#,
                        src, alt
                    ),
                    ContentType::Html,
                );
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

#[async_trait]
impl FragmentTransform for MultichoiceTransform {
    fn type_tag(&self) -> &'static str {
        "multichoice"
    }

    async fn transform(
        &self,
        fragment: &DocumentFragment,
        _ctx: &TransformContext<'_>,
    ) -> Result<String> {
        replace_icons(&fragment.raw_markup)
    }

    fn css(&self) -> &'static str {
        CSS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icons_are_replaced() {
        let html = concat!(
            r#"<div class="answer">"#,
            r#"<div class="r0 correct"><input type="radio"><label>A</label> <i class="icon fa fa-check text-success" title="Correct"></i></div>"#,
            r#"<div class="r1 incorrect"><input type="radio"><label>B</label> <i class="icon fa fa-remove text-danger"></i></div>"#,
            r#"<div class="r0 partiallycorrect"><label>C</label><i class="icon fa fa-check-square"></i></div>"#,
            r#"</div><div class="outcome"><i class="keep"></i></div>"#
        );
        let output = replace_icons(html).unwrap();

        assert_eq!(output.matches(r#"class="correctnessicon""#).count(), 3);
        assert!(output.contains(r#"alt="Correct""#));
        assert!(output.contains(r#"alt="Incorrect""#));
        assert!(output.contains(r#"alt="Partially correct""#));
        assert!(!output.contains("fa-check"));
        assert!(output.contains(r#"<i class="keep"></i>"#));
    }
}
