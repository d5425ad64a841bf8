//! Small markup helpers shared by the transforms, the assembler and the inliner.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use lol_html::{element, rewrite_str, RewriteStrSettings};
use once_cell::sync::Lazy;
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;

/// Substitute for any image that could not be resolved.
const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="32" height="32" viewBox="0 0 32 32"><rect x="1" y="1" width="30" height="30" rx="4" fill="#f8d7da" stroke="#b02a37" stroke-width="2"/><path d="M10 10 L22 22 M22 10 L10 22" stroke="#b02a37" stroke-width="3" stroke-linecap="round"/></svg>"##;

pub static PLACEHOLDER_DATA_URL: Lazy<String> =
    Lazy::new(|| data_url("image/svg+xml", PLACEHOLDER_SVG.as_bytes()));

/// Size of [`PLACEHOLDER_DATA_URL`] in pixels.
pub const PLACEHOLDER_SIZE: (u32, u32) = (32, 32);

pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

pub fn is_data_url(src: &str) -> bool {
    src.trim_start()
        .get(..5)
        .map(|scheme| scheme.eq_ignore_ascii_case("data:"))
        .unwrap_or(false)
}

/// Escapes text for use inside element content.
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Escapes text for use inside a double-quoted attribute value.
pub fn escape_attr(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}

/// Turns line breaks into `<br>` after escaping the text.
pub fn nl2br(text: &str) -> String {
    escape_text(text)
        .replace("\r\n", "\n")
        .replace('\n', "<br>\n")
}

/// Replaces `<br>` variants in choice labels with newlines.
pub fn br_to_newlines(text: &str) -> String {
    text.replace("<br />", "\n")
        .replace("<br/>", "\n")
        .replace("<br>", "\n")
}

/// Makes a string safe for use as a file name: drops path separators,
/// control characters and `:*?"<>|`, and trims surrounding dots and spaces.
pub fn clean_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|ch| {
            !ch.is_control() && !matches!(ch, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
        })
        .collect();
    cleaned.trim_matches(|ch: char| ch == '.' || ch.is_whitespace()).to_string()
}

/// Values of `attribute` on every element matching `selector`, in document order.
pub fn collect_attribute(html: &str, selector: &str, attribute: &str) -> Result<Vec<String>> {
    let found = Rc::new(RefCell::new(Vec::new()));
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(selector, {
                let found = Rc::clone(&found);
                move |el| {
                    if let Some(value) = el.get_attribute(attribute) {
                        found.borrow_mut().push(value);
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )?;
    let values = found.borrow().clone();
    Ok(values)
}

/// Number carried by a `{prefix}{n}` class token, e.g. `place3` -> `3`.
pub fn class_number(class: &str, prefix: &str) -> Option<u32> {
    class
        .split_whitespace()
        .filter_map(|token| token.strip_prefix(prefix))
        .find_map(|rest| rest.parse().ok())
}
