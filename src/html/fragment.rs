//! Locates the top-level question containers in rendered review markup.
//!
//! A question container is a `<div>` whose class list starts with `que`
//! (e.g. `<div id="question-12-3" class="que ddwtos deferredfeedback">`).
//! The second class token is the question type, the numeric suffix of the id
//! is the slot.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

/// Div tags, plus the comment and raw-text ranges whose content is not markup.
static DIV_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<!--.*?-->|<script\b.*?</script\s*>|<style\b.*?</style\s*>|<div\b[^>]*>|</div\s*>",
    )
    .expect("valid regex")
});

fn is_opaque(tag: &str) -> bool {
    let lower = tag.get(..7).unwrap_or(tag).to_ascii_lowercase();
    lower.starts_with("<!--") || lower.starts_with("<script") || lower.starts_with("<style")
}

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s(class|id)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid regex")
});

/// One question container found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFragment {
    pub type_tag: String,
    pub slot_index: u32,
    /// Markup of the container, including its own open and close tags.
    pub raw_markup: String,
    /// Byte range of `raw_markup` within the scanned document.
    pub span: Range<usize>,
}

struct OpenTag {
    start: usize,
    question: Option<(String, u32)>,
}

/// Returns the outermost question containers of `html` in document order.
///
/// Containers nested inside another question are not returned separately,
/// and containers without a parsable slot are skipped.
pub fn extract_fragments(html: &str) -> Vec<DocumentFragment> {
    let mut fragments = Vec::new();
    let mut stack: Vec<OpenTag> = Vec::new();

    for tag in DIV_TAG.find_iter(html) {
        let text = tag.as_str();
        if is_opaque(text) {
            continue;
        }
        if text.starts_with("</") {
            let Some(open) = stack.pop() else {
                continue;
            };
            if let Some((type_tag, slot_index)) = open.question {
                let inside_question = stack.iter().any(|outer| outer.question.is_some());
                if !inside_question {
                    let span = open.start..tag.end();
                    fragments.push(DocumentFragment {
                        type_tag,
                        slot_index,
                        raw_markup: html[span.clone()].to_string(),
                        span,
                    });
                }
            }
            continue;
        }

        if text.ends_with("/>") {
            continue;
        }
        stack.push(OpenTag {
            start: tag.start(),
            question: question_identity(text),
        });
    }

    fragments
}

fn question_identity(open_tag: &str) -> Option<(String, u32)> {
    let mut class = None;
    let mut id = None;
    for captures in ATTRIBUTE.captures_iter(open_tag) {
        let value = captures
            .get(2)
            .or_else(|| captures.get(3))
            .map(|m| m.as_str().to_string());
        match captures.get(1).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
            Some("class") => class = value,
            Some("id") => id = value,
            _ => {}
        }
    }

    let class = class?;
    let mut tokens = class.split_whitespace();
    if tokens.next()? != "que" {
        return None;
    }
    let type_tag = tokens.next()?.to_string();
    let slot = id?.rsplit('-').next()?.parse().ok()?;
    Some((type_tag, slot))
}
