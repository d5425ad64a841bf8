//! Built-in question transforms and the markup helpers they share.

pub mod choice;
pub mod ddimageortext;
pub mod ddmarker;
pub mod ddwtos;
pub mod essay;
pub mod multichoice;
pub mod stack;

use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use std::cell::Cell;
use std::rc::Rc;

use crate::error::Result;
use crate::html::markup::escape_attr;

/// Interactive parts of drag-and-drop questions that have no meaning on paper.
const DRAG_WIDGETS: &str = "div.dropzones, div.dragitems, div.draghomes, div.markertexts";

/// Shows the rendered attempt overlay in place of the question background,
/// drops the drag widgets and adds a block with the correct-answer overlay.
pub(crate) fn present_overlays(html: &str, attempt_src: &str, correct_src: &str) -> Result<String> {
    let replaced = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("img.dropbackground", |el| {
                    el.set_attribute("src", attempt_src)?;
                    el.remove_attribute("srcset");
                    Ok(())
                }),
                element!(DRAG_WIDGETS, |el| {
                    el.remove();
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )?;

    let block = format!(
        r#"<div class="correctresult clearfix"><h4>Correct answers</h4><img src="{}" alt="Correct answers"></div>"#,
        escape_attr(correct_src)
    );
    insert_block(&replaced, &block)
}

/// Inserts `block` before the question's outcome box, or at the end of the
/// question content when there is none.
fn insert_block(html: &str, block: &str) -> Result<String> {
    for (selector, before) in [("div.outcome", true), ("div.content", false)] {
        let inserted = Rc::new(Cell::new(false));
        let output = rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![element!(selector, {
                    let inserted = Rc::clone(&inserted);
                    move |el| {
                        if !inserted.get() {
                            if before {
                                el.before(block, ContentType::Html);
                            } else {
                                el.append(block, ContentType::Html);
                            }
                            inserted.set(true);
                        }
                        Ok(())
                    }
                })],
                ..RewriteStrSettings::default()
            },
        )?;
        if inserted.get() {
            return Ok(output);
        }
    }

    let mut output = html.to_string();
    match output.rfind("</div>") {
        Some(close) => output.insert_str(close, block),
        None => output.push_str(block),
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_overlays() {
        let html = concat!(
            r#"<div class="que ddimageortext"><div class="content"><div class="formulation">"#,
            r#"<div class="ddarea"><img class="dropbackground img-responsive" src="https://x/bg.png">"#,
            r#"<div class="dropzones"><div class="dropzone">1</div></div>"#,
            r#"<div class="dragitems"><div class="drag">cat</div></div></div></div>"#,
            r#"<div class="outcome">Feedback</div></div></div>"#,
        );
        let output = present_overlays(html, "data:image/png;base64,AAA", "data:image/png;base64,BBB")
            .unwrap();

        assert!(output.contains(r#"src="data:image/png;base64,AAA""#));
        assert!(!output.contains("dropzones"));
        assert!(!output.contains("dragitems"));
        let block = output.find("correctresult").unwrap();
        assert!(block < output.find(r#"class="outcome""#).unwrap());
        assert!(output.contains(r#"<img src="data:image/png;base64,BBB""#));
    }

    #[test]
    fn test_block_falls_back_to_content_end() {
        let html = r#"<div class="que ddmarker"><div class="content"><p>q</p></div></div>"#;
        let output = insert_block(html, "<b>x</b>").unwrap();
        assert_eq!(
            output,
            r#"<div class="que ddmarker"><div class="content"><p>q</p><b>x</b></div></div>"#
        );

        let bare = insert_block("<div>q</div>", "<b>x</b>").unwrap();
        assert_eq!(bare, "<div>q<b>x</b></div>");
    }
}
