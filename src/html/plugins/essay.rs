//! Essay: prints plain-text answers and names the graders in the response
//! history.

use async_trait::async_trait;
use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, text, RewriteStrSettings};
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::Result;
use crate::html::dispatcher::{FragmentTransform, TransformContext};
use crate::html::fragment::DocumentFragment;
use crate::source::AttemptStep;

const RESPONSE_OPEN: &str = r#"<div class="qtype_essay_editor qtype_essay_response readonly">"#;

/// Action column of the response history table.
const HISTORY_ACTION_CELL: &str = "div.responsehistoryheader td.c2";

pub struct EssayTransform;

/// Grader name per response history row, for rows that record a manual grade.
async fn grader_names(
    steps: &[AttemptStep],
    ctx: &TransformContext<'_>,
) -> Result<Vec<Option<String>>> {
    let mut resolved: HashMap<i64, String> = HashMap::new();
    let mut names = Vec::with_capacity(steps.len());
    for step in steps {
        if !step.state.is_manual_grade() {
            names.push(None);
            continue;
        }
        if !resolved.contains_key(&step.user_id) {
            let name = ctx.source.user_display_name(step.user_id).await?;
            resolved.insert(step.user_id, name);
        }
        names.push(resolved.get(&step.user_id).cloned());
    }
    Ok(names)
}

fn rewrite_essay(html: &str, graders: &[Option<String>]) -> Result<String> {
    let row = Rc::new(Cell::new(0usize));
    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("textarea", |el| {
                    el.before(RESPONSE_OPEN, ContentType::Html);
                    el.after("</div>", ContentType::Html);
                    el.remove_and_keep_content();
                    Ok(())
                }),
                text!("textarea", |chunk| {
                    let html = chunk
                        .as_str()
                        .replace('<', "&lt;")
                        .replace('>', "&gt;")
                        .replace("\r\n", "\n")
                        .replace('\n', "<br>\n");
                    chunk.replace(&html, ContentType::Html);
                    Ok(())
                }),
                element!(HISTORY_ACTION_CELL, {
                    let row = Rc::clone(&row);
                    move |el| {
                        let index = row.get();
                        row.set(index + 1);
                        if let Some(Some(name)) = graders.get(index) {
                            el.append(&format!(" ({})", name), ContentType::Text);
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )?;
    Ok(rewritten)
}

#[async_trait]
impl FragmentTransform for EssayTransform {
    fn type_tag(&self) -> &'static str {
        "essay"
    }

    async fn transform(
        &self,
        fragment: &DocumentFragment,
        ctx: &TransformContext<'_>,
    ) -> Result<String> {
        let graders = match ctx.slot {
            Some(slot) => grader_names(&slot.steps, ctx).await?,
            None => Vec::new(),
        };
        rewrite_essay(&fragment.raw_markup, &graders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textarea_becomes_readonly_response() {
        let html = concat!(
            r#"<div class="answer"><textarea name="q1:1_answer" readonly="readonly" rows="10">"#,
            "First line\nSecond &amp; last</textarea></div>"
        );
        let output = rewrite_essay(html, &[]).unwrap();
        assert_eq!(
            output,
            concat!(
                r#"<div class="answer"><div class="qtype_essay_editor qtype_essay_response readonly">"#,
                "First line<br>\nSecond &amp; last</div></div>"
            )
        );
    }

    #[test]
    fn test_grader_names_follow_history_rows() {
        let html = concat!(
            r#"<div class="responsehistoryheader"><table><tbody>"#,
            r#"<tr><td class="cell c0">1</td><td class="cell c2">Started</td></tr>"#,
            r#"<tr><td class="cell c0">2</td><td class="cell c2">Saved</td></tr>"#,
            r#"<tr><td class="cell c0">3</td><td class="cell c2">Manually graded 5</td></tr>"#,
            r#"</tbody></table></div>"#
        );
        let graders = vec![None, None, Some("Grace <Hopper>".to_string())];
        let output = rewrite_essay(html, &graders).unwrap();

        assert!(output.contains(r#"<td class="cell c2">Started</td>"#));
        assert!(output.contains(r#"<td class="cell c2">Saved</td>"#));
        assert!(output.contains("Manually graded 5 (Grace &lt;Hopper&gt;)</td>"));
    }
}
