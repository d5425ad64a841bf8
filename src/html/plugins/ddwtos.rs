//! Drag-the-words-into-text: writes the dropped words into the gaps.

use async_trait::async_trait;
use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};

use super::choice::{dropped_key, last_response, lookup_choice, ChoiceOrder};
use crate::error::Result;
use crate::html::dispatcher::{FragmentTransform, TransformContext};
use crate::html::fragment::DocumentFragment;
use crate::html::markup::{br_to_newlines, class_number};
use crate::source::{AttemptStep, DragWordsQuestion, QuestionDefinition};

/// Shown in gaps the student left empty.
pub const EMPTY_GAP: &str = "-----------------";

pub struct DdwtosTransform;

#[async_trait]
impl FragmentTransform for DdwtosTransform {
    fn type_tag(&self) -> &'static str {
        "ddwtos"
    }

    async fn transform(
        &self,
        fragment: &DocumentFragment,
        ctx: &TransformContext<'_>,
    ) -> Result<String> {
        let Some(slot) = ctx.slot else {
            return Ok(fragment.raw_markup.clone());
        };
        let QuestionDefinition::Ddwtos(question) = &slot.question else {
            return Ok(fragment.raw_markup.clone());
        };
        let order = ChoiceOrder::from_steps(&slot.steps);
        let response = last_response(&slot.steps, true);
        fill_gaps(&fragment.raw_markup, question, &order, response)
    }
}

fn dropped_word(
    class: &str,
    question: &DragWordsQuestion,
    order: &ChoiceOrder,
    response: Option<&AttemptStep>,
) -> Option<String> {
    let place = class_number(class, "place")?;
    let group = class_number(class, "group")?;
    let value = response?.data.get(&format!("p{}", place))?;
    let canonical = order.canonical(group, dropped_key(value)?)?;
    let choice = lookup_choice(&question.choices, group, canonical)?;
    Some(br_to_newlines(&choice.text))
}

fn fill_gaps(
    html: &str,
    question: &DragWordsQuestion,
    order: &ChoiceOrder,
    response: Option<&AttemptStep>,
) -> Result<String> {
    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("div.qtext span.drop", |el| {
                let class = el.get_attribute("class").unwrap_or_default();
                let word = dropped_word(&class, question, order, response)
                    .unwrap_or_else(|| EMPTY_GAP.to_string());
                el.set_inner_content(&format!("[{}]", word), ContentType::Text);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?;
    Ok(rewritten)
}
