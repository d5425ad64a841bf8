//! Drag-and-drop onto image: renders the placed tiles onto the background.

use async_trait::async_trait;
use tracing::warn;

use super::choice::{dropped_key, last_response, lookup_choice, ChoiceOrder};
use super::present_overlays;
use crate::error::Result;
use crate::html::dispatcher::{FragmentTransform, TransformContext};
use crate::html::fragment::DocumentFragment;
use crate::html::markup::{br_to_newlines, data_url};
use crate::overlay::{AnnotationLabel, ImageInfo, OverlayAnnotation, OverlayScene, OverlayStyle};
use crate::source::{DragDropImageQuestion, DropPlace, QuestionDefinition, SlotRecord};

const COMPONENT: &str = "qtype_ddimageortext";

pub struct DdImageOrTextTransform;

/// Canonical choice keys placed into drop places.
fn attempt_placements<'q>(
    slot: &SlotRecord,
    question: &'q DragDropImageQuestion,
) -> Vec<(&'q DropPlace, u32)> {
    let order = ChoiceOrder::from_steps(&slot.steps);
    let Some(response) = last_response(&slot.steps, true) else {
        return Vec::new();
    };
    question
        .places
        .iter()
        .filter_map(|(number, place)| {
            let value = response.data.get(&format!("p{}", number))?;
            let canonical = order.canonical(place.group, dropped_key(value)?)?;
            Some((place, canonical))
        })
        .collect()
}

fn correct_placements(question: &DragDropImageQuestion) -> Vec<(&DropPlace, u32)> {
    question
        .right_choices
        .iter()
        .filter_map(|(number, key)| Some((question.places.get(number)?, *key)))
        .collect()
}

async fn build_scene(
    ctx: &TransformContext<'_>,
    question: &DragDropImageQuestion,
    placements: &[(&DropPlace, u32)],
) -> Result<OverlayScene> {
    let mut scene = OverlayScene::new(OverlayStyle::TextTiles);
    for (place, key) in placements {
        let Some(choice) = lookup_choice(&question.choices, place.group, *key) else {
            continue;
        };
        let image = ctx
            .blobs
            .first_in_area(question.context_id, COMPONENT, "dragimage", choice.id)
            .await?
            .and_then(|blob| ImageInfo::probe(&blob.bytes).map(|info| (blob.bytes, info)));
        let label = match image {
            Some((bytes, info)) => AnnotationLabel::Image { bytes, info },
            None => AnnotationLabel::Text(br_to_newlines(&choice.text)),
        };
        scene.annotations.push(OverlayAnnotation {
            anchor: place.xy,
            label,
            shape: None,
        });
    }
    Ok(scene)
}

#[async_trait]
impl FragmentTransform for DdImageOrTextTransform {
    fn type_tag(&self) -> &'static str {
        "ddimageortext"
    }

    async fn transform(
        &self,
        fragment: &DocumentFragment,
        ctx: &TransformContext<'_>,
    ) -> Result<String> {
        let Some(slot) = ctx.slot else {
            return Ok(fragment.raw_markup.clone());
        };
        let QuestionDefinition::DdImageOrText(question) = &slot.question else {
            return Ok(fragment.raw_markup.clone());
        };

        let background = ctx
            .blobs
            .first_in_area(question.context_id, COMPONENT, "bgimage", question.id)
            .await?;
        let Some(background) = background else {
            warn!(
                question_id = question.id,
                slot = slot.slot,
                "Background image missing, keeping question markup"
            );
            return Ok(fragment.raw_markup.clone());
        };

        let attempt_scene = build_scene(ctx, question, &attempt_placements(slot, question)).await?;
        let correct_scene = build_scene(ctx, question, &correct_placements(question)).await?;

        let rendered = ctx
            .overlay
            .render(&background.bytes, &attempt_scene)
            .and_then(|attempt| {
                Ok((attempt, ctx.overlay.render(&background.bytes, &correct_scene)?))
            });
        match rendered {
            Ok((attempt, correct)) => present_overlays(
                &fragment.raw_markup,
                &data_url("image/png", &attempt),
                &data_url("image/png", &correct),
            ),
            Err(err) => {
                warn!(question_id = question.id, error = %err, "Overlay rendering failed");
                Ok(fragment.raw_markup.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobAddress, BlobStore, FsBlobStore};
    use crate::html::plugins::choice::tests::step;
    use crate::overlay::tests::TINY_PNG;
    use crate::overlay::OverlayRenderer;
    use crate::source::{fixtures, DragChoice, JsonAttemptSource, StepState};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn question() -> DragDropImageQuestion {
        let mut group = BTreeMap::new();
        group.insert(1, DragChoice { id: 501, text: "Paris".into() });
        group.insert(2, DragChoice { id: 502, text: "Rome".into() });
        let mut places = BTreeMap::new();
        places.insert(1, DropPlace { group: 1, xy: (10, 20) });
        places.insert(2, DropPlace { group: 1, xy: (40, 60) });
        DragDropImageQuestion {
            id: 77,
            context_id: 5,
            choices: BTreeMap::from([(1, group)]),
            places,
            right_choices: BTreeMap::from([(1, 1), (2, 2)]),
        }
    }

    fn slot() -> SlotRecord {
        SlotRecord {
            slot: 1,
            qtype: "ddimageortext".into(),
            steps: vec![
                step(1, StepState::Todo, &[("_choiceorder1", "2,1")]),
                step(2, StepState::Complete, &[("p1", "1"), ("p2", "")]),
            ],
            question: QuestionDefinition::DdImageOrText(question()),
        }
    }

    #[test]
    fn test_attempt_placements_use_choice_order() {
        let slot = slot();
        let question = question();
        let placed = attempt_placements(&slot, &question);
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].0.xy, (10, 20));
        // Display key 1 is canonical choice 2.
        assert_eq!(placed[0].1, 2);

        let correct = correct_placements(&question);
        assert_eq!(correct.iter().map(|(_, key)| *key).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_missing_background_keeps_markup() {
        let dir = TempDir::new().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let source = JsonAttemptSource::new(dir.path());
        let overlay = OverlayRenderer::with_fontdb(Arc::new(usvg::fontdb::Database::new()));
        let mut subject = fixtures::subject(1);
        subject.slots.push(slot());
        let ctx = TransformContext::new(&subject, &blobs, &source, &overlay, dir.path())
            .with_slot(1);

        let fragment = DocumentFragment {
            type_tag: "ddimageortext".into(),
            slot_index: 1,
            raw_markup: r#"<div class="que ddimageortext"><img class="dropbackground" src="x"></div>"#
                .into(),
            span: 0..0,
        };
        let output = DdImageOrTextTransform.transform(&fragment, &ctx).await.unwrap();
        assert_eq!(output, fragment.raw_markup);
    }

    #[tokio::test]
    async fn test_renders_attempt_and_correct_overlays() {
        let dir = TempDir::new().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        blobs
            .put(&BlobAddress::new(5, COMPONENT, "bgimage", 77, "bg.png"), TINY_PNG)
            .await
            .unwrap();
        blobs
            .put(&BlobAddress::new(5, COMPONENT, "dragimage", 502, "rome.png"), TINY_PNG)
            .await
            .unwrap();
        let source = JsonAttemptSource::new(dir.path());
        let overlay = OverlayRenderer::with_fontdb(Arc::new(usvg::fontdb::Database::new()));
        let mut subject = fixtures::subject(1);
        subject.slots.push(slot());
        let ctx = TransformContext::new(&subject, &blobs, &source, &overlay, dir.path())
            .with_slot(1);

        let fragment = DocumentFragment {
            type_tag: "ddimageortext".into(),
            slot_index: 1,
            raw_markup: concat!(
                r#"<div class="que ddimageortext"><div class="content">"#,
                r#"<img class="dropbackground" src="https://lms/pluginfile.php/5/qtype_ddimageortext/bgimage/77/bg.png">"#,
                r#"<div class="dragitems"></div></div></div>"#
            )
            .into(),
            span: 0..0,
        };
        let output = DdImageOrTextTransform.transform(&fragment, &ctx).await.unwrap();

        assert!(!output.contains("pluginfile.php"));
        assert!(!output.contains("dragitems"));
        assert_eq!(output.matches("data:image/png;base64,").count(), 2);
        assert!(output.contains("correctresult"));
    }
}
