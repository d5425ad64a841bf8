//! Drag markers: draws the placed markers, and the target shapes with their
//! correct markers, onto the background.

use async_trait::async_trait;
use tracing::warn;

use super::choice::{last_response, lookup_choice, ChoiceOrder};
use super::present_overlays;
use crate::error::Result;
use crate::html::dispatcher::{FragmentTransform, TransformContext};
use crate::html::fragment::DocumentFragment;
use crate::html::markup::{br_to_newlines, data_url};
use crate::overlay::{AnnotationLabel, DropShape, OverlayAnnotation, OverlayScene, OverlayStyle};
use crate::source::{DragMarkerQuestion, QuestionDefinition, SlotRecord};

const COMPONENT: &str = "qtype_ddmarker";
/// Markers are not grouped; all choices live in the first group.
const MARKER_GROUP: u32 = 1;

pub struct DdMarkerTransform;

fn parse_point(value: &str) -> Option<(i64, i64)> {
    let (x, y) = value.split_once(',')?;
    let x = x.trim().parse::<f64>().ok()?;
    let y = y.trim().parse::<f64>().ok()?;
    Some((x.round() as i64, y.round() as i64))
}

/// Markers as the student placed them. Response keys are `c{display key}`
/// with `x,y` points separated by `;`.
fn attempt_scene(slot: &SlotRecord, question: &DragMarkerQuestion) -> OverlayScene {
    let mut scene = OverlayScene::new(OverlayStyle::Markers);
    let order = ChoiceOrder::from_steps(&slot.steps);
    let Some(response) = last_response(&slot.steps, false) else {
        return scene;
    };

    for (name, value) in &response.data {
        let Some(instance) = name.strip_prefix('c').and_then(|n| n.parse().ok()) else {
            continue;
        };
        let Some(choice) = order
            .canonical(MARKER_GROUP, instance)
            .and_then(|key| lookup_choice(&question.choices, MARKER_GROUP, key))
        else {
            continue;
        };
        for point in value.split(';').filter_map(parse_point) {
            scene.annotations.push(OverlayAnnotation {
                anchor: point,
                label: AnnotationLabel::Text(br_to_newlines(&choice.text)),
                shape: None,
            });
        }
    }
    scene
}

/// Target shapes with the correct marker anchored to each shape's center;
/// markers sharing a rectangle are stacked inside it.
fn correct_scene(question: &DragMarkerQuestion) -> OverlayScene {
    let mut scene = OverlayScene::new(OverlayStyle::Markers);
    scene.redistribute = true;

    for (number, place) in &question.places {
        let Some(shape) = DropShape::parse(&place.shape, &place.coords) else {
            warn!(question_id = question.id, place = number, shape = %place.shape, "Unparsable drop shape");
            continue;
        };
        let choice = question
            .right_choices
            .get(number)
            .and_then(|key| lookup_choice(&question.choices, place.group, *key));
        if let Some(choice) = choice {
            scene.annotations.push(OverlayAnnotation {
                anchor: shape.center(),
                label: AnnotationLabel::Text(br_to_newlines(&choice.text)),
                shape: Some(shape.clone()),
            });
        }
        scene.shapes.push(shape);
    }
    scene
}

#[async_trait]
impl FragmentTransform for DdMarkerTransform {
    fn type_tag(&self) -> &'static str {
        "ddmarker"
    }

    async fn transform(
        &self,
        fragment: &DocumentFragment,
        ctx: &TransformContext<'_>,
    ) -> Result<String> {
        let Some(slot) = ctx.slot else {
            return Ok(fragment.raw_markup.clone());
        };
        let QuestionDefinition::DdMarker(question) = &slot.question else {
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

        let attempt = ctx.overlay.render(&background.bytes, &attempt_scene(slot, question));
        let correct = ctx.overlay.render(&background.bytes, &correct_scene(question));
        match (attempt, correct) {
            (Ok(attempt), Ok(correct)) => present_overlays(
                &fragment.raw_markup,
                &data_url("image/png", &attempt),
                &data_url("image/png", &correct),
            ),
            (Err(err), _) | (_, Err(err)) => {
                warn!(question_id = question.id, error = %err, "Overlay rendering failed");
                Ok(fragment.raw_markup.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::plugins::choice::tests::step;
    use crate::source::{DragChoice, MarkerPlace, StepState};
    use std::collections::BTreeMap;

    fn question() -> DragMarkerQuestion {
        let group = BTreeMap::from([
            (1, DragChoice { id: 1, text: "North".into() }),
            (2, DragChoice { id: 2, text: "South".into() }),
        ]);
        let places = BTreeMap::from([
            (
                1,
                MarkerPlace {
                    group: 1,
                    shape: "rectangle".into(),
                    coords: "0,0;100,80".into(),
                },
            ),
            (
                2,
                MarkerPlace {
                    group: 1,
                    shape: "circle".into(),
                    coords: "200,50;20".into(),
                },
            ),
            (
                3,
                MarkerPlace {
                    group: 1,
                    shape: "hexagon".into(),
                    coords: "1,1".into(),
                },
            ),
        ]);
        DragMarkerQuestion {
            id: 9,
            context_id: 4,
            choices: BTreeMap::from([(1, group)]),
            places,
            right_choices: BTreeMap::from([(1, 1), (2, 2), (3, 1)]),
        }
    }

    #[test]
    fn test_attempt_scene_reads_all_points() {
        let slot = SlotRecord {
            slot: 2,
            qtype: "ddmarker".into(),
            steps: vec![
                step(1, StepState::Todo, &[("_choiceorder1", "2,1")]),
                step(2, StepState::Complete, &[("c1", "10,20;30.4,40.6"), ("c2", "")]),
            ],
            question: QuestionDefinition::Other,
        };
        let scene = attempt_scene(&slot, &question());

        assert_eq!(scene.annotations.len(), 2);
        assert_eq!(scene.annotations[0].anchor, (10, 20));
        assert_eq!(scene.annotations[1].anchor, (30, 41));
        assert_eq!(
            scene.annotations[0].label,
            AnnotationLabel::Text("South".into())
        );
        assert!(scene.shapes.is_empty());
        assert!(!scene.redistribute);
    }

    #[test]
    fn test_correct_scene_anchors_to_shape_centers() {
        let scene = correct_scene(&question());

        assert!(scene.redistribute);
        assert_eq!(scene.shapes.len(), 2);
        assert_eq!(scene.annotations.len(), 2);
        assert_eq!(scene.annotations[0].anchor, (50, 40));
        assert_eq!(scene.annotations[1].anchor, (200, 50));
        assert_eq!(
            scene.annotations[1].label,
            AnnotationLabel::Text("South".into())
        );
    }
}
