//! Maps shuffled per-attempt choice numbers back to canonical choices.
//!
//! Drag-and-drop questions shuffle their choices per attempt. The first step
//! of the attempt records `_choiceorder{group}` as the comma-separated list
//! of canonical keys in display order, so display key `i` (1-based) is the
//! canonical key at position `i - 1`.

use std::collections::BTreeMap;

use crate::source::{AttemptStep, DragChoice, StepState};

const CHOICE_ORDER_PREFIX: &str = "_choiceorder";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChoiceOrder {
    groups: BTreeMap<u32, Vec<u32>>,
}

impl ChoiceOrder {
    pub fn from_steps(steps: &[AttemptStep]) -> Self {
        let mut groups = BTreeMap::new();
        let Some(first) = steps.iter().find(|step| step.state == StepState::Todo) else {
            return Self { groups };
        };
        for (name, value) in &first.data {
            let Some(suffix) = name.strip_prefix(CHOICE_ORDER_PREFIX) else {
                continue;
            };
            let group = if suffix.is_empty() {
                1
            } else {
                match suffix.parse() {
                    Ok(group) => group,
                    Err(_) => continue,
                }
            };
            let keys = value
                .split(',')
                .filter_map(|key| key.trim().parse().ok())
                .collect();
            groups.insert(group, keys);
        }
        Self { groups }
    }

    /// Canonical key of display key `instance` in `group`.
    pub fn canonical(&self, group: u32, instance: u32) -> Option<u32> {
        let position = instance.checked_sub(1)? as usize;
        self.groups.get(&group)?.get(position).copied()
    }
}

/// The step holding the final answer: the last `complete` step, or the last
/// `invalid` one too when partial answers count.
pub fn last_response(steps: &[AttemptStep], include_invalid: bool) -> Option<&AttemptStep> {
    steps.iter().rev().find(|step| {
        step.state == StepState::Complete || (include_invalid && step.state == StepState::Invalid)
    })
}

pub fn lookup_choice(
    choices: &BTreeMap<u32, BTreeMap<u32, DragChoice>>,
    group: u32,
    key: u32,
) -> Option<&DragChoice> {
    choices.get(&group)?.get(&key)
}

/// Reads a positive display key; `0` and empty values mean "nothing dropped".
pub fn dropped_key(value: &str) -> Option<u32> {
    match value.trim().parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(key) => Some(key),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn step(id: i64, state: StepState, data: &[(&str, &str)]) -> AttemptStep {
        AttemptStep {
            id,
            state,
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            user_id: 10,
        }
    }

    #[test]
    fn test_choice_order_maps_display_to_canonical() {
        let steps = vec![
            step(1, StepState::Todo, &[("_choiceorder1", "3,1,2"), ("_choiceorder2", "5,4")]),
            step(2, StepState::Complete, &[("p1", "1")]),
        ];
        let order = ChoiceOrder::from_steps(&steps);
        assert_eq!(order.canonical(1, 1), Some(3));
        assert_eq!(order.canonical(1, 3), Some(2));
        assert_eq!(order.canonical(2, 2), Some(4));
        assert_eq!(order.canonical(1, 0), None);
        assert_eq!(order.canonical(1, 4), None);
        assert_eq!(order.canonical(9, 1), None);
    }

    #[test]
    fn test_ungrouped_order_is_group_one() {
        let steps = vec![step(1, StepState::Todo, &[("_choiceorder", "2,1")])];
        assert_eq!(ChoiceOrder::from_steps(&steps).canonical(1, 1), Some(2));
    }

    #[test]
    fn test_last_response() {
        let steps = vec![
            step(1, StepState::Todo, &[]),
            step(2, StepState::Complete, &[("p1", "1")]),
            step(3, StepState::Invalid, &[("p1", "2")]),
            step(4, StepState::GradedRight, &[]),
        ];
        assert_eq!(last_response(&steps, false).map(|s| s.id), Some(2));
        assert_eq!(last_response(&steps, true).map(|s| s.id), Some(3));
        assert!(last_response(&steps[..1], true).is_none());
    }

    #[test]
    fn test_dropped_key() {
        assert_eq!(dropped_key("2"), Some(2));
        assert_eq!(dropped_key("0"), None);
        assert_eq!(dropped_key(""), None);
    }
}
