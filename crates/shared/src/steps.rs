//! Wizard step derivation.
//!
//! The visible step sequence is a function of the draft's current shape,
//! not stored state. Steps appear and disappear as the selected offer
//! changes; callers re-derive after every mutation and clamp any held
//! step index into the new sequence.

use serde::{Deserialize, Serialize};

use crate::domain::CommissionDraft;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKey {
    Path,
    CommSpecific,
    Addons,
    Usage,
    Streaming,
    References,
    ExtraInfo,
    Summary,
}

impl StepKey {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKey::Path => "path",
            StepKey::CommSpecific => "comm-specific",
            StepKey::Addons => "addons",
            StepKey::Usage => "usage",
            StepKey::Streaming => "streaming",
            StepKey::References => "references",
            StepKey::ExtraInfo => "extra-info",
            StepKey::Summary => "summary",
        }
    }
}

/// Derives the ordered step sequence for a draft.
///
/// `path` always opens the wizard and `summary` always closes it. The
/// comm-specific step shows when the selected offer defines comm-specific
/// inputs, or when a multi-character policy makes the character picker
/// worth a page of its own. The addons step shows only when there are
/// addons to offer.
pub fn derive_steps(draft: &CommissionDraft) -> Vec<StepKey> {
    let mut steps = vec![StepKey::Path];

    let multi_character =
        draft.max_character_count.unwrap_or(1) > 1 && draft.extra_character_price > 0.0;
    if !draft.comm_specific_inputs.is_empty() || multi_character {
        steps.push(StepKey::CommSpecific);
    }

    if !draft.addons.is_empty() {
        steps.push(StepKey::Addons);
    }

    steps.extend([
        StepKey::Usage,
        StepKey::Streaming,
        StepKey::References,
        StepKey::ExtraInfo,
        StepKey::Summary,
    ]);
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CustomField, FieldValue};

    fn bare_draft() -> CommissionDraft {
        CommissionDraft::default()
    }

    fn some_field() -> CustomField {
        CustomField {
            name: "pose".into(),
            value: FieldValue::Text(String::new()),
            price: None,
        }
    }

    #[test]
    fn path_first_summary_last_always() {
        let mut draft = bare_draft();
        for _ in 0..2 {
            let steps = derive_steps(&draft);
            assert_eq!(steps.first(), Some(&StepKey::Path));
            assert_eq!(steps.last(), Some(&StepKey::Summary));
            draft.comm_specific_inputs.push(some_field());
            draft.addons.push(some_field());
        }
    }

    #[test]
    fn minimal_draft_skips_optional_steps() {
        let steps = derive_steps(&bare_draft());
        assert_eq!(
            steps,
            vec![
                StepKey::Path,
                StepKey::Usage,
                StepKey::Streaming,
                StepKey::References,
                StepKey::ExtraInfo,
                StepKey::Summary,
            ]
        );
    }

    #[test]
    fn comm_specific_appears_with_fields() {
        let mut draft = bare_draft();
        draft.comm_specific_inputs.push(some_field());
        assert!(derive_steps(&draft).contains(&StepKey::CommSpecific));
    }

    #[test]
    fn comm_specific_appears_with_paid_multi_character_policy() {
        let mut draft = bare_draft();
        draft.max_character_count = Some(3);
        draft.extra_character_price = 50.0;
        assert!(derive_steps(&draft).contains(&StepKey::CommSpecific));

        // A free extra character does not earn the step on its own.
        draft.extra_character_price = 0.0;
        assert!(!derive_steps(&draft).contains(&StepKey::CommSpecific));
    }

    #[test]
    fn addons_step_requires_addons() {
        let mut draft = bare_draft();
        assert!(!derive_steps(&draft).contains(&StepKey::Addons));
        draft.addons.push(some_field());
        assert!(derive_steps(&draft).contains(&StepKey::Addons));
    }

    #[test]
    fn fixed_tail_order() {
        let mut draft = bare_draft();
        draft.comm_specific_inputs.push(some_field());
        draft.addons.push(some_field());
        assert_eq!(
            derive_steps(&draft),
            vec![
                StepKey::Path,
                StepKey::CommSpecific,
                StepKey::Addons,
                StepKey::Usage,
                StepKey::Streaming,
                StepKey::References,
                StepKey::ExtraInfo,
                StepKey::Summary,
            ]
        );
    }
}
