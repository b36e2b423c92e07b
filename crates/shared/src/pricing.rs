//! Price derivation for an in-progress commission draft.
//!
//! The total is a pure function of the draft. Callers recompute it after
//! every mutation rather than adjusting it incrementally, so partial
//! updates can never leave a stale figure behind.

use crate::domain::CommissionDraft;

/// Surcharge applied to the whole subtotal when the client withholds
/// permission to stream the work session.
pub const NO_STREAMING_FEE_RATE: f64 = 0.25;

/// Computes the draft's total price, rounded to cents.
///
/// base + per-extra-character charges + addon contributions, then the
/// no-streaming fee on the whole subtotal when `allow_streaming` is
/// false. Comm-specific inputs describe the work but never carry a
/// charge of their own.
pub fn compute_total(draft: &CommissionDraft) -> f64 {
    let mut subtotal = draft.base_price;

    if draft.character_count > 1 {
        subtotal += (draft.character_count - 1) as f64 * draft.extra_character_price;
    }

    for addon in &draft.addons {
        subtotal += addon.price_contribution();
    }

    let total = if draft.allow_streaming {
        subtotal
    } else {
        subtotal * (1.0 + NO_STREAMING_FEE_RATE)
    };

    round_cents(total)
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CustomField, FieldValue, PathChoice};

    fn draft_with_base(base: f64) -> CommissionDraft {
        CommissionDraft {
            category: PathChoice::named("illustration"),
            commission_type: PathChoice::named("full-body"),
            base_price: base,
            ..CommissionDraft::default()
        }
    }

    fn boolean_addon(name: &str, price: f64, checked: bool) -> CustomField {
        CustomField {
            name: name.into(),
            value: FieldValue::Boolean(checked),
            price: Some(price),
        }
    }

    #[test]
    fn base_only() {
        let draft = draft_with_base(100.0);
        assert_eq!(compute_total(&draft), 100.0);
    }

    #[test]
    fn extra_characters_charged_beyond_the_first() {
        let mut draft = draft_with_base(100.0);
        draft.character_count = 3;
        draft.extra_character_price = 40.0;
        assert_eq!(compute_total(&draft), 180.0);
    }

    #[test]
    fn single_character_ignores_extra_price() {
        let mut draft = draft_with_base(100.0);
        draft.character_count = 1;
        draft.extra_character_price = 40.0;
        assert_eq!(compute_total(&draft), 100.0);
    }

    #[test]
    fn unchecked_boolean_addon_costs_nothing() {
        let mut draft = draft_with_base(100.0);
        draft.addons.push(boolean_addon("shading", 30.0, false));
        assert_eq!(compute_total(&draft), 100.0);
    }

    #[test]
    fn text_field_charges_only_when_filled() {
        let mut draft = draft_with_base(100.0);
        draft.addons.push(CustomField {
            name: "custom prop".into(),
            value: FieldValue::Text("   ".into()),
            price: Some(15.0),
        });
        assert_eq!(compute_total(&draft), 100.0);

        draft.addons[0].value = FieldValue::Text("a sword".into());
        assert_eq!(compute_total(&draft), 115.0);
    }

    #[test]
    fn list_field_charges_per_filled_entry() {
        let mut draft = draft_with_base(100.0);
        draft.addons.push(CustomField {
            name: "extra outfits".into(),
            value: FieldValue::List(vec!["casual".into(), "".into(), "armor".into()]),
            price: Some(20.0),
        });
        assert_eq!(compute_total(&draft), 140.0);
    }

    #[test]
    fn addon_without_price_is_free() {
        let mut draft = draft_with_base(100.0);
        draft.addons.push(CustomField {
            name: "extra sketch".into(),
            value: FieldValue::Boolean(true),
            price: None,
        });
        assert_eq!(compute_total(&draft), 100.0);
    }

    #[test]
    fn comm_specific_inputs_never_charge() {
        // Even a filled comm-specific field with a price attached stays
        // descriptive; only addons are billable.
        let mut draft = draft_with_base(100.0);
        draft.comm_specific_inputs.push(CustomField {
            name: "pose notes".into(),
            value: FieldValue::Text("dynamic".into()),
            price: Some(10.0),
        });
        assert_eq!(compute_total(&draft), 100.0);
    }

    #[test]
    fn no_streaming_fee_multiplies_the_whole_subtotal() {
        let mut streaming = draft_with_base(200.0);
        streaming.addons.push(boolean_addon("shading", 40.0, true));

        let mut private = streaming.clone();
        private.allow_streaming = false;

        assert_eq!(compute_total(&private), compute_total(&streaming) * 1.25);
    }

    #[test]
    fn worked_scenario() {
        // base 550, two extra characters at 50, one 25 addon, no streaming.
        let mut draft = draft_with_base(550.0);
        draft.character_count = 3;
        draft.extra_character_price = 50.0;
        draft.addons.push(boolean_addon("background", 25.0, true));
        assert_eq!(compute_total(&draft), 675.0);

        draft.allow_streaming = false;
        assert_eq!(compute_total(&draft), 843.75);
    }

    #[test]
    fn deterministic_and_idempotent() {
        let mut draft = draft_with_base(123.45);
        draft.character_count = 2;
        draft.extra_character_price = 33.33;
        draft.allow_streaming = false;

        let first = compute_total(&draft);
        draft.total_price = first;
        let second = compute_total(&draft);
        assert_eq!(first, second);
    }

    #[test]
    fn rounds_to_cents() {
        let mut draft = draft_with_base(10.01);
        draft.allow_streaming = false;
        // 10.01 * 1.25 = 12.5125 -> 12.51
        assert_eq!(compute_total(&draft), 12.51);
    }
}
