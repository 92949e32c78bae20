//! Normalizer properties over generated `Person` conditions.

use morphdb_codec::Shape;
use morphdb_core::{evaluate, normalize, Condition};
use morphdb_testkit::generators::{person_condition_strategy, person_strategy};
use proptest::prelude::*;

/// Returns true if the condition still contains a shape `normalize`
/// removes.
fn has_nested_connective(condition: &Condition) -> bool {
    match condition {
        Condition::And(children) => children.iter().any(|c| {
            matches!(c, Condition::And(_) | Condition::Always | Condition::Never)
                || has_nested_connective(c)
        }),
        Condition::Or(children) => children.iter().any(|c| {
            matches!(c, Condition::Or(_) | Condition::Always | Condition::Never)
                || has_nested_connective(c)
        }),
        Condition::Not(inner) => matches!(
            inner.as_ref(),
            Condition::Not(_) | Condition::And(_) | Condition::Or(_) | Condition::OnField { .. }
        ) || has_nested_connective(inner),
        Condition::OnField { condition, .. } => {
            matches!(condition.as_ref(), Condition::OnField { .. })
                || has_nested_connective(condition)
        }
        _ => false,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn normalize_is_idempotent(condition in person_condition_strategy()) {
        let once = normalize(&condition);
        prop_assert_eq!(normalize(&once), once);
    }

    #[test]
    fn normalize_preserves_evaluation(
        condition in person_condition_strategy(),
        person in person_strategy(),
    ) {
        let value = person.to_value();
        let expected = evaluate(&condition, &value).unwrap();
        prop_assert_eq!(evaluate(&normalize(&condition), &value).unwrap(), expected);
    }

    #[test]
    fn normalized_form_is_flat(condition in person_condition_strategy()) {
        prop_assert!(!has_nested_connective(&normalize(&condition)));
    }
}

#[test]
fn serialized_conditions_survive_normalization() {
    let condition = Condition::not(Condition::and([
        Condition::on_field("age", Condition::LessThan(18.into())),
        Condition::on_field("home", Condition::field_eq("city", "Oslo")),
    ]));
    let json = serde_json::to_string(&normalize(&condition)).unwrap();
    let back: Condition = serde_json::from_str(&json).unwrap();
    assert_eq!(back, normalize(&condition));
}
