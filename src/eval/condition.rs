//! Declarative condition evaluation and the left-to-right logical fold.
//!
//! Both operands are coerced to lower-cased strings before comparison, with
//! no exception for numeric or boolean operands. The fold has no operator
//! precedence: `A(And) B(Or) C(And)` reads as `((A AND B) OR C)`. Both are
//! documented platform semantics and must not be "fixed".

use tracing::trace;

use crate::metadata::{ConditionOperator, LogicalGroup, PolicyCondition};
use crate::state::{RecordData, Value};

/// Total over all inputs; unknown operators evaluate to false.
pub fn evaluate(actual: &Value, operator: ConditionOperator, expected: Option<&str>) -> bool {
    let actual = actual.coerce_string().to_lowercase();
    let expected = expected.unwrap_or_default().to_lowercase();

    let result = match operator {
        ConditionOperator::Equals => actual == expected,
        ConditionOperator::NotEquals => actual != expected,
        ConditionOperator::Contains => actual.contains(&expected),
        ConditionOperator::GreaterThan => {
            // unparsable operands become NaN, and NaN comparisons are false
            let left = actual.parse::<f64>().unwrap_or(f64::NAN);
            let right = expected.parse::<f64>().unwrap_or(f64::NAN);
            left > right
        }
        ConditionOperator::LessThan => {
            let left = actual.parse::<f64>().unwrap_or(f64::NAN);
            let right = expected.parse::<f64>().unwrap_or(f64::NAN);
            left < right
        }
        ConditionOperator::IsEmpty => actual.is_empty(),
        ConditionOperator::IsNotEmpty => !actual.is_empty(),
        ConditionOperator::Unknown => false,
    };
    trace!(%actual, %expected, %operator, result, "condition evaluated");
    result
}

/// Strict left fold over per-condition results. An empty list matches.
/// The first result seeds the accumulator (its own group is ignored);
/// each subsequent result combines with OR when its group is Or, AND
/// otherwise.
pub fn combine(results: &[(LogicalGroup, bool)]) -> bool {
    let mut iter = results.iter();
    let Some((_, first)) = iter.next() else {
        return true;
    };
    iter.fold(*first, |acc, (group, result)| match group {
        LogicalGroup::Or => acc || *result,
        LogicalGroup::And => acc && *result,
    })
}

/// Evaluate a policy's condition list against the current record.
/// Missing fields evaluate as Null, which coerces to the empty string.
pub fn match_conditions(conditions: &[PolicyCondition], record: &RecordData) -> bool {
    let results: Vec<(LogicalGroup, bool)> = conditions
        .iter()
        .map(|condition| {
            let actual = record
                .get(&condition.target_field_key)
                .cloned()
                .unwrap_or_default();
            (
                condition.logical_group,
                evaluate(
                    &actual,
                    condition.operator,
                    condition.comparison_value.as_deref(),
                ),
            )
        })
        .collect();
    combine(&results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_string_coercion_is_case_insensitive() {
        assert!(evaluate(
            &Value::String("Open".to_string()),
            ConditionOperator::Equals,
            Some("OPEN")
        ));
        assert!(evaluate(
            &Value::Boolean(true),
            ConditionOperator::Equals,
            Some("True")
        ));
        assert!(evaluate(
            &Value::Number(4.0),
            ConditionOperator::Equals,
            Some("4")
        ));
    }

    #[test]
    fn test_contains() {
        assert!(evaluate(
            &Value::String("high priority".to_string()),
            ConditionOperator::Contains,
            Some("Priority")
        ));
        assert!(!evaluate(
            &Value::Null,
            ConditionOperator::Contains,
            Some("x")
        ));
    }

    #[test]
    fn test_numeric_comparison_nan_is_false() {
        assert!(evaluate(
            &Value::String("10".to_string()),
            ConditionOperator::GreaterThan,
            Some("2")
        ));
        // unparsable either side: false for both operators, both ways round
        assert!(!evaluate(
            &Value::String("abc".to_string()),
            ConditionOperator::GreaterThan,
            Some("2")
        ));
        assert!(!evaluate(
            &Value::String("abc".to_string()),
            ConditionOperator::LessThan,
            Some("2")
        ));
        assert!(!evaluate(
            &Value::String("10".to_string()),
            ConditionOperator::GreaterThan,
            Some("abc")
        ));
    }

    #[test]
    fn test_is_empty_ignores_comparison_value() {
        for expected in [None, Some(""), Some("anything")] {
            assert!(evaluate(&Value::Null, ConditionOperator::IsEmpty, expected));
            assert!(!evaluate(
                &Value::String("x".to_string()),
                ConditionOperator::IsEmpty,
                expected
            ));
            assert!(evaluate(
                &Value::String("x".to_string()),
                ConditionOperator::IsNotEmpty,
                expected
            ));
        }
    }

    #[test]
    fn test_unknown_operator_is_false() {
        assert!(!evaluate(
            &Value::String("x".to_string()),
            ConditionOperator::Unknown,
            Some("x")
        ));
    }

    #[test]
    fn test_combine_empty_list_matches() {
        assert!(combine(&[]));
    }

    #[test]
    fn test_combine_is_a_left_fold_without_precedence() {
        // [And:true, Or:false, And:true] folds left to right: the seed is
        // true, (Or false) keeps true, (And true) keeps true.
        let results = [
            (LogicalGroup::And, true),
            (LogicalGroup::Or, false),
            (LogicalGroup::And, true),
        ];
        assert!(combine(&results));

        // ((true AND false) OR true) = true, not the conventional
        // precedence grouping true AND (false OR true).
        let results = [
            (LogicalGroup::And, true),
            (LogicalGroup::And, false),
            (LogicalGroup::Or, true),
        ];
        assert!(combine(&results));

        // no precedence: the trailing And applies to the accumulated Or
        // result, so ((true OR true) AND false) = false, where conventional
        // grouping true OR (true AND false) would be true.
        let results = [
            (LogicalGroup::And, true),
            (LogicalGroup::Or, true),
            (LogicalGroup::And, false),
        ];
        assert!(!combine(&results));
    }

    #[test]
    fn test_first_condition_group_is_ignored() {
        assert!(combine(&[(LogicalGroup::Or, true)]));
        assert!(!combine(&[(LogicalGroup::Or, false)]));
    }

    #[test]
    fn test_match_conditions_missing_field_is_empty() {
        let record = RecordData::new();
        let conditions = vec![PolicyCondition {
            target_field_key: "state".to_string(),
            operator: ConditionOperator::IsEmpty,
            comparison_value: None,
            logical_group: LogicalGroup::And,
        }];
        assert!(match_conditions(&conditions, &record));
    }

    proptest! {
        #[test]
        fn prop_non_numeric_ordering_is_always_false(
            actual in "[a-zA-Z_ ]{1,12}",
            expected in "[a-zA-Z_ ]{1,12}",
        ) {
            let actual = Value::String(actual);
            prop_assert!(!evaluate(&actual, ConditionOperator::GreaterThan, Some(&expected)));
            prop_assert!(!evaluate(&actual, ConditionOperator::LessThan, Some(&expected)));
        }

        #[test]
        fn prop_is_empty_depends_only_on_actual(
            actual in "[a-z0-9]{0,8}",
            expected in proptest::option::of("[a-z0-9]{0,8}"),
        ) {
            let value = Value::String(actual.clone());
            prop_assert_eq!(
                evaluate(&value, ConditionOperator::IsEmpty, expected.as_deref()),
                actual.is_empty()
            );
        }
    }
}
