//! # Validation & Completion Gate
//!
//! Decides whether a step's answers satisfy its required contract.
//!
//! Fields are checked in declaration order and the first failure is returned,
//! so the rendering layer can point the participant at one field at a time.
//! Fields outside the visible set are exempt regardless of their required
//! flag.

use crate::definition::{FieldDefinition, FieldKind, StepDefinition};
use crate::types::{FieldValue, SurveyError};
use crate::visibility::VisibleFields;
use std::collections::{BTreeMap, BTreeSet};

/// Check a step's answers.
///
/// - `required = true`: a non-empty value.
/// - `required = N`: exactly N selections (fewer ⇒ `MissingField`, more ⇒ `InvalidValue`).
/// - Any visible value present must also fit its field kind.
pub fn is_step_complete(
    step: &StepDefinition,
    responses: &BTreeMap<String, FieldValue>,
    visible: &VisibleFields,
) -> Result<(), SurveyError> {
    for field in &step.fields {
        if !visible.contains(&field.id) {
            continue;
        }
        let value = responses.get(&field.id).filter(|v| !v.is_empty());

        if let Some(n) = field.required.exact_count() {
            let count = value.map_or(0, FieldValue::selection_count);
            if count < n as usize {
                return Err(missing(field));
            }
            if count > n as usize {
                return Err(invalid(
                    field,
                    format!("expected exactly {} selections, got {}", n, count),
                ));
            }
        } else if field.required.is_required() && value.is_none() {
            return Err(missing(field));
        }

        if let Some(value) = value {
            check_kind(field, value)?;
        }
    }
    Ok(())
}

/// Check one value against its field kind.
pub fn check_kind(field: &FieldDefinition, value: &FieldValue) -> Result<(), SurveyError> {
    match &field.kind {
        FieldKind::Text => match value {
            FieldValue::Single(_) => Ok(()),
            FieldValue::Multiple(_) => Err(invalid(field, "expected a single text value".into())),
        },
        FieldKind::Integer { min, max } => {
            let FieldValue::Single(raw) = value else {
                return Err(invalid(field, "expected a single number".into()));
            };
            let number: i64 = raw
                .trim()
                .parse()
                .map_err(|_| invalid(field, format!("'{}' is not a whole number", raw.trim())))?;
            if let Some(min) = min
                && number < *min
            {
                return Err(invalid(field, format!("{} is below the minimum {}", number, min)));
            }
            if let Some(max) = max
                && number > *max
            {
                return Err(invalid(field, format!("{} is above the maximum {}", number, max)));
            }
            Ok(())
        }
        FieldKind::Choice {
            choices,
            select_multiple,
        } => {
            let mut seen = BTreeSet::new();
            if let Some(repeated) = value.selections().find(|s| !seen.insert(*s)) {
                return Err(invalid(field, format!("'{}' is selected more than once", repeated)));
            }
            let limit = select_multiple.unwrap_or(1) as usize;
            let count = value.selection_count();
            if count > limit {
                return Err(invalid(
                    field,
                    format!("at most {} selections allowed, got {}", limit, count),
                ));
            }
            if let Some(unknown) = value.selections().find(|s| !choices.iter().any(|c| c == s)) {
                return Err(invalid(field, format!("'{}' is not one of the choices", unknown)));
            }
            Ok(())
        }
    }
}

fn missing(field: &FieldDefinition) -> SurveyError {
    SurveyError::MissingField {
        field_id: field.id.clone(),
    }
}

fn invalid(field: &FieldDefinition, reason: String) -> SurveyError {
    SurveyError::InvalidValue {
        field_id: field.id.clone(),
        reason,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Condition, RevealRule};
    use crate::visibility::visible_fields;

    fn check(step: &StepDefinition, pairs: &[(&str, FieldValue)]) -> Result<(), SurveyError> {
        let responses: BTreeMap<String, FieldValue> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        let visible = visible_fields(step, &responses);
        is_step_complete(step, &responses, &visible)
    }

    fn problems_step() -> StepDefinition {
        StepDefinition::new("q4")
            .field(
                FieldDefinition::choice(
                    "q4_1",
                    ["Poverty", "Poor sanitation", "Terrorism", "Corruption"],
                )
                .select_multiple(2)
                .require_exactly(2),
            )
            .field(FieldDefinition::text("q4_2").required())
    }

    #[test]
    fn exactly_two_selections() {
        let step = problems_step();
        let other = ("q4_2", FieldValue::single("Nothing"));

        let none = check(&step, &[other.clone()]);
        assert_eq!(
            none,
            Err(SurveyError::MissingField {
                field_id: "q4_1".into()
            })
        );

        let one = check(&step, &[("q4_1", FieldValue::multiple(["Poverty"])), other.clone()]);
        assert!(matches!(one, Err(SurveyError::MissingField { .. })));

        let two = check(
            &step,
            &[("q4_1", FieldValue::multiple(["Poverty", "Terrorism"])), other],
        );
        assert_eq!(two, Ok(()));
    }

    #[test]
    fn repeated_choice_does_not_fill_exact_count() {
        let step = problems_step();
        let other = ("q4_2", FieldValue::single("Nothing"));

        let doubled = check(
            &step,
            &[("q4_1", FieldValue::multiple(["Poverty", "Poverty"])), other],
        );
        assert_eq!(
            doubled,
            Err(SurveyError::MissingField {
                field_id: "q4_1".into()
            })
        );
    }

    #[test]
    fn repeated_choice_rejected_by_kind() {
        let field = FieldDefinition::choice("q1_1", ["English", "Hindi"]).select_multiple(2);
        let err = check_kind(&field, &FieldValue::multiple(["Hindi", "Hindi"]))
            .expect_err("duplicate selection");
        assert!(matches!(err, SurveyError::InvalidValue { ref field_id, .. } if field_id == "q1_1"));
    }

    #[test]
    fn first_missing_in_declaration_order() {
        let err = check(&problems_step(), &[]).expect_err("incomplete");
        assert_eq!(
            err,
            SurveyError::MissingField {
                field_id: "q4_1".into()
            }
        );
    }

    #[test]
    fn hidden_required_field_is_exempt() {
        let step = StepDefinition::new("q8")
            .field(
                FieldDefinition::choice("q8_4", ["No", "Yes"])
                    .required()
                    .reveal(RevealRule::show(Condition::Equals("Yes".into()), ["q8_5"])),
            )
            .field(FieldDefinition::text("q8_5").hidden().required());

        assert_eq!(check(&step, &[("q8_4", FieldValue::single("No"))]), Ok(()));
        assert_eq!(
            check(&step, &[("q8_4", FieldValue::single("Yes"))]),
            Err(SurveyError::MissingField {
                field_id: "q8_5".into()
            })
        );
    }

    #[test]
    fn integer_bounds() {
        let step =
            StepDefinition::new("q2").field(FieldDefinition::integer("q2_1", Some(1900), Some(2020)).required());

        assert_eq!(check(&step, &[("q2_1", FieldValue::single("1987"))]), Ok(()));
        assert!(matches!(
            check(&step, &[("q2_1", FieldValue::single("1850"))]),
            Err(SurveyError::InvalidValue { .. })
        ));
        assert!(matches!(
            check(&step, &[("q2_1", FieldValue::single("nineteen"))]),
            Err(SurveyError::InvalidValue { .. })
        ));
    }

    #[test]
    fn unknown_choice_rejected() {
        let step = StepDefinition::new("q2").field(FieldDefinition::choice("q2_1", ["Rural", "Urban"]));
        assert!(matches!(
            check(&step, &[("q2_1", FieldValue::single("Suburban"))]),
            Err(SurveyError::InvalidValue { .. })
        ));
    }

    #[test]
    fn too_many_selections_rejected() {
        let step = StepDefinition::new("q2")
            .field(FieldDefinition::choice("q2_1", ["a", "b", "c"]).select_multiple(2));
        assert!(matches!(
            check(&step, &[("q2_1", FieldValue::multiple(["a", "b", "c"]))]),
            Err(SurveyError::InvalidValue { .. })
        ));
    }

    #[test]
    fn optional_empty_field_passes() {
        let step = StepDefinition::new("q3").field(FieldDefinition::text("q3_4"));
        assert_eq!(check(&step, &[("q3_4", FieldValue::single("  "))]), Ok(()));
    }
}
