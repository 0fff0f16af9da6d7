//! # Survey Definitions
//!
//! Declarative description of an experiment: stages, steps, fields, reveal
//! rules and skip predicates.
//!
//! Every type here derives `Deserialize`, so a survey variant is a TOML or
//! JSON document rather than code. Conditional behavior is expressed as data:
//!
//! - A [`RevealRule`] on a field shows or hides other fields of the same step
//!   depending on the field's own value.
//! - A [`SkipPredicate`] on a step or stage bypasses it depending on answers
//!   committed earlier or on participant flags.

use crate::types::{FieldValue, Required, StepRule};
use serde::{Deserialize, Serialize};

// =============================================================================
// CONDITION
// =============================================================================

/// A predicate over one field value.
///
/// A missing or empty value never satisfies a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Single value equal to the given text, or a multi-select whose only
    /// selection is the given text.
    Equals(String),
    /// At least one selection is in the set.
    AnyOf(Vec<String>),
    /// No selection is in the set.
    NoneOf(Vec<String>),
    /// The given choice is among the selections.
    Includes(String),
    /// Exactly this many selections.
    SelectedCount(u32),
    /// Any non-empty value.
    NotEmpty,
}

impl Condition {
    /// Evaluate the condition against a value.
    #[must_use]
    pub fn matches(&self, value: Option<&FieldValue>) -> bool {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            return false;
        };

        match self {
            Condition::Equals(expected) => {
                value.selection_count() == 1 && value.includes(expected)
            }
            Condition::AnyOf(set) => value.selections().any(|s| set.iter().any(|e| e == s)),
            Condition::NoneOf(set) => !value.selections().any(|s| set.iter().any(|e| e == s)),
            Condition::Includes(choice) => value.includes(choice),
            Condition::SelectedCount(n) => value.selection_count() == *n as usize,
            Condition::NotEmpty => true,
        }
    }
}

// =============================================================================
// REVEAL RULES
// =============================================================================

/// What a matching reveal rule does to its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RevealAction {
    #[default]
    Show,
    Hide,
}

impl RevealAction {
    /// Visibility a matching rule gives its targets.
    #[must_use]
    pub fn visibility(self) -> bool {
        matches!(self, RevealAction::Show)
    }
}

/// Conditional visibility rule, owned by the triggering field.
///
/// A rule only acts when its trigger is visible and matches. Otherwise its
/// targets keep whatever visibility they had.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealRule {
    pub when: Condition,
    pub targets: Vec<String>,
    #[serde(default)]
    pub action: RevealAction,
}

impl RevealRule {
    /// Show `targets` when the trigger value satisfies `when`.
    #[must_use]
    pub fn show<I, S>(when: Condition, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            when,
            targets: targets.into_iter().map(Into::into).collect(),
            action: RevealAction::Show,
        }
    }

    /// Hide `targets` when the trigger value satisfies `when`.
    #[must_use]
    pub fn hide<I, S>(when: Condition, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            when,
            targets: targets.into_iter().map(Into::into).collect(),
            action: RevealAction::Hide,
        }
    }
}

// =============================================================================
// SKIP PREDICATES
// =============================================================================

/// What a skip predicate looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// The latest committed value of a field of an earlier step.
    Field { step: String, field: String },
    /// A derived participant flag.
    Flag(String),
}

/// Accumulated participant state a skip predicate is evaluated against.
pub trait SkipContext {
    /// Resolve an operand to its current value, if any.
    fn resolve(&self, operand: &Operand) -> Option<&FieldValue>;
}

/// Bypass a step (or a whole stage) when the operand satisfies the condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipPredicate {
    pub operand: Operand,
    pub when: Condition,
}

impl SkipPredicate {
    /// Skip when the given flag satisfies `when`.
    #[must_use]
    pub fn on_flag(flag: impl Into<String>, when: Condition) -> Self {
        Self {
            operand: Operand::Flag(flag.into()),
            when,
        }
    }

    /// Skip when a committed field satisfies `when`.
    #[must_use]
    pub fn on_field(step: impl Into<String>, field: impl Into<String>, when: Condition) -> Self {
        Self {
            operand: Operand::Field {
                step: step.into(),
                field: field.into(),
            },
            when,
        }
    }

    /// Evaluate against participant state.
    #[must_use]
    pub fn evaluate(&self, ctx: &dyn SkipContext) -> bool {
        self.when.matches(ctx.resolve(&self.operand))
    }
}

// =============================================================================
// FIELD DEFINITION
// =============================================================================

/// The input widget behind a field, as far as validation is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text.
    #[default]
    Text,
    /// Whole number, optionally bounded (inclusive).
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    /// Choice table. `select_multiple` caps the number of selections;
    /// without it only one selection is allowed.
    Choice {
        choices: Vec<String>,
        #[serde(default)]
        select_multiple: Option<u32>,
    },
}

/// One question or input of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: Required,
    /// Initially hidden; only a reveal rule can show it.
    #[serde(default)]
    pub hidden: bool,
    /// Rules triggered by this field's value, applied in order.
    #[serde(default)]
    pub reveal: Vec<RevealRule>,
    /// Store the committed value under this participant flag.
    #[serde(default)]
    pub flag: Option<String>,
}

impl FieldDefinition {
    /// A free-text field, shown and optional.
    #[must_use]
    pub fn text(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: FieldKind::Text,
            required: Required::Flag(false),
            hidden: false,
            reveal: Vec::new(),
            flag: None,
        }
    }

    /// An integer field with inclusive bounds.
    #[must_use]
    pub fn integer(id: impl Into<String>, min: Option<i64>, max: Option<i64>) -> Self {
        Self {
            kind: FieldKind::Integer { min, max },
            ..Self::text(id)
        }
    }

    /// A single-selection choice table.
    #[must_use]
    pub fn choice<I, S>(id: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: FieldKind::Choice {
                choices: choices.into_iter().map(Into::into).collect(),
                select_multiple: None,
            },
            ..Self::text(id)
        }
    }

    /// Allow up to `max` selections (choice fields only).
    #[must_use]
    pub fn select_multiple(mut self, max: u32) -> Self {
        if let FieldKind::Choice {
            select_multiple, ..
        } = &mut self.kind
        {
            *select_multiple = Some(max);
        }
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = Required::Flag(true);
        self
    }

    /// Require exactly `n` selections.
    #[must_use]
    pub fn require_exactly(mut self, n: u32) -> Self {
        self.required = Required::Exactly(n);
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    #[must_use]
    pub fn reveal(mut self, rule: RevealRule) -> Self {
        self.reveal.push(rule);
        self
    }

    #[must_use]
    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.flag = Some(name.into());
        self
    }
}

// =============================================================================
// STEP DEFINITION
// =============================================================================

/// A single page of interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    /// Overrides the stage/registry default when set.
    #[serde(default)]
    pub rule: Option<StepRule>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub skip_when: Option<SkipPredicate>,
}

impl StepDefinition {
    /// A step with no fields (an instructions or end screen).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rule: None,
            fields: Vec::new(),
            skip_when: None,
        }
    }

    #[must_use]
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn rule(mut self, rule: StepRule) -> Self {
        self.rule = Some(rule);
        self
    }

    #[must_use]
    pub fn skip_when(mut self, predicate: SkipPredicate) -> Self {
        self.skip_when = Some(predicate);
        self
    }

    /// Look up a field by id.
    #[must_use]
    pub fn get_field(&self, id: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.id == id)
    }
}

// =============================================================================
// STAGE DEFINITION
// =============================================================================

fn default_repeat() -> u32 {
    1
}

/// Optional stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOptions {
    /// Number of times the stage's steps are run.
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    /// Default step rule for the stage's steps.
    #[serde(default)]
    pub rule: Option<StepRule>,
    /// Bypass the whole stage, evaluated on entry.
    #[serde(default)]
    pub skip_when: Option<SkipPredicate>,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            repeat: default_repeat(),
            rule: None,
            skip_when: None,
        }
    }
}

impl StageOptions {
    #[must_use]
    pub fn repeat(mut self, times: u32) -> Self {
        self.repeat = times;
        self
    }

    #[must_use]
    pub fn rule(mut self, rule: StepRule) -> Self {
        self.rule = Some(rule);
        self
    }

    #[must_use]
    pub fn skip_when(mut self, predicate: SkipPredicate) -> Self {
        self.skip_when = Some(predicate);
        self
    }
}

/// A top-level phase of the experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(flatten)]
    pub options: StageOptions,
}

impl StageDefinition {
    /// Number of iterations of the stage.
    #[must_use]
    pub fn repeat(&self) -> u32 {
        self.options.repeat
    }

    /// Look up a step of this stage by name.
    #[must_use]
    pub fn get_step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }
}

// =============================================================================
// SURVEY DEFINITION DOCUMENT
// =============================================================================

/// A complete survey variant as loaded from a TOML or JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyDefinition {
    pub name: String,
    /// Step rule for steps and stages that do not set one.
    #[serde(default)]
    pub default_rule: StepRule,
    #[serde(default)]
    pub stages: Vec<StageDefinition>,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Flags(BTreeMap<String, FieldValue>);

    impl SkipContext for Flags {
        fn resolve(&self, operand: &Operand) -> Option<&FieldValue> {
            match operand {
                Operand::Flag(name) => self.0.get(name),
                Operand::Field { .. } => None,
            }
        }
    }

    #[test]
    fn missing_value_matches_nothing() {
        assert!(!Condition::NotEmpty.matches(None));
        assert!(!Condition::NoneOf(vec!["Yes".into()]).matches(None));
        assert!(!Condition::Equals("".into()).matches(Some(&FieldValue::single(""))));
    }

    #[test]
    fn equals_on_single_and_multiple() {
        let yes = FieldValue::single("Yes");
        assert!(Condition::Equals("Yes".into()).matches(Some(&yes)));
        assert!(!Condition::Equals("No".into()).matches(Some(&yes)));

        let two = FieldValue::multiple(["English", "Hindi"]);
        assert!(!Condition::Equals("English".into()).matches(Some(&two)));
        assert!(Condition::Includes("Hindi".into()).matches(Some(&two)));
        assert!(Condition::SelectedCount(2).matches(Some(&two)));
    }

    #[test]
    fn any_of_and_none_of() {
        let value = FieldValue::multiple(["Wood", "Other"]);
        assert!(Condition::AnyOf(vec!["Other".into(), "Coal".into()]).matches(Some(&value)));
        assert!(!Condition::NoneOf(vec!["Other".into()]).matches(Some(&value)));
        assert!(Condition::NoneOf(vec!["Gas".into()]).matches(Some(&value)));
    }

    #[test]
    fn reveal_action_visibility() {
        assert!(RevealAction::Show.visibility());
        assert!(!RevealAction::Hide.visibility());
    }

    #[test]
    fn skip_predicate_on_flag() {
        let mut flags = BTreeMap::new();
        flags.insert("is_employed".to_string(), FieldValue::single("No"));
        let ctx = Flags(flags);

        let skip = SkipPredicate::on_flag("is_employed", Condition::Equals("No".into()));
        assert!(skip.evaluate(&ctx));

        let other = SkipPredicate::on_flag("smoker", Condition::NotEmpty);
        assert!(!other.evaluate(&ctx));
    }

    #[test]
    fn field_builder() {
        let field = FieldDefinition::choice("q4_1", ["Poverty", "Terrorism", "Corruption"])
            .select_multiple(2)
            .require_exactly(2);
        assert_eq!(field.required, Required::Exactly(2));
        assert!(matches!(
            field.kind,
            FieldKind::Choice {
                select_multiple: Some(2),
                ..
            }
        ));
    }

    #[test]
    fn stage_definition_from_json() {
        let json = r#"{
            "name": "guessing",
            "repeat": 3,
            "steps": [
                { "name": "guess", "fields": [
                    { "id": "guess_value", "kind": { "type": "integer", "min": 0, "max": 100 }, "required": true }
                ]}
            ]
        }"#;
        let stage: StageDefinition = serde_json::from_str(json).expect("parse");
        assert_eq!(stage.repeat(), 3);
        assert_eq!(stage.steps[0].fields[0].required, Required::Flag(true));
        assert!(stage.get_step("guess").is_some());
    }
}
