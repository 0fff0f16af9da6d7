//! # Definition Registry
//!
//! Holds the ordered stages of an experiment and their ordered steps.
//!
//! The registry is built once at startup through [`RegistryBuilder`] and is
//! read-only afterwards. `build()` rejects every structural problem before
//! any session starts:
//!
//! - stage, step or field name collisions (`DuplicateName`)
//! - reveal targets, skip operands or flags that do not exist (`UnknownReference`)
//! - zero repeats, empty choice lists, impossible selection counts (`InvalidDefinition`)
//!
//! A stage registered without steps gets one implicit empty step named after
//! the stage, so instruction and end screens need no step boilerplate.

use crate::definition::{
    FieldKind, Operand, SkipPredicate, StageDefinition, StageOptions, StepDefinition,
    SurveyDefinition,
};
use crate::primitives::{MAX_FIELDS_PER_STEP, MAX_NAME_LENGTH, MAX_STAGE_REPEAT};
use crate::types::{Position, StepRule, SurveyError};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// REGISTRY
// =============================================================================

/// Immutable, validated survey definition.
#[derive(Debug, Clone)]
pub struct DefinitionRegistry {
    name: String,
    default_rule: StepRule,
    stages: Vec<StageDefinition>,
    stage_index: BTreeMap<String, usize>,
    step_index: BTreeMap<String, (usize, usize)>,
}

impl DefinitionRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> RegistryBuilder {
        RegistryBuilder::new(name)
    }

    /// Build a registry from a definition document.
    pub fn from_definition(definition: SurveyDefinition) -> Result<Self, SurveyError> {
        let mut builder = RegistryBuilder::new(definition.name);
        builder.default_rule(definition.default_rule);
        for stage in definition.stages {
            builder.register_stage(stage.name, stage.steps, stage.options)?;
        }
        builder.build()
    }

    /// Survey name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a stage by name.
    #[must_use]
    pub fn get_stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stage_index.get(name).map(|&i| &self.stages[i])
    }

    /// Stages in execution order.
    #[must_use]
    pub fn stages_in_order(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Stage at an index.
    #[must_use]
    pub fn stage_at(&self, index: usize) -> Option<&StageDefinition> {
        self.stages.get(index)
    }

    /// Number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Look up a step by its game-wide unique name.
    #[must_use]
    pub fn get_step(&self, name: &str) -> Option<&StepDefinition> {
        self.step_index
            .get(name)
            .map(|&(stage, step)| &self.stages[stage].steps[step])
    }

    /// Stage name of the stage owning a step.
    #[must_use]
    pub fn stage_of(&self, step_name: &str) -> Option<&str> {
        self.step_index
            .get(step_name)
            .map(|&(stage, _)| self.stages[stage].name.as_str())
    }

    /// Step at a cursor position.
    #[must_use]
    pub fn step_at(&self, position: Position) -> Option<&StepDefinition> {
        self.stages
            .get(position.stage)
            .and_then(|stage| stage.steps.get(position.step))
    }

    /// Effective step rule: step setting, then stage setting, then registry default.
    #[must_use]
    pub fn rule_for(&self, position: Position) -> StepRule {
        let Some(stage) = self.stages.get(position.stage) else {
            return self.default_rule;
        };
        stage
            .steps
            .get(position.step)
            .and_then(|step| step.rule)
            .or(stage.options.rule)
            .unwrap_or(self.default_rule)
    }

    /// Total number of step visits when nothing is skipped (repeats expanded).
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.stages
            .iter()
            .map(|stage| stage.steps.len().saturating_mul(stage.repeat() as usize))
            .sum()
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Collects stages and validates them into a [`DefinitionRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    name: String,
    default_rule: StepRule,
    stages: Vec<StageDefinition>,
    stage_names: BTreeSet<String>,
    step_names: BTreeSet<String>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the rule used by steps that do not set one (default `SOLO`).
    pub fn default_rule(&mut self, rule: StepRule) -> &mut Self {
        self.default_rule = rule;
        self
    }

    /// Append a stage. Names are checked immediately.
    pub fn register_stage(
        &mut self,
        name: impl Into<String>,
        steps: Vec<StepDefinition>,
        options: StageOptions,
    ) -> Result<&mut Self, SurveyError> {
        let name = name.into();
        check_name("stage", &name)?;
        if self.stage_names.contains(&name) {
            return Err(SurveyError::DuplicateName(format!("stage '{}'", name)));
        }

        let steps = if steps.is_empty() {
            vec![StepDefinition::new(name.clone())]
        } else {
            steps
        };

        let mut local = BTreeSet::new();
        for step in &steps {
            check_name("step", &step.name)?;
            if self.step_names.contains(&step.name) || !local.insert(step.name.clone()) {
                return Err(SurveyError::DuplicateName(format!("step '{}'", step.name)));
            }
            check_fields(step)?;
        }

        self.step_names.extend(local);
        self.stage_names.insert(name.clone());
        self.stages.push(StageDefinition {
            name,
            steps,
            options,
        });
        Ok(self)
    }

    /// Validate cross references and freeze the registry.
    pub fn build(self) -> Result<DefinitionRegistry, SurveyError> {
        if self.stages.is_empty() {
            return Err(SurveyError::InvalidDefinition(
                "survey has no stages".to_string(),
            ));
        }

        let mut stage_index = BTreeMap::new();
        let mut step_index = BTreeMap::new();
        let mut flags = BTreeSet::new();

        for (i, stage) in self.stages.iter().enumerate() {
            stage_index.insert(stage.name.clone(), i);
            for (j, step) in stage.steps.iter().enumerate() {
                step_index.insert(step.name.clone(), (i, j));
                flags.extend(step.fields.iter().filter_map(|f| f.flag.clone()));
            }
        }

        for stage in &self.stages {
            let repeat = stage.repeat();
            if repeat == 0 || repeat > MAX_STAGE_REPEAT {
                return Err(SurveyError::InvalidDefinition(format!(
                    "stage '{}' repeat must be between 1 and {}, got {}",
                    stage.name, MAX_STAGE_REPEAT, repeat
                )));
            }
            if let Some(predicate) = &stage.options.skip_when {
                check_predicate(&self.stages, &step_index, &flags, predicate, &stage.name)?;
            }
            for step in &stage.steps {
                if let Some(predicate) = &step.skip_when {
                    check_predicate(&self.stages, &step_index, &flags, predicate, &step.name)?;
                }
            }
        }

        tracing::debug!(
            survey = %self.name,
            stages = self.stages.len(),
            steps = step_index.len(),
            "definition registry built"
        );

        Ok(DefinitionRegistry {
            name: self.name,
            default_rule: self.default_rule,
            stages: self.stages,
            stage_index,
            step_index,
        })
    }
}

// =============================================================================
// VALIDATION HELPERS
// =============================================================================

fn check_name(what: &str, name: &str) -> Result<(), SurveyError> {
    if name.trim().is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(SurveyError::InvalidDefinition(format!(
            "{} name must be 1..={} bytes: '{}'",
            what, MAX_NAME_LENGTH, name
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(SurveyError::InvalidDefinition(format!(
            "{} name contains a control character: {:?}",
            what, name
        )));
    }
    Ok(())
}

/// Field ids, reveal targets and kind constraints inside one step.
fn check_fields(step: &StepDefinition) -> Result<(), SurveyError> {
    if step.fields.len() > MAX_FIELDS_PER_STEP {
        return Err(SurveyError::InvalidDefinition(format!(
            "step '{}' has more than {} fields",
            step.name, MAX_FIELDS_PER_STEP
        )));
    }

    let mut ids = BTreeSet::new();
    for field in &step.fields {
        check_name("field", &field.id)?;
        if !ids.insert(field.id.as_str()) {
            return Err(SurveyError::DuplicateName(format!(
                "field '{}' in step '{}'",
                field.id, step.name
            )));
        }
    }

    for field in &step.fields {
        for rule in &field.reveal {
            for target in &rule.targets {
                if !ids.contains(target.as_str()) {
                    return Err(SurveyError::UnknownReference(format!(
                        "reveal rule of '{}.{}' targets unknown field '{}'",
                        step.name, field.id, target
                    )));
                }
            }
        }

        match &field.kind {
            FieldKind::Choice {
                choices,
                select_multiple,
            } => {
                if choices.is_empty() {
                    return Err(SurveyError::InvalidDefinition(format!(
                        "choice field '{}.{}' has no choices",
                        step.name, field.id
                    )));
                }
                let max = select_multiple.unwrap_or(1);
                if let Some(n) = field.required.exact_count()
                    && (n == 0 || n > max || n as usize > choices.len())
                {
                    return Err(SurveyError::InvalidDefinition(format!(
                        "field '{}.{}' requires {} selections but allows {}",
                        step.name, field.id, n, max
                    )));
                }
            }
            FieldKind::Integer {
                min: Some(min),
                max: Some(max),
            } if min > max => {
                return Err(SurveyError::InvalidDefinition(format!(
                    "integer field '{}.{}' has min {} > max {}",
                    step.name, field.id, min, max
                )));
            }
            _ => {
                if field.required.exact_count() == Some(0) {
                    return Err(SurveyError::InvalidDefinition(format!(
                        "field '{}.{}' requires 0 selections",
                        step.name, field.id
                    )));
                }
            }
        }
    }
    Ok(())
}

fn check_predicate(
    stages: &[StageDefinition],
    step_index: &BTreeMap<String, (usize, usize)>,
    flags: &BTreeSet<String>,
    predicate: &SkipPredicate,
    owner: &str,
) -> Result<(), SurveyError> {
    match &predicate.operand {
        Operand::Field { step, field } => {
            let Some(&(i, j)) = step_index.get(step) else {
                return Err(SurveyError::UnknownReference(format!(
                    "skip predicate of '{}' references unknown step '{}'",
                    owner, step
                )));
            };
            if stages[i].steps[j].get_field(field).is_none() {
                return Err(SurveyError::UnknownReference(format!(
                    "skip predicate of '{}' references unknown field '{}.{}'",
                    owner, step, field
                )));
            }
        }
        Operand::Flag(flag) => {
            if !flags.contains(flag) {
                return Err(SurveyError::UnknownReference(format!(
                    "skip predicate of '{}' references undeclared flag '{}'",
                    owner, flag
                )));
            }
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
