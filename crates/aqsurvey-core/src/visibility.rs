//! # Field Visibility Resolver
//!
//! Computes which fields of a step are live given the values entered so far.
//!
//! Resolution is a single pass in field-declaration order:
//!
//! 1. Every field starts at its initial visibility (`hidden = false` ⇒ shown).
//! 2. For each field carrying reveal rules, each rule whose condition the
//!    field's value satisfies shows or hides its targets. A rule that does
//!    not match leaves its targets alone.
//! 3. A rule whose trigger field is hidden at that moment does not fire.
//!    Targets then keep their initial visibility, which collapses cascades
//!    (A reveals B, B reveals C) when A changes, even if B still holds a
//!    stale draft.
//!
//! Later matching rules override earlier ones. The function is pure: no
//! counters, no caches, the same input always yields the same set.

use crate::definition::StepDefinition;
use crate::types::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered set of visible field ids (declaration order).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VisibleFields(Vec<String>);

impl VisibleFields {
    /// Whether a field is visible.
    #[must_use]
    pub fn contains(&self, field_id: &str) -> bool {
        self.0.iter().any(|id| id == field_id)
    }

    /// Visible ids in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the underlying ids.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

/// Resolve the visible fields of `step` given `responses` keyed by field id.
#[must_use]
pub fn visible_fields(step: &StepDefinition, responses: &BTreeMap<String, FieldValue>) -> VisibleFields {
    let mut shown: BTreeMap<&str, bool> = step
        .fields
        .iter()
        .map(|f| (f.id.as_str(), !f.hidden))
        .collect();

    for field in &step.fields {
        if field.reveal.is_empty() {
            continue;
        }
        let active = shown.get(field.id.as_str()).copied().unwrap_or(false);
        let value = responses.get(&field.id);

        if !active {
            continue;
        }

        for rule in field.reveal.iter().filter(|r| r.when.matches(value)) {
            for target in &rule.targets {
                if let Some(slot) = shown.get_mut(target.as_str()) {
                    *slot = rule.action.visibility();
                }
            }
        }
    }

    VisibleFields(
        step.fields
            .iter()
            .filter(|f| shown.get(f.id.as_str()).copied().unwrap_or(false))
            .map(|f| f.id.clone())
            .collect(),
    )
}

// =============================================================================
// TESTS
// =============================================================================
