//! # Bonus Calculator
//!
//! Read-only consumer of a participant's records computing a payment amount.
//!
//! Amounts are integer cents; there is no floating-point anywhere on the path
//! from records to the formatted figure.

use crate::recorder::ResponseRecord;
use crate::types::ParticipantId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A computed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BonusAmount {
    pub participant_id: ParticipantId,
    pub cents: u64,
    /// Distinct (stage, iteration, step) visits with at least one record.
    pub steps_answered: usize,
    pub complete: bool,
}

impl BonusAmount {
    /// `cents` rendered as `units.cc`.
    #[must_use]
    pub fn formatted(&self) -> String {
        format!("{}.{:02}", self.cents / 100, self.cents % 100)
    }
}

/// Turns records into a payment amount.
pub trait BonusPolicy {
    fn compute(
        &self,
        participant: &ParticipantId,
        records: &[ResponseRecord],
        complete: bool,
    ) -> BonusAmount;
}

/// Fixed completion fee plus a per-answered-step amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatBonus {
    #[serde(default)]
    pub completion_cents: u64,
    #[serde(default)]
    pub per_step_cents: u64,
}

impl FlatBonus {
    #[must_use]
    pub const fn new(completion_cents: u64, per_step_cents: u64) -> Self {
        Self {
            completion_cents,
            per_step_cents,
        }
    }
}

impl BonusPolicy for FlatBonus {
    fn compute(
        &self,
        participant: &ParticipantId,
        records: &[ResponseRecord],
        complete: bool,
    ) -> BonusAmount {
        let steps: BTreeSet<(&str, u32, &str)> = records
            .iter()
            .filter(|r| &r.participant_id == participant)
            .map(|r| (r.stage.as_str(), r.iteration, r.step.as_str()))
            .collect();
        let steps_answered = steps.len();

        let per_step = self
            .per_step_cents
            .saturating_mul(u64::try_from(steps_answered).unwrap_or(u64::MAX));
        let cents = if complete {
            per_step.saturating_add(self.completion_cents)
        } else {
            per_step
        };

        BonusAmount {
            participant_id: participant.clone(),
            cents,
            steps_answered,
            complete,
        }
    }
}
