//! # Sync Barrier
//!
//! Arrival table for `SYNC` steps, keyed by (stage, iteration, step).
//!
//! This is the only state shared between participant sessions. A barrier
//! releases once the expected number of distinct participants has arrived;
//! released slots stay released.

use crate::types::{ParticipantId, Position, SurveyError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Barrier slots are identified by the cursor position of the step.
pub type BarrierKey = Position;

/// Result of an arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BarrierStatus {
    Waiting { arrived: usize, expected: usize },
    Released,
}

/// Shared arrival counter for `SYNC` steps.
#[derive(Debug)]
pub struct SyncBarrier {
    expected: usize,
    slots: Mutex<BTreeMap<BarrierKey, BTreeSet<ParticipantId>>>,
}

impl SyncBarrier {
    /// Create a barrier expecting `expected` participants per slot (at least 1).
    #[must_use]
    pub fn new(expected: usize) -> Self {
        Self {
            expected: expected.max(1),
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Register an arrival. Arriving twice counts once.
    pub fn arrive(
        &self,
        key: BarrierKey,
        participant: &ParticipantId,
    ) -> Result<BarrierStatus, SurveyError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| SurveyError::LockPoisoned(e.to_string()))?;
        let arrivals = slots.entry(key).or_default();
        arrivals.insert(participant.clone());
        let arrived = arrivals.len();

        tracing::debug!(
            participant = %participant,
            stage = key.stage,
            iteration = key.iteration,
            step = key.step,
            arrived,
            expected = self.expected,
            "barrier arrival"
        );

        Ok(self.status(arrived))
    }

    /// Whether the slot has been released.
    pub fn is_released(&self, key: BarrierKey) -> Result<bool, SurveyError> {
        Ok(self.arrivals(key)? >= self.expected)
    }

    /// Current status of a slot without arriving.
    pub fn poll(&self, key: BarrierKey) -> Result<BarrierStatus, SurveyError> {
        Ok(self.status(self.arrivals(key)?))
    }

    /// Number of distinct participants that arrived at the slot.
    pub fn arrivals(&self, key: BarrierKey) -> Result<usize, SurveyError> {
        let slots = self
            .slots
            .lock()
            .map_err(|e| SurveyError::LockPoisoned(e.to_string()))?;
        Ok(slots.get(&key).map_or(0, BTreeSet::len))
    }

    fn status(&self, arrived: usize) -> BarrierStatus {
        if arrived >= self.expected {
            BarrierStatus::Released
        } else {
            BarrierStatus::Waiting {
                arrived,
                expected: self.expected,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn releases_on_nth_arrival() {
        let barrier = SyncBarrier::new(3);
        let key = Position::new(1, 0, 2);

        assert_eq!(
            barrier.arrive(key, &ParticipantId::new("p1")),
            Ok(BarrierStatus::Waiting {
                arrived: 1,
                expected: 3
            })
        );
        barrier.arrive(key, &ParticipantId::new("p2")).expect("p2");
        assert_eq!(barrier.is_released(key), Ok(false));
        assert_eq!(
            barrier.arrive(key, &ParticipantId::new("p3")),
            Ok(BarrierStatus::Released)
        );
        assert_eq!(barrier.is_released(key), Ok(true));
    }

    #[test]
    fn repeated_arrival_counts_once() {
        let barrier = SyncBarrier::new(2);
        let key = Position::new(0, 0, 0);
        let p1 = ParticipantId::new("p1");
        barrier.arrive(key, &p1).expect("first");
        barrier.arrive(key, &p1).expect("again");
        assert_eq!(barrier.arrivals(key), Ok(1));
    }

    #[test]
    fn slots_are_independent_per_iteration() {
        let barrier = SyncBarrier::new(1);
        barrier
            .arrive(Position::new(2, 0, 0), &ParticipantId::new("p1"))
            .expect("arrive");
        assert_eq!(barrier.is_released(Position::new(2, 1, 0)), Ok(false));
    }

    #[test]
    fn shared_across_threads() {
        let barrier = Arc::new(SyncBarrier::new(4));
        let key = Position::new(0, 0, 0);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier
                        .arrive(key, &ParticipantId::new(format!("p{i}")))
                        .expect("arrive")
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(barrier.poll(key), Ok(BarrierStatus::Released));
    }
}
