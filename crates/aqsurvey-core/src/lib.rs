//! # aqsurvey-core
//!
//! The stage/step progression engine for aqsurvey - THE LOGIC.
//!
//! A survey experiment is a finite sequence of named stages, each an ordered
//! sequence of steps. This crate decides, for every participant, which step
//! is on screen, which of its fields are visible, whether its answers are
//! complete, and where the participant goes next.
//!
//! ## Layers
//!
//! - `definition` / `registry`: declarative survey description, validated once
//! - `visibility`: reveal rules resolved as a pure function of the answers
//! - `validation`: the completion gate for a step
//! - `cursor`: position, skipping, repeats and rewind
//! - `barrier`: arrival table for `SYNC` steps
//! - `recorder` / `storage` / `formats`: committed answers, in memory or redb
//! - `session` / `experiment`: per-participant state and the shared entry point
//! - `bonus` / `export`: read-only consumers of the records
//!
//! ## Architectural Constraints
//!
//! - NO async, NO network dependencies
//! - BTreeMap only, integer arithmetic only
//! - Rendering, transport and file output live in the app layer

// =============================================================================
// MODULES
// =============================================================================

pub mod barrier;
pub mod bonus;
pub mod cursor;
pub mod definition;
pub mod experiment;
pub mod export;
pub mod formats;
pub mod primitives;
pub mod recorder;
pub mod registry;
pub mod session;
pub mod storage;
pub mod types;
pub mod validation;
pub mod visibility;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{FieldValue, ParticipantId, Position, Required, StepRule, SurveyError};

// =============================================================================
// RE-EXPORTS: Definitions
// =============================================================================

pub use definition::{
    Condition, FieldDefinition, FieldKind, Operand, RevealAction, RevealRule, SkipContext,
    SkipPredicate, StageDefinition, StageOptions, StepDefinition, SurveyDefinition,
};
pub use registry::{DefinitionRegistry, RegistryBuilder};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use barrier::{BarrierKey, BarrierStatus, SyncBarrier};
pub use cursor::{CursorState, SessionCursor};
pub use experiment::{Experiment, ExperimentStatus};
pub use session::{AdvanceOutcome, ParticipantSession, SessionStatus, StepTiming, StepView};
pub use validation::is_step_complete;
pub use visibility::{VisibleFields, visible_fields};

// =============================================================================
// RE-EXPORTS: Records & Consumers
// =============================================================================

pub use bonus::{BonusAmount, BonusPolicy, FlatBonus};
pub use export::{LongRow, TimingRow, WideRow, WideTable, long_rows, timing_rows};
pub use formats::{PersistenceHeader, record_from_bytes, record_to_bytes};
pub use recorder::{
    MemoryStore, RecordKey, ResponseRecord, ResponseRecorder, StorageBackend, SurveyStore,
};
pub use storage::RedbStore;
