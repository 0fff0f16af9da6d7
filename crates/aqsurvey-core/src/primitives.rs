//! # Engine Primitives
//!
//! Hardcoded runtime constants for the progression engine.
//!
//! These limits are compiled into the binary and are immutable at runtime.
//! Every bound here exists so that a malformed definition or an oversized
//! participant payload is rejected instead of processed.

/// Magic bytes for the aqsurvey binary record format header.
///
/// - Record Header = Magic Bytes ("AQSV") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"AQSV";

/// Current serialization format version.
///
/// Increment this when making breaking changes to the persisted record or
/// session snapshot layout.
pub const FORMAT_VERSION: u8 = 2;

/// Maximum number of iterations a repeating stage may declare.
pub const MAX_STAGE_REPEAT: u32 = 1000;

/// Maximum number of fields in one step.
pub const MAX_FIELDS_PER_STEP: usize = 256;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for field ids, step names and stage names.
pub const MAX_NAME_LENGTH: usize = 128;

/// Maximum length of one answer (text or a single selection), in bytes.
///
/// Free-text answers longer than this (16KB) are rejected at `set_value`.
pub const MAX_VALUE_LENGTH: usize = 16 * 1024;

/// Maximum number of selections carried by a multi-select answer.
pub const MAX_SELECTIONS: usize = 64;
