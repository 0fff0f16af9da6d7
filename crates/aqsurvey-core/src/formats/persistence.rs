//! # Persistence Format
//!
//! Binary serialization for response records and participant sessions.
//!
//! Every blob written to storage is a header followed by a postcard payload:
//! - 4 bytes: Magic ("AQSV")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is decoded, so a corrupted
//! or foreign blob fails with `SerializationError` instead of allocating.

use crate::recorder::ResponseRecord;
use crate::session::ParticipantSession;
use crate::{SurveyError, primitives};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Maximum accepted blob size (16 MB).
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

const HEADER_SIZE: usize = 5;

// =============================================================================
// HEADER
// =============================================================================

/// The header preceding every persisted blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), SurveyError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(SurveyError::SerializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(SurveyError::SerializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SurveyError> {
        if bytes.len() < HEADER_SIZE {
            return Err(SurveyError::SerializationError(
                "Header too short".to_string(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ENCODE / DECODE
// =============================================================================

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, SurveyError> {
    let payload =
        postcard::to_stdvec(value).map_err(|e| SurveyError::SerializationError(e.to_string()))?;
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&PersistenceHeader::new().to_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, SurveyError> {
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(SurveyError::SerializationError(format!(
            "{} blob of {} bytes exceeds maximum {} bytes",
            what,
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }
    PersistenceHeader::from_bytes(bytes)?.validate()?;
    postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        SurveyError::SerializationError(format!("Failed to decode {}: {}", what, e))
    })
}

/// Encode a response record.
pub fn record_to_bytes(record: &ResponseRecord) -> Result<Vec<u8>, SurveyError> {
    encode(record)
}

/// Decode a response record.
pub fn record_from_bytes(bytes: &[u8]) -> Result<ResponseRecord, SurveyError> {
    decode(bytes, "record")
}

/// Encode a participant session snapshot.
pub fn session_to_bytes(session: &ParticipantSession) -> Result<Vec<u8>, SurveyError> {
    encode(session)
}

/// Decode a participant session snapshot.
pub fn session_from_bytes(bytes: &[u8]) -> Result<ParticipantSession, SurveyError> {
    decode(bytes, "session")
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldValue, ParticipantId};

    fn record() -> ResponseRecord {
        ResponseRecord {
            participant_id: ParticipantId::new("p1"),
            stage: "survey".into(),
            iteration: 0,
            step: "q4".into(),
            field_id: "q4_1".into(),
            value: FieldValue::multiple(["Poverty", "Corruption"]),
            timestamp_ms: 1_600_000_000_000,
            sequence: 7,
        }
    }

    #[test]
    fn header_layout() {
        let bytes = PersistenceHeader::new().to_bytes();
        assert_eq!(&bytes[0..4], b"AQSV");
        assert_eq!(bytes[4], primitives::FORMAT_VERSION);
    }

    #[test]
    fn record_survives_encoding() {
        let original = record();
        let bytes = record_to_bytes(&original).expect("encode");
        assert_eq!(record_from_bytes(&bytes).expect("decode"), original);
    }

    #[test]
    fn session_survives_encoding() {
        let mut session = ParticipantSession::new(ParticipantId::new("p1"));
        session.disconnect();
        let bytes = session_to_bytes(&session).expect("encode");
        let restored = session_from_bytes(&bytes).expect("decode");
        assert_eq!(restored.participant_id(), session.participant_id());
        assert!(!restored.is_connected());
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = record_to_bytes(&record()).expect("encode");
        bytes[0..4].copy_from_slice(b"KREM");
        assert!(matches!(
            record_from_bytes(&bytes),
            Err(SurveyError::SerializationError(_))
        ));
    }

    #[test]
    fn truncated_blob_rejected() {
        assert!(record_from_bytes(b"AQ").is_err());
        let bytes = record_to_bytes(&record()).expect("encode");
        assert!(record_from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }
}
