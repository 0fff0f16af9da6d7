//! # Formats Module
//!
//! Binary encoding of persisted records and session snapshots.

pub mod persistence;

pub use persistence::{
    MAX_PERSISTENCE_PAYLOAD_SIZE, PersistenceHeader, record_from_bytes, record_to_bytes,
    session_from_bytes, session_to_bytes,
};
