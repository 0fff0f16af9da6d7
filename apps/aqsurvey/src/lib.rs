//! # aqsurvey
//!
//! Application layer of aqsurvey: configuration loading, the participant
//! HTTP API and the CLI. All progression logic lives in `aqsurvey-core`.

pub mod api;
pub mod cli;
pub mod config;
