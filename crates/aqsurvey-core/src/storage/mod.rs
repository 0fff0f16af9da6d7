//! # Storage Module
//!
//! Disk-backed response storage using redb.

pub mod redb_store;

pub use redb_store::RedbStore;
