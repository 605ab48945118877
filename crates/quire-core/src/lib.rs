//! quire-core - Core library for Quire
//!
//! This crate contains the replication core shared by the hub and the CLI:
//! the change log, the dual store (authoritative `SQLite` + in-memory read
//! cache), the unified sync envelope, conflict resolution, the apply engine
//! and the background sync client.

pub mod auth;
pub mod changelog;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod models;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Category, EntityType, Note, Operation};
pub use store::{DualStore, SharedStore, WriteOutcome};
