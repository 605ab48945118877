//! Hub/spoke replication
//!
//! Spokes push their unsent changes to a hub and pull what the hub has not
//! yet delivered to them. Both directions use the same [`ChangeEnvelope`]
//! and the same apply engine.

mod apply;
mod backoff;
pub mod checksum;
mod client;
mod conflict;
mod envelope;
mod hub;
mod protocol;
mod transport;


pub use apply::{apply_change, ApplyOutcome};
pub use backoff::{backoff, BACKOFF_BASE, BACKOFF_CEILING};
pub use client::{ClientStatus, SyncClient, SyncReport};
pub use conflict::{resolve, Resolution, Side};
pub use envelope::{collect_unsent, collect_unsent_excluding, ChangeEnvelope, ChangePage};
pub use hub::SyncHub;
pub use protocol::{
    HealthResponse, LoginRequest, LoginResponse, PullQuery, PullResponse, PushRequest,
    PushResponse, RejectedChange, StatusResponse,
};
pub use transport::{HttpTransport, SyncTransport, TransportError, TransportResult};
