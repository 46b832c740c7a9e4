//! # PortalSync Protocol
//!
//! Wire envelopes for incremental sync.
//!
//! This crate provides:
//! - `DeltaEnvelope` — the bounded set of entities changed or deleted
//!   within a time window
//! - `PostbackEnvelope` — the acknowledgment describing the outcome of
//!   applying a delta
//! - `EntityType` / `SyncStatus` wire codes and structural validation
//! - Wire entities (`Application`, `ApiKey`) bound to the store's entity
//!   contract
//!
//! This is a pure data crate with no I/O; transport of the envelopes is
//! out of scope.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entities;
mod envelope;
mod error;

pub use entities::{ApiKey, Application, SyncEntity};
pub use envelope::{DeltaEnvelope, EntityError, EntityType, PostbackEnvelope, SyncStatus};
pub use error::{ProtocolError, ProtocolResult};
