//! # PortalSync Sync
//!
//! Incremental synchronization between gateway nodes and the central
//! relational store.
//!
//! This crate provides:
//! - `IncrementProducer` — builds a bounded delta for a (node, tenant)
//!   window, retrying errored entities every round
//! - `IncrementConsumer` — applies a delta to the node-local store inside
//!   one transaction, reporting per-entity outcomes
//! - `PostbackReconciler` — turns a node's postback into per-(node,
//!   entity) status rows and node bookkeeping
//! - `EntitySyncState` — the per-(node, entity) state machine
//!
//! ## Key invariants
//!
//! - Applying the same delta or postback twice changes nothing
//! - A failed entity reappears in the next round's changed-set until it
//!   succeeds; retries are unbounded by count
//! - Each component runs one local transaction per invocation; cross-node
//!   consistency comes only from the idempotent delta/postback loop

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod consumer;
mod error;
mod producer;
mod queries;
mod reconciler;
mod state;

pub use config::SyncConfig;
pub use consumer::{ApplyOutcome, IncrementConsumer, APPLY_FAILURE_MESSAGE};
pub use error::{SyncError, SyncResult};
pub use producer::IncrementProducer;
pub use queries::QueryVariant;
pub use reconciler::{PostbackReconciler, ReconcileReport};
pub use state::{EntitySyncState, SyncEvent};
