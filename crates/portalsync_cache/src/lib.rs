//! # PortalSync Cache
//!
//! Cluster-aware generic entity cache.
//!
//! This crate provides:
//! - `GenericEntityCache` — read-only snapshots keyed by unique name, an
//!   id → name index for invalidation, and per-name lock-bucket write
//!   serialization
//! - `InvalidationBus` — pub/sub over cluster invalidation events, with an
//!   in-process implementation
//! - `WipeTask` — the periodic full wipe that bounds growth and self-heals
//!   missed invalidations
//!
//! ## Key invariants
//!
//! - A cache entry is always disposable: a miss reloads from the store
//! - Only same-name writers contend; reads never block writes
//! - Failures never leave a poisoned, non-evictable entry

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bus;
mod cache;
mod wipe;

pub use bus::{
    BusSubscription, EntityOperation, InvalidationBus, InvalidationEvent, Listener,
    MemoryInvalidationBus, SubscriptionId,
};
pub use cache::{GenericEntityCache, DEFAULT_LOCK_BUCKETS};
pub use wipe::{WipeTask, DEFAULT_WIPE_INTERVAL};
