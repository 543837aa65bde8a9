//! # deltamux
//!
//! An in-process entity-change multiplexer: one loop task owns a
//! monotonically-versioned snapshot of heterogeneous domain entities,
//! keeps it in sync with an authoritative backing store, and fans
//! incremental changes out to any number of concurrent client watchers.
//!
//! Each client repeatedly asks "what has changed since I last looked?"
//! and receives per-entity deltas (created, updated, removed) that advance
//! its private revision cursor, resuming exactly once from any prior
//! point. Removed entities are kept as tombstones, refcounted per client,
//! until every client that saw them has observed the removal.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ change feed ┌─────────────────┐
//! │   Backing    ├─────────────▶   AllWatcher    │
//! │  (adapter)   │◀── fetch ───┤   event loop    │
//! └──────────────┘             │  owns Snapshot  │
//!                              └────────┬────────┘
//!          next() requests              │ delta replies
//!        ┌──────────────┬───────────────┼──────────────┐
//!        ▼              ▼               ▼              ▼
//!   StateWatcher   StateWatcher    StateWatcher      ...
//! ```
//!
//! All snapshot state is owned by the loop; clients and the backing
//! adapter reach it only through channels. Within the loop no concurrency
//! exists, so the snapshot carries no locks.
//!
//! ## Example
//!
//! ```rust,ignore
//! use deltamux::{AllWatcher, AllWatcherConfig, Backing};
//!
//! let backing = Arc::new(MyBacking::connect(..)?);
//! let (watcher, handle) = AllWatcher::new(backing, AllWatcherConfig::default())?;
//! tokio::spawn(watcher.run());
//!
//! let mut w = handle.watch();
//! loop {
//!     for delta in w.next().await? {
//!         println!("{:?}", delta);
//!     }
//! }
//! ```
//!
//! The companion [`Aggregator`] batches per-instance enrichment lookups
//! into bulk provider calls with the same loop discipline.

mod aggregator;
mod all_watcher;
mod backing;
pub mod config;
mod entity;
mod errors;
mod snapshot;
mod state_watcher;

pub use aggregator::Aggregator;
pub use aggregator::AggregatorHandle;
pub use aggregator::InstanceGetter;
pub use aggregator::InstanceInfo;
pub use all_watcher::AllWatcher;
pub use all_watcher::AllWatcherHandle;
pub use backing::Backing;
pub use backing::BackingChange;
pub use config::AggregatorConfig;
pub use config::AllWatcherConfig;
pub use config::DeltamuxConfig;
pub use entity::Delta;
pub use entity::EntityInfo;
pub use entity::EntityKey;
pub use entity::EntityKind;
pub use entity::MachineInfo;
pub use entity::RelationInfo;
pub use entity::ServiceInfo;
pub use entity::UnitInfo;
pub use errors::BackingError;
pub use errors::Error;
pub use errors::Result;
pub use snapshot::Snapshot;
pub use state_watcher::StateWatcher;

#[cfg(any(test, feature = "test-utils"))]
pub use aggregator::MockInstanceGetter;
#[cfg(any(test, feature = "test-utils"))]
pub use backing::MockBacking;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod aggregator_test;
#[cfg(test)]
mod config_test;
#[cfg(test)]
mod entity_test;
