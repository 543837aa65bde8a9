//! Entity-Change Multiplexer Error Hierarchy
//!
//! Defines the error types for the multiplexer core, categorized by the
//! backing-store boundary and watcher lifecycle concerns.

use config::ConfigError;

use crate::entity::EntityKey;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failures reported by the backing store adapter
    #[error(transparent)]
    Backing(#[from] BackingError),

    /// Configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Returned from `next`/`stop` once a state watcher has been stopped
    #[error("state watcher was stopped")]
    WatcherStopped,

    /// Returned from `instance_info` once the aggregator has been stopped
    #[error("instance aggregator was stopped")]
    AggregatorStopped,

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Errors at the backing-store boundary.
///
/// These are `Clone` so a fatal error can be latched once by the loop and
/// handed to every subsequent client call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackingError {
    /// The entity is not present in the authoritative store.
    ///
    /// The multiplexer treats this as absence, never as a failure.
    #[error("{0} not found in backing store")]
    NotFound(EntityKey),

    /// Initial bulk enumeration failed
    #[error("initial enumeration failed: {0}")]
    GetAll(String),

    /// Single-entity lookup failed after a change notification
    #[error("fetch of {key} failed: {reason}")]
    Fetch { key: EntityKey, reason: String },

    /// A requested instance was missing from an otherwise successful bulk reply
    #[error("instance {0} not found")]
    InstanceNotFound(String),

    /// Bulk instance query failed
    #[error("instance query failed: {0}")]
    Instances(String),
}

impl BackingError {
    /// True for the distinguishable "not found" lookup outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackingError::NotFound(_) | BackingError::InstanceNotFound(_))
    }
}
