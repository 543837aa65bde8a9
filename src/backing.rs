//! Abstract interface to the authoritative store behind the multiplexer.

use async_trait::async_trait;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use tokio::sync::mpsc;

use crate::entity::EntityInfo;
use crate::entity::EntityKey;
use crate::errors::BackingError;
use crate::snapshot::Snapshot;

/// A change notification pushed by the backing store: the key changed, and
/// either still exists (`present`) or is gone from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingChange {
    pub key: EntityKey,
    pub present: bool,
}

impl BackingChange {
    pub fn present(key: EntityKey) -> Self {
        Self { key, present: true }
    }

    pub fn absent(key: EntityKey) -> Self {
        Self { key, present: false }
    }
}

/// Adapter to the authoritative store. Implemented outside the core, e.g.
/// on top of a transactional document database with a change feed.
///
/// The multiplexer loop is the only caller; implementations never see
/// concurrent calls from it, but must be shareable with the task that
/// pushes change notifications.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait Backing: Send + Sync + 'static {
    /// Bulk-populates the snapshot from the authoritative store. Called
    /// once, before any client reply.
    async fn get_all(
        &self,
        all: &mut Snapshot,
    ) -> Result<(), BackingError>;

    /// Looks up a single entity after a change notification.
    ///
    /// Absence must be reported as [`BackingError::NotFound`]; any other
    /// error is treated as fatal by the multiplexer.
    async fn fetch(
        &self,
        key: &EntityKey,
    ) -> Result<EntityInfo, BackingError>;

    /// Registers the sink for change notifications. At most one
    /// subscription may be active; a second `watch` is a programmer error.
    fn watch(
        &self,
        sink: mpsc::Sender<BackingChange>,
    );

    /// Drops the active subscription.
    fn unwatch(&self);
}
