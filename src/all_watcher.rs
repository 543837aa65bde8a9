//! The multiplexer: a single-owner event loop that keeps the snapshot in
//! sync with the backing store and fans deltas out to state watchers.
//!
//! ```text
//! Backing change feed ──┐
//!                       ▼
//!                ┌─────────────┐      owns       ┌──────────┐
//! next()/stop() ─▶  AllWatcher ├─────────────────▶ Snapshot │
//!   (requests)   │    loop     │                 └──────────┘
//!                └──────┬──────┘
//!                       │ oneshot replies
//!                       ▼
//!                 StateWatcher clients
//! ```
//!
//! All snapshot mutation happens on the loop task, so the snapshot carries
//! no locks. Clients and the backing adapter reach the loop only through
//! channels whose sole consumer is the loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;

use crate::backing::Backing;
use crate::backing::BackingChange;
use crate::config::AllWatcherConfig;
use crate::entity::Delta;
use crate::errors::BackingError;
use crate::errors::Error;
use crate::errors::Result;
use crate::snapshot::Snapshot;
use crate::state_watcher::StateWatcher;

pub(crate) type WatcherId = u64;

/// A client request to the loop. A missing reply channel asks the loop to
/// stop the watcher and release its refcounts.
#[derive(Debug)]
pub(crate) struct WatcherRequest {
    pub(crate) watcher_id: WatcherId,
    pub(crate) reply: Option<oneshot::Sender<Vec<Delta>>>,
}

/// Loop-owned state for one client watcher.
#[derive(Debug, Default)]
pub(crate) struct WatcherSlot {
    /// The client's cursor: the revision up to which it has been served.
    pub(crate) revno: u64,
    /// Pending requests, most recently enqueued last. `respond` pops the
    /// most recent one; older requests stay queued behind it.
    pub(crate) pending: Vec<oneshot::Sender<Vec<Delta>>>,
}

/// State shared between the loop and every client handle.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    next_watcher_id: AtomicU64,
    /// The fatal backing error that terminated the loop, if any.
    fatal: OnceLock<BackingError>,
}

impl SharedState {
    pub(crate) fn allocate_watcher_id(&self) -> WatcherId {
        self.next_watcher_id.fetch_add(1, Ordering::Relaxed)
    }

    fn latch(
        &self,
        err: BackingError,
    ) {
        let _ = self.fatal.set(err);
    }

    pub(crate) fn fatal_error(&self) -> Option<BackingError> {
        self.fatal.get().cloned()
    }

    /// The error a stopped client observes: the latched fatal error if the
    /// loop died of one, a plain stop otherwise.
    pub(crate) fn stop_error(&self) -> Error {
        match self.fatal.get() {
            Some(err) => Error::Backing(err.clone()),
            None => Error::WatcherStopped,
        }
    }
}

/// Handle to a running [`AllWatcher`]: creates client watchers and stops
/// the loop.
#[derive(Debug)]
pub struct AllWatcherHandle {
    request_tx: mpsc::UnboundedSender<WatcherRequest>,
    shutdown_tx: watch::Sender<()>,
    shared: Arc<SharedState>,
}

impl AllWatcherHandle {
    /// Creates a new client watcher with a fresh cursor: its first `next`
    /// observes the whole current snapshot.
    pub fn watch(&self) -> StateWatcher {
        StateWatcher::new(
            self.shared.allocate_watcher_id(),
            self.request_tx.clone(),
            self.shared.clone(),
        )
    }

    /// Signals the loop to shut down. Returns the latched backing error if
    /// the loop already died of one.
    pub fn stop(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        match self.shared.fatal_error() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

/// The multiplexer loop. Owns the snapshot and the waiting-request table;
/// consumed by [`AllWatcher::run`].
pub struct AllWatcher<B: Backing> {
    backing: Arc<B>,
    config: AllWatcherConfig,
    pub(crate) all: Snapshot,
    pub(crate) watchers: HashMap<WatcherId, WatcherSlot>,
    request_rx: mpsc::UnboundedReceiver<WatcherRequest>,
    shutdown_rx: watch::Receiver<()>,
    shared: Arc<SharedState>,
}

impl<B: Backing> AllWatcher<B> {
    pub fn new(
        backing: Arc<B>,
        config: AllWatcherConfig,
    ) -> Result<(Self, AllWatcherHandle)> {
        config.validate()?;

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let shared = Arc::new(SharedState::default());

        let watcher = AllWatcher {
            backing,
            config,
            all: Snapshot::new(),
            watchers: HashMap::new(),
            request_rx,
            shutdown_rx,
            shared: shared.clone(),
        };
        let handle = AllWatcherHandle {
            request_tx,
            shutdown_tx,
            shared,
        };
        Ok((watcher, handle))
    }

    /// Runs the loop until it is stopped or a fatal backing error occurs.
    ///
    /// Subscribes to the backing change feed and populates the snapshot
    /// before serving the first client reply.
    pub async fn run(mut self) -> Result<()> {
        let (change_tx, mut change_rx) = mpsc::channel(self.config.change_buffer_size);
        self.backing.watch(change_tx);

        if let Err(e) = self.backing.get_all(&mut self.all).await {
            error!(error = %e, "initial enumeration failed");
            return Err(self.terminate(Some(e)));
        }
        info!(entities = self.all.len(), "all-watcher started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    info!("all-watcher shutdown signal received");
                    self.terminate(None);
                    return Ok(());
                }

                Some(change) = change_rx.recv() => {
                    trace!(key = %change.key, present = change.present, "backing change");
                    if let Err(e) = self.changed(change).await {
                        error!(error = %e, "backing fetch failed, terminating");
                        return Err(self.terminate(Some(e)));
                    }
                }

                Some(request) = self.request_rx.recv() => {
                    self.handle(request);
                }
            }

            self.respond();
        }
    }

    /// Applies one backing change notification to the snapshot.
    ///
    /// A vanished key becomes a removal; a present key is re-fetched, with
    /// a not-found fetch also treated as removal. Any other fetch error is
    /// fatal.
    pub(crate) async fn changed(
        &mut self,
        change: BackingChange,
    ) -> std::result::Result<(), BackingError> {
        if !change.present {
            self.all.mark_removed(&change.key);
            return Ok(());
        }
        match self.backing.fetch(&change.key).await {
            Ok(info) => {
                self.all.update(info);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                self.all.mark_removed(&change.key);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Enqueues a client request, or handles a stop request by draining the
    /// client's pending requests and releasing its references.
    pub(crate) fn handle(
        &mut self,
        request: WatcherRequest,
    ) {
        match request.reply {
            Some(reply) => {
                self.watchers.entry(request.watcher_id).or_default().pending.push(reply);
            }
            None => {
                debug!(watcher_id = request.watcher_id, "stopping state watcher");
                if let Some(slot) = self.watchers.remove(&request.watcher_id) {
                    // Dropping the reply senders reports "stopped" to any
                    // outstanding next().
                    drop(slot.pending);
                    self.all.leave(slot.revno);
                }
            }
        }
    }

    /// Answers every client whose most recent pending request can be
    /// satisfied with a non-empty delta set, advancing its cursor and
    /// reconciling refcounts. Clients with nothing new stay pending.
    pub(crate) fn respond(&mut self) {
        for slot in self.watchers.values_mut() {
            if slot.pending.is_empty() {
                continue;
            }
            let changes = self.all.changes_since(slot.revno);
            if changes.is_empty() {
                continue;
            }
            let cursor = slot.revno;
            slot.revno = self.all.latest_revno();
            let reply = slot.pending.pop().expect("pending checked non-empty");
            self.all.seen(cursor, &changes);
            let _ = reply.send(changes);
        }
    }

    /// Latches the cause, closes every pending request across all clients
    /// and unsubscribes from the backing. Returns the error subsequent
    /// client calls will observe.
    fn terminate(
        &mut self,
        cause: Option<BackingError>,
    ) -> Error {
        if let Some(err) = cause {
            self.shared.latch(err);
        }
        self.backing.unwatch();
        self.watchers.clear();
        self.shared.stop_error()
    }
}
