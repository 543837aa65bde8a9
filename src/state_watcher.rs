//! Per-client watcher handle.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::trace;

use crate::all_watcher::SharedState;
use crate::all_watcher::WatcherId;
use crate::all_watcher::WatcherRequest;
use crate::entity::Delta;
use crate::errors::Result;

/// A client's view onto the multiplexer. Holds the client's identity; the
/// cursor itself lives with the loop.
///
/// Dropping the handle stops the watcher, releasing its references in the
/// snapshot.
#[derive(Debug)]
pub struct StateWatcher {
    id: WatcherId,
    request_tx: mpsc::UnboundedSender<WatcherRequest>,
    shared: Arc<SharedState>,
    stopped: bool,
}

impl StateWatcher {
    pub(crate) fn new(
        id: WatcherId,
        request_tx: mpsc::UnboundedSender<WatcherRequest>,
        shared: Arc<SharedState>,
    ) -> Self {
        Self {
            id,
            request_tx,
            shared,
            stopped: false,
        }
    }

    /// Blocks until something has changed since this watcher last looked,
    /// then returns the deltas, in the order the entities last changed,
    /// and advances the cursor past all of them.
    ///
    /// The first call observes the entire current snapshot. Once the
    /// watcher or the multiplexer is stopped, returns the stop error
    /// (the latched backing error if the loop died of one).
    pub async fn next(&mut self) -> Result<Vec<Delta>> {
        if self.stopped {
            return Err(self.shared.stop_error());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = WatcherRequest {
            watcher_id: self.id,
            reply: Some(reply_tx),
        };
        if self.request_tx.send(request).is_err() {
            return Err(self.shared.stop_error());
        }

        match reply_rx.await {
            Ok(deltas) => {
                trace!(watcher_id = self.id, deltas = deltas.len(), "delivered");
                Ok(deltas)
            }
            // The loop dropped the reply: this watcher or the whole
            // multiplexer was stopped.
            Err(_) => Err(self.shared.stop_error()),
        }
    }

    /// Stops the watcher. Idempotent; any outstanding `next` is unblocked
    /// with the stop error and the watcher's references are released.
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        let _ = self.request_tx.send(WatcherRequest {
            watcher_id: self.id,
            reply: None,
        });
        Ok(())
    }
}

impl Drop for StateWatcher {
    fn drop(&mut self) {
        if !self.stopped {
            let _ = self.request_tx.send(WatcherRequest {
                watcher_id: self.id,
                reply: None,
            });
        }
    }
}
