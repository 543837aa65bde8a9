//! Request-coalescing aggregator for bulk instance enrichment.
//!
//! Clients ask for per-instance details one id at a time; querying the
//! provider once per id is wasteful, so the aggregator gathers every
//! request arriving within a short window and answers the whole batch with
//! a single bulk call. It shares the single-owner, channel-fed loop shape
//! of the multiplexer.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio::time::sleep_until;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::AggregatorConfig;
use crate::errors::BackingError;
use crate::errors::Error;
use crate::errors::Result;

/// Enrichment details for one provisioned instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub addresses: Vec<String>,
    pub status: Option<String>,
}

/// Bulk lookup of instance details from the provider.
///
/// Results are positional: `result[i]` answers `ids[i]`, with `None` for
/// ids the provider knows nothing about.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait InstanceGetter: Send + Sync + 'static {
    async fn instances(
        &self,
        ids: &[String],
    ) -> std::result::Result<Vec<Option<InstanceInfo>>, BackingError>;
}

struct InstanceRequest {
    instance_id: String,
    reply: oneshot::Sender<Result<InstanceInfo>>,
}

/// Handle to a running [`Aggregator`].
#[derive(Debug)]
pub struct AggregatorHandle {
    request_tx: mpsc::Sender<InstanceRequest>,
    shutdown_tx: watch::Sender<()>,
}

impl AggregatorHandle {
    /// Looks up one instance, transparently batched with every other
    /// request arriving within the gather interval.
    pub async fn instance_info(
        &self,
        instance_id: impl Into<String>,
    ) -> Result<InstanceInfo> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = InstanceRequest {
            instance_id: instance_id.into(),
            reply: reply_tx,
        };
        if self.request_tx.send(request).await.is_err() {
            return Err(Error::AggregatorStopped);
        }
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::AggregatorStopped),
        }
    }

    /// Signals the loop to shut down; pending requests are answered with
    /// the stop error.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// The batching loop. Consumed by [`Aggregator::run`].
pub struct Aggregator<G: InstanceGetter> {
    getter: Arc<G>,
    config: AggregatorConfig,
    request_rx: mpsc::Receiver<InstanceRequest>,
    shutdown_rx: watch::Receiver<()>,
}

impl<G: InstanceGetter> Aggregator<G> {
    pub fn new(
        getter: Arc<G>,
        config: AggregatorConfig,
    ) -> Result<(Self, AggregatorHandle)> {
        config.validate()?;

        let (request_tx, request_rx) = mpsc::channel(config.request_buffer_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let aggregator = Aggregator {
            getter,
            config,
            request_rx,
            shutdown_rx,
        };
        let handle = AggregatorHandle {
            request_tx,
            shutdown_tx,
        };
        Ok((aggregator, handle))
    }

    /// Runs the loop until stopped.
    ///
    /// The gather timer is armed by the first request of a batch; a batch
    /// reaching `max_batch_size` is flushed without waiting it out. A bulk
    /// failure is broadcast to every request in the batch and the loop
    /// keeps serving.
    pub async fn run(mut self) -> Result<()> {
        info!(
            gather_interval_ms = self.config.gather_interval_ms,
            max_batch_size = self.config.max_batch_size,
            "aggregator started"
        );

        let mut pending: Vec<InstanceRequest> = Vec::new();
        let mut deadline = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    info!("aggregator shutdown signal received");
                    // Dropping the replies reports "stopped" to the callers.
                    pending.clear();
                    return Ok(());
                }

                Some(request) = self.request_rx.recv() => {
                    if pending.is_empty() {
                        deadline = Instant::now() + self.config.gather_interval();
                    }
                    pending.push(request);
                    if pending.len() >= self.config.max_batch_size {
                        self.flush(&mut pending).await;
                    }
                }

                _ = sleep_until(deadline), if !pending.is_empty() => {
                    self.flush(&mut pending).await;
                }
            }
        }
    }

    /// Issues one bulk call for the gathered batch and dispatches one
    /// reply per request.
    async fn flush(
        &self,
        pending: &mut Vec<InstanceRequest>,
    ) {
        let batch = std::mem::take(pending);
        let ids: Vec<String> = batch.iter().map(|r| r.instance_id.clone()).collect();
        debug!(batch = ids.len(), "querying instance details");

        match self.getter.instances(&ids).await {
            Ok(results) if results.len() == batch.len() => {
                for (request, result) in batch.into_iter().zip(results) {
                    let reply = match result {
                        Some(info) => Ok(info),
                        None => Err(BackingError::InstanceNotFound(request.instance_id).into()),
                    };
                    let _ = request.reply.send(reply);
                }
            }
            Ok(results) => {
                warn!(
                    expected = batch.len(),
                    got = results.len(),
                    "instance getter returned a short reply"
                );
                for request in batch {
                    let _ = request.reply.send(Err(BackingError::Instances(
                        "instance getter returned a short reply".into(),
                    )
                    .into()));
                }
            }
            Err(e) => {
                warn!(error = %e, "bulk instance query failed");
                for request in batch {
                    let _ = request.reply.send(Err(e.clone().into()));
                }
            }
        }
    }
}
