use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::store::StoreError;

use super::{OutboundPublisher, OutboxStore};

/// Outcome of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub fetched: usize,
    pub published: usize,
    /// Set when a publish failed; the rest of the batch waits for the next pass.
    pub stalled: bool,
}

/// Moves unpublished outbox rows to an [`OutboundPublisher`].
///
/// Messages go out in sequence order. A failed publish stops the pass so a
/// later message never overtakes an earlier one; the failed message is
/// retried on the next pass. A crash between publish and mark re-sends the
/// message (at-least-once).
#[derive(Debug, Clone)]
pub struct OutboxRelay<S, P> {
    store: S,
    publisher: P,
    batch_size: usize,
    poll_interval: Duration,
}

impl<S, P> OutboxRelay<S, P>
where
    S: OutboxStore,
    P: OutboundPublisher,
{
    pub fn new(store: S, publisher: P, batch_size: usize, poll_interval: Duration) -> Self {
        Self {
            store,
            publisher,
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    #[instrument(skip(self), fields(batch_size = self.batch_size), err)]
    pub async fn relay_once(&self) -> Result<RelayReport, StoreError> {
        let batch = self.store.fetch_unpublished(self.batch_size).await?;
        let mut report = RelayReport {
            fetched: batch.len(),
            ..RelayReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let mut delivered = Vec::with_capacity(batch.len());
        for message in &batch {
            match self.publisher.publish(message).await {
                Ok(()) => delivered.push(message.event_id),
                Err(e) => {
                    warn!(
                        event_id = %message.event_id,
                        sequence = message.sequence,
                        error = %e,
                        "outbound publish failed; will retry"
                    );
                    report.stalled = true;
                    break;
                }
            }
        }

        if !delivered.is_empty() {
            self.store.mark_published(&delivered, Utc::now()).await?;
        }
        report.published = delivered.len();
        debug!(fetched = report.fetched, published = report.published, "relay pass done");
        Ok(report)
    }

    /// Poll until `shutdown` resolves. Store errors are logged and retried on
    /// the next tick.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_ms = self.poll_interval.as_millis() as u64, "outbox relay started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.relay_once().await {
                        error!(error = %e, "outbox relay pass failed");
                    }
                }
            }
        }
        info!("outbox relay stopped");
    }
}
