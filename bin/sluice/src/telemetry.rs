use std::sync::Arc;
use std::time::Duration;

use sluice_event::{Event, EventBuilder};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::forward::MetricsSender;

/// Default capacity of the self-metrics queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

const FLUSH_MAX_BATCH: usize = 512;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Self-metrics side channel.
///
/// Converts pipeline diagnostics into counter events and offers them to a bounded queue, from which a flusher task
/// batches them toward the same sender as the data path. The queue is never blocked on: when it is full, observations
/// are dropped, which keeps an error storm from amplifying itself through its own diagnostics.
///
/// The handle is an explicit, optional dependency: components hold `Option<Telemetry>` and treat `None` as "record
/// nothing".
#[derive(Clone)]
pub struct Telemetry {
    tx: mpsc::Sender<Event>,
}

impl Telemetry {
    /// Creates a telemetry handle backed by a queue of the given capacity, returning the receiving half for the
    /// flusher.
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Records a recoverable metadata decode error of the given category.
    pub fn record_metadata_error(&self, category: &'static str) {
        self.offer(counter("metadata_errors").tag("reason", category));
    }

    /// Records a line discarded as structurally invalid.
    pub fn record_invalid_line(&self, category: &'static str) {
        self.offer(counter("invalid_lines").tag("error", category));
    }

    /// Records a line that produced a valid event.
    pub fn record_valid_line(&self) {
        self.offer(counter("valid_lines"));
    }

    /// Records an unanticipated processing fault at the given scope.
    pub fn record_batch_error(&self, scope: &'static str) {
        self.offer(counter("batch_error").tag("scope", scope));
    }

    fn offer(&self, builder: EventBuilder) {
        let event = builder.build("c").expect("counter token is always valid");
        if self.tx.try_send(event).is_err() {
            debug!("Self-metrics queue full. Dropping observation.");
        }
    }
}

fn counter(name: &'static str) -> EventBuilder {
    Event::builder(name).value(1.0)
}

/// Spawns the flusher task that drains the telemetry queue into `sender`.
///
/// Batches are bounded both by size and by a flush interval, and a final drain happens on shutdown.
pub fn spawn_flusher(
    mut receiver: mpsc::Receiver<Event>, sender: Arc<dyn MetricsSender>, shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut flush = interval(FLUSH_INTERVAL);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut batch = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = flush.tick() => {
                    flush_batch(&mut batch, &sender).await;
                }
                maybe_event = receiver.recv() => match maybe_event {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= FLUSH_MAX_BATCH {
                            flush_batch(&mut batch, &sender).await;
                        }
                    }
                    None => break,
                }
            }
        }

        // Drain whatever was still queued before stopping.
        while let Ok(event) = receiver.try_recv() {
            batch.push(event);
        }
        flush_batch(&mut batch, &sender).await;

        debug!("Self-metrics flusher stopped.");
    })
}

async fn flush_batch(batch: &mut Vec<Event>, sender: &Arc<dyn MetricsSender>) {
    if batch.is_empty() {
        return;
    }

    let events = std::mem::take(batch);
    if let Err(e) = sender.send(events).await {
        error!(error = %e, "Failed to forward self-metrics batch.");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::{spawn_flusher, Telemetry};
    use crate::forward::testutil::CollectingSender;

    #[test]
    fn records_are_category_tagged_counters() {
        let (telemetry, mut receiver) = Telemetry::with_capacity(16);

        telemetry.record_metadata_error("malformed_value");
        telemetry.record_invalid_line("invalid_line_format");
        telemetry.record_valid_line();
        telemetry.record_batch_error("line");

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.name(), "metadata_errors");
        assert_eq!(event.value(), 1.0);
        assert_eq!(event.tags().get("reason").map(String::as_str), Some("malformed_value"));

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.name(), "invalid_lines");
        assert_eq!(event.tags().get("error").map(String::as_str), Some("invalid_line_format"));

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.name(), "valid_lines");
        assert!(event.tags().is_empty());

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.name(), "batch_error");
        assert_eq!(event.tags().get("scope").map(String::as_str), Some("line"));
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (telemetry, mut receiver) = Telemetry::with_capacity(4);

        // Well past capacity; none of these may block.
        for _ in 0..1000 {
            telemetry.record_valid_line();
        }

        let mut received = 0;
        while receiver.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 4);
    }

    #[tokio::test]
    async fn flusher_drains_queue_on_shutdown() {
        let (telemetry, receiver) = Telemetry::with_capacity(64);
        let sender = Arc::new(CollectingSender::default());
        let shutdown = CancellationToken::new();

        let sender_handle: Arc<dyn crate::forward::MetricsSender> = sender.clone();
        let flusher = spawn_flusher(receiver, sender_handle, shutdown.clone());

        for _ in 0..5 {
            telemetry.record_valid_line();
        }

        shutdown.cancel();
        flusher.await.unwrap();

        let events = sender.events();
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|event| event.name() == "valid_lines"));
    }
}
