use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sluice_event::Event;
use tracing::debug;

use super::{MetricsSender, SendError};

/// Does nothing with the events it receives.
///
/// Useful for development profiles and smoke testing: a valid sender implementation that simply counts what reaches
/// it.
#[derive(Default)]
pub struct Blackhole {
    events_received: AtomicU64,
}

#[async_trait]
impl MetricsSender for Blackhole {
    async fn send(&self, batch: Vec<Event>) -> Result<(), SendError> {
        let received = self.events_received.fetch_add(batch.len() as u64, Ordering::Relaxed) + batch.len() as u64;
        debug!(events = batch.len(), total = received, "Discarded batch.");
        Ok(())
    }
}
