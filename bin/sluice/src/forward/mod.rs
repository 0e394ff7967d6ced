use async_trait::async_trait;
use sluice_event::Event;
use snafu::Snafu;

mod blackhole;
pub use self::blackhole::Blackhole;

mod http;
pub use self::http::HttpSender;

/// Batch delivery error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SendError {
    /// The backend answered with a non-success status.
    #[snafu(display("backend rejected batch: {}", status))]
    Rejected {
        /// The response status.
        status: reqwest::StatusCode,
    },

    /// The request could not be delivered.
    #[snafu(display("failed to deliver batch to backend: {}", source))]
    Transport {
        /// Error source.
        source: reqwest::Error,
    },
}

/// Accepts batches of events for delivery to the downstream backend.
///
/// Implementations are shared between the listener tasks and the self-metrics flusher, so they must be safe for
/// concurrent use. Delivery failures are reported to the caller, never retried here.
#[async_trait]
pub trait MetricsSender: Send + Sync {
    /// Sends one batch of events.
    ///
    /// Ownership of the batch transfers to the sender; the batch is consumed exactly once.
    async fn send(&self, batch: Vec<Event>) -> Result<(), SendError>;
}
