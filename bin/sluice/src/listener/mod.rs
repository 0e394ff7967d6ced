use std::net::SocketAddr;
use std::sync::Arc;

use sluice_event::sanitize;
use snafu::Snafu;
use tracing::error;

use crate::forward::MetricsSender;
use crate::mapper::MetricMapper;

pub mod tcp;
pub mod udp;

/// Listener setup error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ListenerError {
    /// Failed to bind a listener socket.
    #[snafu(display("failed to bind {} listener on {}: {}", listener_type, addr, source))]
    FailedToBind {
        /// The transport being bound.
        listener_type: &'static str,

        /// The requested local address.
        addr: SocketAddr,

        /// Error source.
        source: std::io::Error,
    },
}

/// Shared entry point from framed line batches to the backend sender.
///
/// Cheap to clone; every listener task holds one. Batches run through the mapper synchronously on the calling task,
/// and surviving events are handed off to the sender fire-and-forget, so a slow backend never stalls ingestion.
#[derive(Clone)]
pub struct Dispatcher {
    mapper: Arc<MetricMapper>,
    sender: Arc<dyn MetricsSender>,
    environment: Option<Arc<str>>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    ///
    /// When `environment` is set, its sanitized form is stamped as an `environment` tag on every outgoing data event.
    pub fn new(mapper: Arc<MetricMapper>, sender: Arc<dyn MetricsSender>, environment: Option<&str>) -> Self {
        Self {
            mapper,
            sender,
            environment: environment.map(|environment| Arc::from(sanitize(environment).as_str())),
        }
    }

    /// Runs one batch of lines through the pipeline and forwards the surviving events.
    pub fn dispatch(&self, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }

        let mut events = self.mapper.map_lines(&lines);
        if let Some(environment) = &self.environment {
            events = events
                .into_iter()
                .map(|event| event.with_tag("environment", environment.as_ref()))
                .collect();
        }

        if events.is_empty() {
            return;
        }

        let sender = Arc::clone(&self.sender);
        tokio::spawn(async move {
            if let Err(e) = sender.send(events).await {
                error!(error = %e, "Failed to forward batch.");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::forward::testutil::{wait_for_events, CollectingSender};
    use crate::forward::MetricsSender;
    use crate::mapper::{MetricMapper, RuleMappingProcessor};

    use super::Dispatcher;

    pub(super) fn test_dispatcher() -> (Dispatcher, Arc<CollectingSender>) {
        let sender = Arc::new(CollectingSender::default());
        let sender_handle: Arc<dyn MetricsSender> = sender.clone();
        let processor = RuleMappingProcessor::from_config(&[], &[]).unwrap();
        let mapper = Arc::new(MetricMapper::new(Box::new(processor), None, false));
        (Dispatcher::new(mapper, sender_handle, None), sender)
    }

    #[tokio::test]
    async fn dispatch_forwards_mapped_events() {
        let (dispatcher, sender) = test_dispatcher();

        dispatcher.dispatch(vec!["foo:1|c".to_string(), "bar:2|g".to_string()]);

        wait_for_events(&sender, 2).await;
        let events = sender.events();
        assert_eq!(events[0].name(), "foo");
        assert_eq!(events[1].name(), "bar");
    }

    #[tokio::test]
    async fn empty_batches_are_not_sent() {
        let (dispatcher, sender) = test_dispatcher();

        dispatcher.dispatch(Vec::new());
        dispatcher.dispatch(vec!["bad.metric|c".to_string()]);

        // Give any stray send a chance to land.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(sender.batches().is_empty());
    }

    #[tokio::test]
    async fn environment_tag_is_stamped_on_data_events() {
        let sender = Arc::new(CollectingSender::default());
        let sender_handle: Arc<dyn MetricsSender> = sender.clone();
        let processor = RuleMappingProcessor::from_config(&[], &[]).unwrap();
        let mapper = Arc::new(MetricMapper::new(Box::new(processor), None, false));
        let dispatcher = Dispatcher::new(mapper, sender_handle, Some("prod east"));

        dispatcher.dispatch(vec!["foo:1|c".to_string()]);

        wait_for_events(&sender, 1).await;
        let events = sender.events();
        assert_eq!(events[0].tags().get("environment").map(String::as_str), Some("prod_east"));
    }
}
