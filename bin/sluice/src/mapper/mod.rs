use std::panic::{catch_unwind, AssertUnwindSafe};

use sluice_codec::{decode_line, raw_name, LineError};
use sluice_event::Event;
use tracing::{debug, error};

use crate::telemetry::Telemetry;

mod processor;
pub use self::processor::{MappingProcessor, MappingRuleConfig, RuleMappingProcessor};

/// Drives raw metric lines through the decode/map pipeline.
///
/// One mapper instance is shared by every listener. Per line: the raw name is pre-filtered through the mapping
/// processor, the line is decoded, decode diagnostics become self-metrics, and each built event runs through
/// `process`. Line-scoped failures never escape a line; whether unanticipated faults are isolated per line or abort
/// the whole batch is chosen at construction.
pub struct MetricMapper {
    processor: Box<dyn MappingProcessor>,
    telemetry: Option<Telemetry>,
    coarse_batch_faults: bool,
}

impl MetricMapper {
    /// Creates a mapper.
    ///
    /// `telemetry` being `None` disables self-metrics entirely. When `coarse_batch_faults` is set, an unanticipated
    /// fault while processing any line discards the whole batch instead of just that line.
    pub fn new(processor: Box<dyn MappingProcessor>, telemetry: Option<Telemetry>, coarse_batch_faults: bool) -> Self {
        Self {
            processor,
            telemetry,
            coarse_batch_faults,
        }
    }

    /// Maps a batch of raw lines into canonical events.
    ///
    /// Events come back in source-line order. Lines that fail to decode, or are filtered or dropped, simply contribute
    /// no events; errors surface only as diagnostics.
    pub fn map_lines(&self, lines: &[String]) -> Vec<Event> {
        if self.coarse_batch_faults {
            match catch_unwind(AssertUnwindSafe(|| self.map_lines_inner(lines))) {
                Ok(events) => events,
                Err(_) => {
                    error!(batch_len = lines.len(), "Unanticipated failure while processing batch. Discarding batch.");
                    self.record_batch_error("batch");
                    Vec::new()
                }
            }
        } else {
            let mut events = Vec::new();
            for line in lines {
                match catch_unwind(AssertUnwindSafe(|| self.map_line(line))) {
                    Ok(line_events) => events.extend(line_events),
                    Err(_) => {
                        error!(line = %line, "Unanticipated failure while processing line. Discarding line.");
                        self.record_batch_error("line");
                    }
                }
            }
            events
        }
    }

    fn map_lines_inner(&self, lines: &[String]) -> Vec<Event> {
        lines.iter().flat_map(|line| self.map_line(line)).collect()
    }

    fn map_line(&self, line: &str) -> Vec<Event> {
        // Cheap pre-filter on the raw name, before any decoding work is spent on the line. A negative answer is an
        // intentional drop: no events, no diagnostics.
        if !self.processor.processable(raw_name(line)) {
            return Vec::new();
        }

        match decode_line(line) {
            Ok(decoded) => {
                for anomaly in &decoded.anomalies {
                    debug!(line, category = anomaly.category(), "Recoverable decode error.");
                    self.record_metadata_error(anomaly.category());
                }

                let mut events = Vec::with_capacity(decoded.events.len());
                for event in decoded.events {
                    self.record_valid_line();
                    if let Some(event) = self.processor.process(event) {
                        events.push(event);
                    }
                }
                events
            }
            Err(e) => {
                // Anomalies recorded before the line went fatal still count.
                for anomaly in e.anomalies() {
                    self.record_metadata_error(anomaly.category());
                }

                debug!(line, error = %e, "Discarding line.");
                match &e {
                    LineError::UnknownMetricType { .. } => self.record_metadata_error(e.category()),
                    _ => self.record_invalid_line(e.category()),
                }
                Vec::new()
            }
        }
    }

    fn record_metadata_error(&self, category: &'static str) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_metadata_error(category);
        }
    }

    fn record_invalid_line(&self, category: &'static str) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_invalid_line(category);
        }
    }

    fn record_valid_line(&self) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_valid_line();
        }
    }

    fn record_batch_error(&self, scope: &'static str) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_batch_error(scope);
        }
    }
}
