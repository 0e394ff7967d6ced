use std::net::SocketAddr;

use serde::Deserialize;
use snafu::Snafu;

use crate::mapper::MappingRuleConfig;

/// Application-level configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigError {
    /// Neither transport was enabled.
    #[snafu(display("No listeners configured. Enable at least one transport (`tcp` or `udp`) to ingest metrics."))]
    NoListenersConfigured,
}

/// Top-level application configuration.
#[derive(Deserialize)]
pub struct AppConfig {
    /// TCP listener configuration.
    ///
    /// If not set, TCP ingestion is disabled.
    #[serde(default)]
    pub tcp: Option<TcpListenerConfig>,

    /// UDP listener configuration.
    ///
    /// If not set, UDP ingestion is disabled.
    #[serde(default)]
    pub udp: Option<UdpListenerConfig>,

    /// The downstream backend to forward batches to.
    pub backend: BackendConfig,

    /// Whether to emit self-metrics about the pipeline's own processing through the backend sender.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    pub self_metrics: bool,

    /// Whether an unanticipated fault while processing one line discards the entire batch.
    ///
    /// By default faults are isolated per line: the faulty line is dropped and the rest of the batch proceeds.
    /// Setting this restores the historical all-or-nothing behavior.
    #[serde(default)]
    pub coarse_batch_faults: bool,

    /// Environment name stamped as an `environment` tag on every forwarded data event.
    ///
    /// Defaults to unset (no tag).
    #[serde(default)]
    pub environment: Option<String>,

    /// Raw-name prefixes accepted by the mapping pre-filter.
    ///
    /// An empty list accepts every name.
    #[serde(default)]
    pub processable_prefixes: Vec<String>,

    /// Mapping rules applied to built events, first match wins.
    #[serde(default)]
    pub mappings: Vec<MappingRuleConfig>,
}

impl AppConfig {
    /// Validates cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// If neither the TCP nor the UDP listener is configured, an error is returned: a bridge with no ingestion path
    /// is a misconfiguration, not a valid idle state.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tcp.is_none() && self.udp.is_none() {
            return NoListenersConfigured.fail();
        }

        Ok(())
    }
}

/// TCP listener configuration.
#[derive(Deserialize)]
pub struct TcpListenerConfig {
    /// The local address to listen on.
    pub bind: SocketAddr,

    /// The size of the buffer used for reads from each connection, in bytes.
    ///
    /// Defaults to 8192 bytes.
    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,
}

/// UDP listener configuration.
#[derive(Deserialize)]
pub struct UdpListenerConfig {
    /// The local address to listen on.
    pub bind: SocketAddr,

    /// The size of the buffer datagrams are received into, in bytes.
    ///
    /// Datagrams larger than this are truncated. Defaults to 8192 bytes.
    #[serde(default = "default_buffer_size")]
    pub recv_buffer_size: usize,
}

const fn default_buffer_size() -> usize {
    8192
}

/// Downstream backend configuration.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Forward batches to an HTTP ingestion endpoint.
    Http(HttpBackendConfig),

    /// Discard batches after counting them. Useful for development.
    Blackhole,
}

/// HTTP backend configuration.
#[derive(Deserialize)]
pub struct HttpBackendConfig {
    /// The URL batches are delivered to.
    pub endpoint: String,

    /// API token sent with every request.
    ///
    /// Defaults to unset (no token header).
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout, in seconds.
    ///
    /// Defaults to 10 seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    10
}
