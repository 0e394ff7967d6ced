//! StatsD/DogStatsD wire-format decoding.
//!
//! This crate is pure: it turns raw text lines into canonical events (plus decode diagnostics) and byte buffers into
//! lines, and performs no I/O of its own.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod framing;

mod line;
pub use self::line::{decode_line, raw_name, Anomaly, DecodedLine, LineError};
