//! Canonical metric event model.
#![deny(warnings)]
#![deny(missing_docs)]

mod event;
pub use self::event::{BuildError, Event, EventBuilder, MetricType};

mod sanitize;
pub use self::sanitize::sanitize;
