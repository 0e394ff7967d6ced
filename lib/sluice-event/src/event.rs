use std::collections::HashMap;
use std::fmt;

use snafu::Snafu;

/// The type of a metric.
///
/// The set of types is fixed by the backend: counters for quantities aggregated over time, gauges for tracking the
/// latest value of a quantity, and timers for durations. A wire token that does not map to one of these is not a
/// metric this bridge can forward.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MetricType {
    /// A monotonic count, wire token `c`.
    Counter,

    /// A point-in-time value, wire token `g`.
    Gauge,

    /// A duration measurement in milliseconds, wire token `ms`.
    Timer,
}

impl MetricType {
    /// Resolves a wire token to a metric type, if the token is known.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "c" => Some(Self::Counter),
            "g" => Some(Self::Gauge),
            "ms" => Some(Self::Timer),
            _ => None,
        }
    }

    /// Returns the wire token for this metric type.
    pub fn as_token(&self) -> &'static str {
        match self {
            Self::Counter => "c",
            Self::Gauge => "g",
            Self::Timer => "ms",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Event building error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum BuildError {
    /// The type token did not resolve to a known metric type.
    #[snafu(display("unknown metric type '{}'", token))]
    UnknownMetricType {
        /// The unresolvable token.
        token: String,
    },

    /// The metric name was empty.
    #[snafu(display("metric name must not be empty"))]
    EmptyName,
}

/// A canonical metric event.
///
/// An `Event` is the validated, sanitized, typed representation of one metric sample, ready for dispatch to the
/// backend. Events are immutable once built: there are no mutators, and the transforming methods ([`renamed`][Self::renamed],
/// [`with_tag`][Self::with_tag]) consume the event and return a new one, so ownership moves forward through the
/// pipeline without shared references.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    name: String,
    metric_type: MetricType,
    value: f64,
    sample_rate: f64,
    tags: HashMap<String, String>,
}

impl Event {
    /// Starts building an event with the given (already sanitized) name.
    pub fn builder(name: impl Into<String>) -> EventBuilder {
        EventBuilder {
            name: name.into(),
            value: 0.0,
            sample_rate: 1.0,
            tags: HashMap::new(),
        }
    }

    /// Gets the metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the metric type.
    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    /// Gets the metric value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Gets the sample rate.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Gets the tags.
    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    /// Consumes this event, returning one with the given name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Consumes this event, returning one with the given tag added.
    ///
    /// An existing tag with the same key is overwritten.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}|{}", self.name, self.value, self.metric_type)?;

        if self.sample_rate != 1.0 {
            write!(f, "|@{}", self.sample_rate)?;
        }

        if !self.tags.is_empty() {
            // Tags are rendered in key order so the output is stable.
            let mut tags = self.tags.iter().collect::<Vec<_>>();
            tags.sort();

            f.write_str("|#")?;
            for (i, (key, value)) in tags.into_iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}:{}", key, value)?;
            }
        }

        Ok(())
    }
}

/// Builder for [`Event`].
pub struct EventBuilder {
    name: String,
    value: f64,
    sample_rate: f64,
    tags: HashMap<String, String>,
}

impl EventBuilder {
    /// Sets the metric value.
    ///
    /// Defaults to `0.0`.
    pub fn value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    /// Sets the sample rate.
    ///
    /// Defaults to `1.0`.
    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Adds a single tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Replaces the tag set wholesale.
    pub fn tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Resolves the given type token and builds the event.
    ///
    /// # Errors
    ///
    /// If the type token does not resolve to a known [`MetricType`], or the name is empty, an error is returned.
    pub fn build(self, type_token: &str) -> Result<Event, BuildError> {
        if self.name.is_empty() {
            return EmptyName.fail();
        }

        let metric_type = MetricType::from_token(type_token)
            .ok_or_else(|| UnknownMetricType { token: type_token }.build())?;

        Ok(Event {
            name: self.name,
            metric_type,
            value: self.value,
            sample_rate: self.sample_rate,
            tags: self.tags,
        })
    }
}
