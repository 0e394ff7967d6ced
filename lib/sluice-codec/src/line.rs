use nom::{
    bytes::complete::{tag, take_while1},
    combinator::{all_consuming, rest},
    number::complete::double,
    sequence::separated_pair,
    IResult, Parser as _,
};
use sluice_event::{sanitize, BuildError, Event, EventBuilder, MetricType};
use snafu::Snafu;

/// A recoverable decode anomaly.
///
/// Anomalies are recorded against a line without aborting it: the affected field falls back to its documented default
/// (or the offending item is skipped) and decoding continues. Each anomaly maps to a diagnostic category used for
/// self-metric tagging.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Anomaly {
    /// The value token did not parse as a float; the value defaulted to `0.0`.
    MalformedValue,

    /// The `@`-prefixed token did not parse as a float; the sample rate defaulted to `1.0`.
    InvalidSampleFactor,

    /// The type token was not a known metric type at the point a sampling token was seen.
    IllegalMetricType,

    /// A tag item had no key/value separator or an empty value, and was dropped.
    MalformedTag,

    /// A metadata component was empty and was skipped.
    EmptyMetadataComponent,

    /// A metadata component had an unrecognized leading character and was skipped.
    UnknownMetadataComponentType,
}

impl Anomaly {
    /// Returns the diagnostic category for this anomaly.
    pub fn category(&self) -> &'static str {
        match self {
            Self::MalformedValue | Self::MalformedTag | Self::EmptyMetadataComponent => "malformed_value",
            Self::InvalidSampleFactor => "invalid_sample_factor",
            Self::IllegalMetricType => "illegal_metric_type",
            Self::UnknownMetadataComponentType => "unknown_metadata_component_type",
        }
    }
}

/// Line-fatal decode error.
///
/// Any of these discards the line's in-progress event: the line yields zero events, and decoding of other lines in the
/// same batch is unaffected.
#[derive(Debug, PartialEq, Snafu)]
#[snafu(context(suffix(false)))]
pub enum LineError {
    /// The line had no `:` separator, or an empty name segment.
    #[snafu(display("invalid line format: '{}'", line))]
    InvalidLineFormat {
        /// The offending line.
        line: String,
    },

    /// The metadata segment had fewer than 2 or more than 4 components.
    #[snafu(display("malformed metadata: {} components in '{}'", components, metadata))]
    MalformedMetadata {
        /// The number of components found.
        components: usize,

        /// The offending metadata segment.
        metadata: String,
    },

    /// The type token did not resolve to a known metric type at build time.
    #[snafu(display("unknown metric type '{}'", token))]
    UnknownMetricType {
        /// The unresolvable token.
        token: String,

        /// Anomalies recorded for the line before the failure.
        anomalies: Vec<Anomaly>,
    },
}

impl LineError {
    /// Returns the diagnostic category for this error.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidLineFormat { .. } => "invalid_line_format",
            Self::MalformedMetadata { .. } => "malformed_metadata",
            Self::UnknownMetricType { .. } => "illegal_event",
        }
    }

    /// Returns the anomalies recorded for the line before it failed.
    pub fn anomalies(&self) -> &[Anomaly] {
        match self {
            Self::UnknownMetricType { anomalies, .. } => anomalies,
            _ => &[],
        }
    }
}

/// The result of decoding one line.
#[derive(Debug)]
pub struct DecodedLine {
    /// The events built from the line, in source order.
    ///
    /// The current grammar yields at most one event per line, but the contract is a sequence so that multi-value
    /// payloads can be added without changing callers.
    pub events: Vec<Event>,

    /// The recoverable anomalies recorded while decoding.
    pub anomalies: Vec<Anomaly>,
}

/// Returns the raw name segment of a line: the text before the first `:`, or the whole line when no separator is
/// present.
///
/// This is the value handed to the mapping pre-filter, before any decoding work is spent on the line.
pub fn raw_name(line: &str) -> &str {
    line.split_once(':').map(|(name, _)| name).unwrap_or(line)
}

/// Decodes one StatsD/DogStatsD line into canonical events.
///
/// The expected grammar is `<name>:<value>|<type>[|@<sample-rate>][|#<tag>:<value>,...]`. Malformed values, sampling
/// factors, and tag items degrade to their documented defaults and are reported as [`Anomaly`] entries; structural
/// failures abort the line with a [`LineError`].
pub fn decode_line(line: &str) -> Result<DecodedLine, LineError> {
    let (name, metadata) = split_line(line).ok_or_else(|| InvalidLineFormat { line }.build())?;

    let components = metadata.split('|').collect::<Vec<_>>();
    if !(2..=4).contains(&components.len()) {
        return MalformedMetadata {
            components: components.len(),
            metadata,
        }
        .fail();
    }

    let mut anomalies = Vec::new();

    let value = match parse_float(components[0]) {
        Some(value) => value,
        None => {
            anomalies.push(Anomaly::MalformedValue);
            0.0
        }
    };

    let type_token = components[1];
    let mut sample_rate = 1.0;
    let mut builder = Event::builder(sanitize(name)).value(value);

    for component in &components[2..] {
        if component.is_empty() {
            anomalies.push(Anomaly::EmptyMetadataComponent);
            continue;
        }

        match component.as_bytes()[0] {
            // Sample rate: the fraction of real occurrences this sample represents. The type token is only
            // cross-checked against the known set on this path, matching the backend's historical diagnostics.
            b'@' => {
                if MetricType::from_token(type_token).is_none() {
                    anomalies.push(Anomaly::IllegalMetricType);
                }

                match parse_float(&component[1..]) {
                    Some(rate) => sample_rate = rate,
                    None => anomalies.push(Anomaly::InvalidSampleFactor),
                }
            }
            // Tags: comma-separated `key:value` items.
            b'#' => {
                builder = decode_tags(&component[1..], builder, &mut anomalies);
            }
            _ => anomalies.push(Anomaly::UnknownMetadataComponentType),
        }
    }

    match builder.sample_rate(sample_rate).build(type_token) {
        Ok(event) => Ok(DecodedLine {
            events: vec![event],
            anomalies,
        }),
        Err(BuildError::UnknownMetricType { token }) => UnknownMetricType { token, anomalies }.fail(),
        Err(BuildError::EmptyName) => InvalidLineFormat { line }.fail(),
    }
}

fn split_line(line: &str) -> Option<(&str, &str)> {
    let result: IResult<&str, (&str, &str)> =
        separated_pair(take_while1(|c| c != ':'), tag(":"), rest).parse(line);

    result.ok().map(|(_, parts)| parts)
}

fn parse_float(token: &str) -> Option<f64> {
    let result: IResult<&str, f64> = all_consuming(double).parse(token);

    result.ok().map(|(_, value)| value)
}

fn decode_tags(block: &str, mut builder: EventBuilder, anomalies: &mut Vec<Anomaly>) -> EventBuilder {
    for item in block.split(',') {
        match item.split_once(':') {
            Some((key, value)) if !value.is_empty() => {
                // Duplicate keys: last occurrence wins.
                builder = builder.tag(sanitize(key), sanitize(value));
            }
            _ => anomalies.push(Anomaly::MalformedTag),
        }
    }

    builder
}
