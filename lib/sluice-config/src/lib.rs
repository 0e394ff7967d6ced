//! Primitives for loading and querying typed configuration data.
#![deny(warnings)]
#![deny(missing_docs)]

use figment::error::Kind;
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::{Figment, Provider as _};
use serde::de::DeserializeOwned;
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("environment variable prefix must not be empty"))]
    EmptyPrefix,

    /// A configuration file could not be read.
    #[snafu(display("failed to read configuration file '{}': {}", path, source))]
    FailedToReadFile {
        /// Path of the unreadable file.
        path: String,

        /// Error source.
        source: std::io::Error,
    },

    /// Requested field was missing from the configuration.
    #[snafu(display("missing field '{}' in configuration", field))]
    MissingField {
        /// Name of the missing field.
        field: String,
    },

    /// Requested field's value was not of the expected data type.
    #[snafu(display(
        "expected value for field '{}' to be '{}', got '{}' instead",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Period-separated path to the invalid field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Generic configuration error.
    #[snafu(display("failed to query configuration"))]
    Generic {
        /// Error source.
        source: figment::Error,
    },
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        match e.kind {
            Kind::InvalidType(actual_ty, expected_ty) => Self::InvalidFieldType {
                field: e.path.join("."),
                expected_ty,
                actual_ty: actual_ty.to_string(),
            },
            Kind::MissingField(field) => Self::MissingField {
                field: field.to_string(),
            },
            _ => Self::Generic { source: e },
        }
    }
}

/// A configuration loader that can pull from multiple sources.
///
/// Thin wrapper around `figment` exposing the two sources this application supports -- a YAML file and prefixed
/// environment variables -- with an implicit priority based on the order in which sources are added: sources added
/// later take precedence over sources added prior.
#[derive(Default)]
pub struct ConfigurationLoader {
    figment: Figment,
}

impl ConfigurationLoader {
    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or is not valid YAML, an error is returned. YAML validity is checked lazily, at
    /// extraction time.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<std::path::Path>,
    {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).context(FailedToReadFile {
            path: path.display().to_string(),
        })?;

        self.figment = self.figment.merge(Yaml::string(&raw));
        Ok(self)
    }

    /// Attempts to load the given YAML configuration file, ignoring any errors.
    pub fn try_from_yaml<P>(self, path: P) -> Self
    where
        P: AsRef<std::path::Path>,
    {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => Self {
                figment: self.figment.merge(Yaml::string(&raw)),
            },
            Err(e) => {
                debug!(error = %e, file_path = %path.as_ref().to_string_lossy(), "Unable to read YAML configuration file. Ignoring.");
                self
            }
        }
    }

    /// Loads raw YAML configuration data.
    ///
    /// Primarily useful when configuration is delivered through a channel that is not a file, such as a single
    /// environment variable holding an entire document.
    pub fn from_yaml_string(mut self, raw: &str) -> Self {
        self.figment = self.figment.merge(Yaml::string(raw));
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// The prefix given has an underscore appended to it if it does not already end with one: with a prefix of
    /// `SLUICE`, any environment variable starting with `SLUICE_` is matched. The prefix is case-insensitive.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error is returned.
    pub fn from_environment(mut self, prefix: &'static str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return EmptyPrefix.fail();
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_string()
        } else {
            format!("{}_", prefix)
        };

        // `Env` isn't `Send + Sync`, so its values are snapshotted through `Serialized` instead of holding on to the
        // provider itself.
        let env = Env::prefixed(&prefix);
        let values = env.data()?;
        if let Some(dict) = values.get(&figment::Profile::Default) {
            self.figment = self.figment.merge(Serialized::defaults(dict.clone()));
        }

        Ok(self)
    }

    /// Consumes the loader, returning the merged configuration.
    pub fn into_generic(self) -> GenericConfiguration {
        GenericConfiguration { figment: self.figment }
    }
}

/// Merged configuration data, queryable as typed values.
pub struct GenericConfiguration {
    figment: Figment,
}

impl GenericConfiguration {
    /// Deserializes the entire configuration as `T`.
    ///
    /// # Errors
    ///
    /// If a field is missing, or a field's value is not of the expected type, an error with the field's path is
    /// returned.
    pub fn as_typed<T>(&self) -> Result<T, ConfigurationError>
    where
        T: DeserializeOwned,
    {
        self.figment.extract().map_err(Into::into)
    }
}
