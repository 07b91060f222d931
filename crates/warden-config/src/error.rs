//! Errors raised while loading the Warden configuration.

use std::io;

use thiserror::Error;

/// Why a configuration could not be produced.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read.
    #[error("cannot read config file {path}: {source}")]
    ReadError {
        /// File that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A config layer is not valid TOML, or does not fit the schema.
    #[error("cannot parse config {path}: {source}")]
    ParseError {
        /// File (or synthetic layer name) being parsed.
        path: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range or contradicts another value.
    #[error("invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `WARDEN_*` variable holds a value of the wrong type.
    #[error("environment variable {var_name}: {message}")]
    EnvError {
        /// The variable.
        var_name: String,
        /// What is wrong with it.
        message: String,
    },

    /// `~/.warden` cannot be located.
    #[error("cannot determine the home directory")]
    NoHomeDir,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
