//! Dialer configuration.
//!
//! Loaded from a JSON document (every field optional) and then adjusted by
//! environment variables. The dialer never starts with an invalid config:
//! all validation happens at load time.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default bound on the whole dial (upgrade plus both channel opens).
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on the size of a remote-reported error message.
pub const DEFAULT_MAX_ERROR_MESSAGE_BYTES: usize = 64 * 1024;

/// Environment variable overriding the dial timeout, in whole seconds.
/// `0` disables the timeout.
pub const DIAL_TIMEOUT_ENV: &str = "PORTDIAL_DIAL_TIMEOUT_SECS";

/// Errors produced while loading a [`DialerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("reading config file {path}: {source}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON for [`DialerConfig`].
    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value parsed but is not acceptable.
    #[error("invalid config value for {field}: {message}")]
    Invalid {
        /// Offending field or environment variable.
        field: &'static str,
        /// Description of the problem.
        message: String,
    },
}

/// Settings shared by every dial a [`crate::Dialer`] performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DialerConfig {
    /// Bound on the whole dial in seconds. `None` waits for cancellation only.
    #[serde(rename = "dial_timeout_secs", with = "duration_secs")]
    pub dial_timeout: Option<Duration>,

    /// Largest error-channel payload kept for logging; longer reports are
    /// truncated.
    pub max_error_message_bytes: usize,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Some(DEFAULT_DIAL_TIMEOUT),
            max_error_message_bytes: DEFAULT_MAX_ERROR_MESSAGE_BYTES,
        }
    }
}

impl DialerConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Applies [`DIAL_TIMEOUT_ENV`] from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up through `lookup`.
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(raw) = lookup(DIAL_TIMEOUT_ENV) {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                field: DIAL_TIMEOUT_ENV,
                message: format!("{raw:?} is not a whole number of seconds"),
            })?;
            self.dial_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_error_message_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_error_message_bytes",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.dial_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid {
                field: "dial_timeout_secs",
                message: "must be greater than zero; omit it to disable the timeout".to_string(),
            });
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        secs.map(|s| Duration::try_from_secs_f64(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
