//! Runtime configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SignalError;

/// Largest accepted debounce, in milliseconds (`2^31 - 1`).
pub const MAX_DEBOUNCE_MS: u64 = 2_147_483_647;

/// Largest accepted debounce.
pub const MAX_DEBOUNCE: Duration = Duration::from_millis(MAX_DEBOUNCE_MS);

/// Check that `debounce` is a whole number of milliseconds within
/// `0..=MAX_DEBOUNCE`.
pub fn validate_debounce(debounce: Duration) -> Result<Duration, SignalError> {
    if debounce.subsec_nanos() % 1_000_000 != 0 || debounce > MAX_DEBOUNCE {
        return Err(SignalError::InvalidDebounce {
            nanos: debounce.as_nanos(),
        });
    }
    Ok(debounce)
}

/// How a runtime generates revision ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdStrategy {
    /// Time-ordered UUIDv7 strings.
    #[default]
    Uuid,
    /// A prefix followed by a zero-padded counter.
    Sequential {
        /// Prefix prepended to every id.
        #[serde(default)]
        prefix: String,
    },
}

/// Serializable runtime settings.
///
/// # Example
///
/// ```
/// # use synced_signal::{IdStrategy, RuntimeConfig};
/// let config = RuntimeConfig::from_json(
///     r#"{ "default_debounce_ms": 25, "ids": { "kind": "sequential", "prefix": "node-a/" } }"#,
/// )
/// .unwrap();
/// assert_eq!(config.default_debounce_ms, 25);
/// assert_eq!(config.ids, IdStrategy::Sequential { prefix: "node-a/".into() });
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Debounce given to new signals, in milliseconds.
    pub default_debounce_ms: u64,
    /// Revision id generation strategy.
    pub ids: IdStrategy,
}

/// Error loading a [`RuntimeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The document is not valid configuration JSON.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// The document parsed but holds an invalid value.
    #[error(transparent)]
    Invalid(#[from] SignalError),
}

impl RuntimeConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings.
    pub fn validate(&self) -> Result<(), SignalError> {
        self.default_debounce().map(|_| ())
    }

    /// The default debounce as a `Duration`.
    pub fn default_debounce(&self) -> Result<Duration, SignalError> {
        if self.default_debounce_ms > MAX_DEBOUNCE_MS {
            return Err(SignalError::InvalidDebounce {
                nanos: u128::from(self.default_debounce_ms) * 1_000_000,
            });
        }
        Ok(Duration::from_millis(self.default_debounce_ms))
    }
}
