//! Layered configuration for the queue-drain CLI.
//!
//! Sources are applied in order, later sources overriding earlier ones:
//!  1. `queue-drain.toml` in the working directory (optional)
//!  2. The file given by `--config` / `QUEUE_DRAIN_CONFIG` (required when given)
//!  3. Environment variables prefixed `QUEUE_DRAIN__` with `__` as the nesting
//!     separator, e.g. `QUEUE_DRAIN__DRAIN__BATCH_SIZE=5`
//!  4. Command-line flags, applied by the caller after loading

use queue_drain_runtime::{
    AzureStorageConfig, MessageEncoding, ProviderConfig, ProviderType, QueueConfig, QueueName,
    RetryPolicy, StorageCredentials, ValidationError,
};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "queue-drain.toml";

/// Prefix for configuration environment variables
pub const ENV_PREFIX: &str = "QUEUE_DRAIN";

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid connection string: {0}")]
    ConnectionString(#[from] queue_drain_runtime::ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Fully merged application configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Storage account connection string
    pub connection_string: Option<String>,

    /// Queue to drain or send to
    pub queue_name: String,

    /// How message payloads are stored in the queue
    pub encoding: MessageEncoding,

    pub drain: DrainSettings,
    pub http: HttpSettings,
    pub retry: RetrySettings,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            queue_name: "orders".to_string(),
            encoding: MessageEncoding::Text,
            drain: DrainSettings::default(),
            http: HttpSettings::default(),
            retry: RetrySettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("queue_name", &self.queue_name)
            .field("encoding", &self.encoding)
            .field("drain", &self.drain)
            .field("http", &self.http)
            .field("retry", &self.retry)
            .field("logging", &self.logging)
            .finish()
    }
}

/// Drain pass settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DrainSettings {
    pub batch_size: u32,
    pub visibility_timeout_seconds: Option<u64>,
    pub until_empty: bool,
    pub max_batches: u32,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            visibility_timeout_seconds: None,
            until_empty: false,
            max_batches: 100,
        }
    }
}

/// HTTP client settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_seconds: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
        }
    }
}

/// Retry settings for transient failures
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "json")]
    Json,
}

impl AppConfig {
    /// Load configuration from the working directory, an optional explicit
    /// file and the environment
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE), explicit)
    }

    /// Load configuration using `default_file` as the optional base file
    pub fn load_from(default_file: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder().add_source(
            config::File::from(default_file)
                .required(false)
                .format(config::FileFormat::Toml),
        );

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Check merged values before any queue call is made
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.connection_string.as_deref() {
            None | Some("") => {
                return Err(ConfigError::MissingRequired {
                    key: "connection_string".to_string(),
                })
            }
            Some(_) => {}
        }

        self.queue_name()?;

        let max_batch = ProviderType::AzureStorage.max_batch_size();
        if self.drain.batch_size == 0 || self.drain.batch_size > max_batch {
            return Err(ConfigError::InvalidValue {
                key: "drain.batch_size".to_string(),
                message: format!("must be between 1 and {}", max_batch),
            });
        }

        if self.drain.max_batches == 0 {
            return Err(ConfigError::InvalidValue {
                key: "drain.max_batches".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if let Some(seconds) = self.drain.visibility_timeout_seconds {
            let max = ProviderType::AzureStorage
                .max_visibility_timeout()
                .num_seconds() as u64;
            if seconds == 0 || seconds > max {
                return Err(ConfigError::InvalidValue {
                    key: "drain.visibility_timeout_seconds".to_string(),
                    message: format!("must be between 1 and {}", max),
                });
            }
        }

        if self.http.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "http.timeout_seconds".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "retry.initial_delay_ms".to_string(),
                message: "must not exceed retry.max_delay_ms".to_string(),
            });
        }

        Ok(())
    }

    /// Validated queue name
    pub fn queue_name(&self) -> Result<QueueName, ConfigError> {
        Ok(QueueName::new(self.queue_name.clone())?)
    }

    /// Visibility timeout for receives, if configured
    pub fn visibility_timeout(&self) -> Option<chrono::Duration> {
        self.drain
            .visibility_timeout_seconds
            .map(|s| chrono::Duration::seconds(s as i64))
    }

    /// Build the runtime client configuration
    pub fn queue_config(&self) -> Result<QueueConfig, ConfigError> {
        let connection_string =
            self.connection_string
                .as_deref()
                .ok_or_else(|| ConfigError::MissingRequired {
                    key: "connection_string".to_string(),
                })?;
        let credentials = StorageCredentials::from_connection_string(connection_string)?;

        Ok(QueueConfig {
            provider: ProviderConfig::AzureStorage(
                AzureStorageConfig::new(credentials).with_encoding(self.encoding),
            ),
            request_timeout: Duration::from_secs(self.http.timeout_seconds),
            retry_policy: RetryPolicy::new(
                self.retry.max_retries,
                Duration::from_millis(self.retry.initial_delay_ms),
                Duration::from_millis(self.retry.max_delay_ms),
            ),
        })
    }
}
