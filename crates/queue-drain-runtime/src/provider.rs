//! Provider types and configuration.

use crate::credentials::StorageCredentials;
use crate::message::MessageEncoding;
use crate::retry::RetryPolicy;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    AzureStorage,
    InMemory,
}

impl ProviderType {
    /// Get maximum encoded message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AzureStorage => 64 * 1024,
            Self::InMemory => 64 * 1024,
        }
    }

    /// Get maximum number of messages returned by one receive call
    pub fn max_batch_size(&self) -> u32 {
        match self {
            Self::AzureStorage => 32,
            Self::InMemory => 32,
        }
    }

    /// Get maximum visibility timeout accepted on receive
    pub fn max_visibility_timeout(&self) -> Duration {
        Duration::days(7)
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AzureStorage => write!(f, "AzureStorage"),
            Self::InMemory => write!(f, "InMemory"),
        }
    }
}

/// Configuration for queue client initialization
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub provider: ProviderConfig,
    pub request_timeout: std::time::Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::InMemory(InMemoryConfig::default()),
            request_timeout: std::time::Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    AzureStorage(AzureStorageConfig),
    InMemory(InMemoryConfig),
}

/// Azure Storage Queue configuration
#[derive(Debug, Clone)]
pub struct AzureStorageConfig {
    pub credentials: StorageCredentials,
    pub encoding: MessageEncoding,
}

impl AzureStorageConfig {
    /// Create configuration with the default (text) message encoding
    pub fn new(credentials: StorageCredentials) -> Self {
        Self {
            credentials,
            encoding: MessageEncoding::default(),
        }
    }

    /// Set message encoding
    pub fn with_encoding(mut self, encoding: MessageEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    pub max_queue_size: usize,
    pub default_visibility_timeout: Duration,
    pub default_message_ttl: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            default_visibility_timeout: Duration::seconds(30),
            default_message_ttl: Duration::days(7),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
