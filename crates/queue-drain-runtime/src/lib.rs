//! # Queue Drain Runtime
//!
//! Queue client runtime for receiving, displaying and deleting messages from
//! Azure Storage Queues, with an in-memory provider for tests.
//!
//! This library provides:
//! - Provider-agnostic queue operations behind the [`QueueClient`] trait
//! - An Azure Storage Queue provider speaking the REST API directly
//! - Connection string parsing with redacted secrets
//! - Retry policies with exponential backoff for transient failures
//! - The drain pass: receive a batch, print each message, delete it
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Message structures and receipt handles
//! - [`credentials`] - Connection strings and account secrets
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Client traits and implementations
//! - [`providers`] - Azure Storage and in-memory providers
//! - [`retry`] - Retry policy
//! - [`drain`] - The receive/display/acknowledge pass

// Module declarations
pub mod client;
pub mod credentials;
pub mod drain;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;
pub mod retry;

// Re-export commonly used types at crate root for convenience
pub use client::{QueueClient, QueueClientFactory, QueueProvider, StandardQueueClient};
pub use credentials::{AccountKey, SasToken, StorageAuth, StorageCredentials};
pub use drain::{drain_queue, DrainError, DrainOptions, DrainReport, BANNER};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{
    MessageEncoding, MessageId, QueueName, ReceiptHandle, ReceivedMessage, SendOptions, Timestamp,
};
pub use provider::{
    AzureStorageConfig, InMemoryConfig, ProviderConfig, ProviderType, QueueConfig,
};
pub use providers::{AzureError, AzureStorageProvider, InMemoryProvider};
pub use retry::RetryPolicy;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
