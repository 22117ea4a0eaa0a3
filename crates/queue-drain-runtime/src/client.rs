//! Client traits and implementations for queue operations.

use crate::error::{QueueError, ValidationError};
use crate::message::{MessageId, QueueName, ReceiptHandle, ReceivedMessage, SendOptions};
use crate::provider::{InMemoryConfig, ProviderConfig, ProviderType, QueueConfig};
use crate::providers::{AzureStorageProvider, InMemoryProvider};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use std::future::Future;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Main interface for queue operations across all providers
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Create queue if it does not exist; returns `true` when it was created
    async fn create_queue(&self, queue: &QueueName) -> Result<bool, QueueError>;

    /// Put a single message on the queue
    async fn send_message(
        &self,
        queue: &QueueName,
        body: Bytes,
        options: SendOptions,
    ) -> Result<MessageId, QueueError>;

    /// Receive up to `max_messages` currently visible messages
    ///
    /// A single call may return fewer messages than are pending, including none.
    async fn receive_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete the delivery identified by `receipt`
    async fn delete_message(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Interface implemented by specific queue providers (Azure Storage, in-memory)
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Create queue
    async fn create_queue(&self, queue: &QueueName) -> Result<bool, QueueError>;

    /// Put single message
    async fn send_message(
        &self,
        queue: &QueueName,
        body: &Bytes,
        options: &SendOptions,
    ) -> Result<MessageId, QueueError>;

    /// Receive a batch of messages
    async fn receive_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete message using its pop receipt
    async fn delete_message(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Get maximum batch size
    fn max_batch_size(&self) -> u32;
}

/// Factory for creating queue clients with appropriate providers
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create queue client from configuration
    pub async fn create_client(config: QueueConfig) -> Result<Box<dyn QueueClient>, QueueError> {
        let provider: Box<dyn QueueProvider> = match &config.provider {
            ProviderConfig::InMemory(in_memory_config) => {
                Box::new(InMemoryProvider::new(in_memory_config.clone()))
            }
            ProviderConfig::AzureStorage(azure_config) => Box::new(
                AzureStorageProvider::new(azure_config.clone(), config.request_timeout)
                    .map_err(|e| e.to_queue_error())?,
            ),
        };

        Ok(Box::new(StandardQueueClient::new(provider, config)))
    }

    /// Create test client with in-memory provider
    pub fn create_test_client() -> Box<dyn QueueClient> {
        let provider = InMemoryProvider::new(InMemoryConfig::default());
        let config = QueueConfig::default();
        Box::new(StandardQueueClient::new(Box::new(provider), config))
    }
}

/// Standard queue client implementation
///
/// Validates arguments against provider limits and retries transient
/// failures according to the configured [`RetryPolicy`](crate::RetryPolicy).
pub struct StandardQueueClient {
    provider: Box<dyn QueueProvider>,
    config: QueueConfig,
}

impl StandardQueueClient {
    /// Create new standard queue client with provider
    pub fn new(provider: Box<dyn QueueProvider>, config: QueueConfig) -> Self {
        Self { provider, config }
    }

    /// Run `call` until it succeeds, fails permanently or retries run out
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        let policy = &self.config.retry_policy;
        let mut attempt = 0;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.should_retry() && policy.should_retry(attempt) => {
                    attempt += 1;
                    let hint = e.retry_after().and_then(|d| d.to_std().ok());
                    let delay = policy.delay_for(attempt, hint);

                    warn!(
                        operation = operation,
                        attempt = attempt,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient queue failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt > 0 {
                        debug!(operation = operation, attempt = attempt, "Giving up after retries");
                    }
                    return Err(e);
                }
            }
        }
    }

    fn validate_batch_size(&self, max_messages: u32) -> Result<(), QueueError> {
        let max_size = self.provider.max_batch_size();
        if max_messages == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_messages".to_string(),
                message: format!("must be between 1 and {}", max_size),
            }
            .into());
        }
        if max_messages > max_size {
            return Err(QueueError::BatchTooLarge {
                size: max_messages as usize,
                max_size: max_size as usize,
            });
        }
        Ok(())
    }

    fn validate_visibility_timeout(&self, timeout: Option<Duration>) -> Result<(), QueueError> {
        if let Some(timeout) = timeout {
            let max = self.provider.provider_type().max_visibility_timeout();
            if timeout <= Duration::zero() || timeout > max {
                return Err(ValidationError::OutOfRange {
                    field: "visibility_timeout".to_string(),
                    message: format!("must be between 1 and {} seconds", max.num_seconds()),
                }
                .into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueClient for StandardQueueClient {
    async fn create_queue(&self, queue: &QueueName) -> Result<bool, QueueError> {
        self.with_retry("create_queue", || self.provider.create_queue(queue))
            .await
    }

    async fn send_message(
        &self,
        queue: &QueueName,
        body: Bytes,
        options: SendOptions,
    ) -> Result<MessageId, QueueError> {
        self.with_retry("send_message", || {
            self.provider.send_message(queue, &body, &options)
        })
        .await
    }

    async fn receive_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.validate_batch_size(max_messages)?;
        self.validate_visibility_timeout(visibility_timeout)?;

        self.with_retry("receive_batch", || {
            self.provider
                .receive_batch(queue, max_messages, visibility_timeout)
        })
        .await
    }

    async fn delete_message(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.with_retry("delete_message", || {
            self.provider.delete_message(queue, receipt)
        })
        .await
    }

    fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }
}
