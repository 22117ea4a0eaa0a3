//! In-memory queue provider implementation for testing and development.
//!
//! This module provides an in-memory queue that behaves like a storage queue:
//! - Queues must be created before use
//! - Receiving hides messages for a visibility timeout and issues a fresh pop
//!   receipt per delivery
//! - Deleting requires the pop receipt of the latest delivery
//! - Messages expire after their time-to-live
//!
//! Clones share the same storage, so a test can seed messages through one
//! handle while the code under test drains through another.

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{
    MessageId, QueueName, ReceiptHandle, ReceivedMessage, SendOptions, Timestamp,
};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    config: InMemoryConfig,
}

impl QueueStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            config,
        }
    }

    fn queue_mut(&mut self, queue_name: &QueueName) -> Result<&mut InMemoryQueue, QueueError> {
        self.queues
            .get_mut(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: queue_name.to_string(),
            })
    }
}

/// Internal queue state for a single queue, in insertion order
#[derive(Default)]
struct InMemoryQueue {
    messages: Vec<StoredMessage>,
}

impl InMemoryQueue {
    fn purge_expired(&mut self) {
        let now = Timestamp::now();
        self.messages.retain(|m| now < m.expires_at);
    }
}

/// A message stored in the queue with delivery metadata
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    inserted_at: Timestamp,
    expires_at: Timestamp,
    visible_at: Timestamp,
    dequeue_count: u32,
    /// Receipt of the most recent delivery
    pop_receipt: Option<String>,
}

fn lock_error<T>(_: PoisonError<T>) -> QueueError {
    QueueError::ProviderError {
        provider: ProviderType::InMemory.to_string(),
        code: "LockPoisoned".to_string(),
        message: "queue storage lock poisoned".to_string(),
        transient: false,
    }
}

fn offset(duration: Duration) -> Timestamp {
    Timestamp::from_datetime(Timestamp::now().as_datetime() + duration)
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation
#[derive(Clone)]
pub struct InMemoryProvider {
    storage: Arc<RwLock<QueueStorage>>,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::new(config))),
        }
    }

    /// Number of unexpired messages in a queue, visible or not
    pub fn approximate_message_count(&self, queue: &QueueName) -> Result<usize, QueueError> {
        let mut storage = self.storage.write().map_err(lock_error)?;
        let queue = storage.queue_mut(queue)?;
        queue.purge_expired();
        Ok(queue.messages.len())
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl std::fmt::Debug for InMemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn create_queue(&self, queue: &QueueName) -> Result<bool, QueueError> {
        let mut storage = self.storage.write().map_err(lock_error)?;
        if storage.queues.contains_key(queue) {
            return Ok(false);
        }

        storage.queues.insert(queue.clone(), InMemoryQueue::default());
        debug!(queue = %queue, "Created in-memory queue");
        Ok(true)
    }

    async fn send_message(
        &self,
        queue: &QueueName,
        body: &Bytes,
        options: &SendOptions,
    ) -> Result<MessageId, QueueError> {
        let max_size = self.provider_type().max_message_size();
        if body.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: body.len(),
                max_size,
            });
        }

        let mut storage = self.storage.write().map_err(lock_error)?;
        let max_queue_size = storage.config.max_queue_size;
        let ttl = options
            .time_to_live
            .unwrap_or(storage.config.default_message_ttl);

        let queue_state = storage.queue_mut(queue)?;
        queue_state.purge_expired();

        if queue_state.messages.len() >= max_queue_size {
            return Err(QueueError::ProviderError {
                provider: ProviderType::InMemory.to_string(),
                code: "QueueFull".to_string(),
                message: format!("queue '{}' holds {} messages", queue, max_queue_size),
                transient: false,
            });
        }

        let message_id = MessageId::new();
        let now = Timestamp::now();
        queue_state.messages.push(StoredMessage {
            message_id: message_id.clone(),
            body: body.clone(),
            inserted_at: now.clone(),
            expires_at: offset(ttl),
            visible_at: options
                .initial_visibility_delay
                .map(offset)
                .unwrap_or(now),
            dequeue_count: 0,
            pop_receipt: None,
        });

        Ok(message_id)
    }

    async fn receive_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut storage = self.storage.write().map_err(lock_error)?;
        let visibility_timeout =
            visibility_timeout.unwrap_or(storage.config.default_visibility_timeout);

        let queue_state = storage.queue_mut(queue)?;
        queue_state.purge_expired();

        let now = Timestamp::now();
        let next_visible_at = offset(visibility_timeout);
        let mut received = Vec::new();

        for stored in queue_state
            .messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max_messages as usize)
        {
            let pop_receipt = uuid::Uuid::new_v4().to_string();
            stored.pop_receipt = Some(pop_receipt.clone());
            stored.visible_at = next_visible_at.clone();
            stored.dequeue_count += 1;

            received.push(ReceivedMessage {
                message_id: stored.message_id.clone(),
                body: stored.body.clone(),
                receipt_handle: ReceiptHandle::new(
                    stored.message_id.clone(),
                    pop_receipt,
                    next_visible_at.clone(),
                    ProviderType::InMemory,
                ),
                dequeue_count: stored.dequeue_count,
                inserted_at: Some(stored.inserted_at.clone()),
                expires_at: Some(stored.expires_at.clone()),
            });
        }

        Ok(received)
    }

    async fn delete_message(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let mut storage = self.storage.write().map_err(lock_error)?;
        let queue_state = storage.queue_mut(queue)?;

        let position = queue_state.messages.iter().position(|m| {
            &m.message_id == receipt.message_id()
                && m.pop_receipt.as_deref() == Some(receipt.pop_receipt())
        });

        match position {
            Some(index) => {
                queue_state.messages.remove(index);
                Ok(())
            }
            None => Err(QueueError::MessageNotFound {
                receipt: receipt.message_id().to_string(),
            }),
        }
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn max_batch_size(&self) -> u32 {
        ProviderType::InMemory.max_batch_size()
    }
}
