//! Message types for queue operations including core domain identifiers.

use crate::error::{SerializationError, ValidationError};
use crate::provider::ProviderType;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name following Azure Storage naming rules
///
/// 3-63 characters of lowercase ASCII letters, digits and hyphens. The name
/// must start and end with a letter or digit and may not contain consecutive
/// hyphens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.len() < 3 || name.len() > 63 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 3-63 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only lowercase ASCII letters, digits, and hyphens allowed".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(value: QueueName) -> Self {
        value.0
    }
}

/// Service-assigned identifier of a queued message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parse the RFC 1123 form used in storage service responses,
    /// e.g. `Fri, 09 Oct 2009 21:04:30 GMT`.
    pub fn from_rfc1123(s: &str) -> Result<Self, chrono::ParseError> {
        let dt = DateTime::parse_from_rfc2822(s)?;
        Ok(Self(dt.with_timezone(&Utc)))
    }

    /// Format in the RFC 1123 form expected by storage service headers
    pub fn to_rfc1123(&self) -> String {
        self.0.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Encoding
// ============================================================================

/// How message payloads are represented in the queue's `MessageText` field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageEncoding {
    /// Payload is stored as-is (XML-escaped on the wire)
    #[default]
    Text,
    /// Payload is stored base64-encoded
    Base64,
}

impl MessageEncoding {
    /// Turn a payload into the text stored in the queue
    pub fn encode(&self, body: &[u8]) -> Result<String, SerializationError> {
        match self {
            Self::Text => std::str::from_utf8(body)
                .map(str::to_string)
                .map_err(|_| SerializationError::InvalidUtf8),
            Self::Base64 => Ok(general_purpose::STANDARD.encode(body)),
        }
    }

    /// Turn stored message text back into the payload
    pub fn decode(&self, text: &str) -> Result<Bytes, SerializationError> {
        match self {
            Self::Text => Ok(Bytes::from(text.to_string())),
            Self::Base64 => general_purpose::STANDARD
                .decode(text.trim())
                .map(Bytes::from)
                .map_err(|e| SerializationError::InvalidBase64 {
                    message: e.to_string(),
                }),
        }
    }
}

impl FromStr for MessageEncoding {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "base64" => Ok(Self::Base64),
            other => Err(ValidationError::InvalidFormat {
                field: "encoding".to_string(),
                message: format!("unknown encoding '{}', expected text or base64", other),
            }),
        }
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message received from the queue with delivery metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub receipt_handle: ReceiptHandle,
    pub dequeue_count: u32,
    pub inserted_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
}

impl ReceivedMessage {
    /// Payload rendered as text, replacing invalid UTF-8 sequences
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Opaque token for acknowledging one delivery of a message
///
/// A receipt pairs the message id with the pop receipt issued for a single
/// delivery. Deleting requires both; a receipt from an earlier delivery of the
/// same message is rejected by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle {
    message_id: MessageId,
    pop_receipt: String,
    next_visible_at: Timestamp,
    provider_type: ProviderType,
}

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(
        message_id: MessageId,
        pop_receipt: String,
        next_visible_at: Timestamp,
        provider_type: ProviderType,
    ) -> Self {
        Self {
            message_id,
            pop_receipt,
            next_visible_at,
            provider_type,
        }
    }

    /// Identifier of the message this receipt belongs to
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Pop receipt string
    pub fn pop_receipt(&self) -> &str {
        &self.pop_receipt
    }

    /// Time at which the message becomes visible to other consumers again
    pub fn next_visible_at(&self) -> &Timestamp {
        &self.next_visible_at
    }

    /// Check if the visibility window has elapsed
    pub fn is_expired(&self) -> bool {
        Timestamp::now() >= self.next_visible_at
    }

    /// Get provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

// ============================================================================
// Send Options
// ============================================================================

/// Options for putting messages on a queue
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Delay before the message becomes visible
    pub initial_visibility_delay: Option<Duration>,
    /// Time-to-live before the service discards the message
    pub time_to_live: Option<Duration>,
}

impl SendOptions {
    /// Create new send options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide the message for `delay` after it is enqueued
    pub fn with_initial_visibility_delay(mut self, delay: Duration) -> Self {
        self.initial_visibility_delay = Some(delay);
        self
    }

    /// Set time-to-live for message expiration
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
