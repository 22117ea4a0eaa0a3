//! Azure Storage Queue provider implementation using the HTTP REST API.
//!
//! This module talks to the queue service directly with `reqwest` instead of
//! going through an SDK, which keeps the request/response handling visible and
//! lets unit tests run against a mocked HTTP server.
//!
//! ## Operations
//!
//! - **Receive**: `GET /{queue}/messages?numofmessages=N&visibilitytimeout=S`
//! - **Delete**: `DELETE /{queue}/messages/{id}?popreceipt=R`
//! - **Put**: `POST /{queue}/messages` with a `<QueueMessage>` XML body
//! - **Create queue**: `PUT /{queue}`
//!
//! ## Authentication
//!
//! - **SharedKey**: every request is signed with HMAC-SHA256 over the
//!   canonical string-to-sign using the decoded account key
//! - **SharedAccessSignature**: the SAS query string is appended to every URL
//!
//! ## Example
//!
//! ```no_run
//! use queue_drain_runtime::{AzureStorageConfig, QueueClientFactory, QueueConfig, ProviderConfig, StorageCredentials};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = StorageCredentials::from_connection_string("UseDevelopmentStorage=true")?;
//! let config = QueueConfig {
//!     provider: ProviderConfig::AzureStorage(AzureStorageConfig::new(credentials)),
//!     ..Default::default()
//! };
//!
//! let client = QueueClientFactory::create_client(config).await?;
//! # Ok(())
//! # }
//! ```

use crate::client::QueueProvider;
use crate::credentials::{AccountKey, SasToken, StorageAuth};
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{MessageId, QueueName, ReceiptHandle, ReceivedMessage, SendOptions, Timestamp};
use crate::provider::{AzureStorageConfig, ProviderType};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use chrono::Duration;
use hmac::{Hmac, Mac};
use reqwest::{Client as HttpClient, Method};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument};
use url::Url;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

const PROVIDER_NAME: &str = "AzureStorage";
const STORAGE_API_VERSION: &str = "2021-12-02";
const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
const ERROR_CODE_HEADER: &str = "x-ms-error-code";

// ============================================================================
// Error Types
// ============================================================================

/// Azure Storage Queue specific errors
#[derive(Debug, thiserror::Error)]
pub enum AzureError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Message not found or pop receipt no longer valid: {0}")]
    MessageNotFound(String),

    #[error("Storage service error ({status} {code}): {message}")]
    ServiceError {
        status: u16,
        code: String,
        message: String,
        transient: bool,
    },

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AzureError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Authentication(_) => false,
            Self::NetworkError(_) => true,
            Self::Timeout(_) => true,
            Self::QueueNotFound(_) => false,
            Self::MessageNotFound(_) => false,
            Self::ServiceError { transient, .. } => *transient,
            Self::ConfigurationError(_) => false,
            Self::SerializationError(_) => false,
        }
    }

    /// Map Azure error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::Timeout(duration) => QueueError::Timeout {
                duration: Duration::from_std(duration).unwrap_or_else(|_| Duration::zero()),
            },
            Self::QueueNotFound(queue) => QueueError::QueueNotFound { queue_name: queue },
            Self::MessageNotFound(receipt) => QueueError::MessageNotFound { receipt },
            Self::ServiceError {
                status,
                code,
                message,
                transient,
            } => QueueError::ProviderError {
                provider: PROVIDER_NAME.to_string(),
                code: format!("{} {}", status, code),
                message,
                transient,
            },
            Self::ConfigurationError(msg) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message: msg })
            }
            Self::SerializationError(msg) => {
                QueueError::SerializationError(SerializationError::MalformedResponse {
                    message: msg,
                })
            }
        }
    }
}

/// Classify a failed response by status code and storage error code
fn classify_error(status: u16, code: &str, message: String, queue: &QueueName) -> AzureError {
    match code {
        "QueueNotFound" => AzureError::QueueNotFound(queue.to_string()),
        "MessageNotFound" | "PopReceiptMismatch" => AzureError::MessageNotFound(message),
        "AuthenticationFailed"
        | "AuthorizationFailure"
        | "AuthorizationPermissionMismatch"
        | "AuthorizationResourceTypeMismatch"
        | "InsufficientAccountPermissions"
        | "InvalidAuthenticationInfo"
        | "NoAuthenticationInformation" => {
            AzureError::Authentication(format!("{}: {}", code, message))
        }
        _ if status == 401 || status == 403 => {
            AzureError::Authentication(format!("{}: {}", code, message))
        }
        "ServerBusy" | "OperationTimedOut" | "InternalError" => AzureError::ServiceError {
            status,
            code: code.to_string(),
            message,
            transient: true,
        },
        _ => AzureError::ServiceError {
            status,
            code: code.to_string(),
            message,
            transient: status >= 500 || status == 408 || status == 429,
        },
    }
}

// ============================================================================
// Shared Key Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// Shared Key signer for storage service request authentication
///
/// The signature is an HMAC-SHA256, keyed with the decoded account key, over
/// a string made of the HTTP verb, the standard headers (empty when absent),
/// the canonicalized `x-ms-*` headers and the canonicalized resource.
///
/// ## References
///
/// - [Authorize with Shared Key](https://learn.microsoft.com/rest/api/storageservices/authorize-with-shared-key)
#[derive(Clone)]
struct SharedKeySigner {
    account_name: String,
    key: AccountKey,
}

impl SharedKeySigner {
    fn new(account_name: String, key: AccountKey) -> Self {
        Self { account_name, key }
    }

    /// Build the string-to-sign for a request
    ///
    /// `ms_headers` must contain every `x-ms-*` header sent with the request.
    fn string_to_sign(
        &self,
        method: &str,
        url: &Url,
        content_length: usize,
        content_type: &str,
        ms_headers: &BTreeMap<String, String>,
    ) -> String {
        // Zero length is signed as an empty string
        let content_length = if content_length == 0 {
            String::new()
        } else {
            content_length.to_string()
        };

        let canonical_headers: String = ms_headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k.to_ascii_lowercase(), v.trim()))
            .collect();

        format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}{}",
            method,
            content_length,
            content_type,
            canonical_headers,
            self.canonicalized_resource(url)
        )
    }

    /// `/{account}{path}` followed by `\nname:value` for each sorted query parameter
    fn canonicalized_resource(&self, url: &Url) -> String {
        let mut resource = format!("/{}{}", self.account_name, url.path());

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in url.query_pairs() {
            params
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value.into_owned());
        }

        for (name, mut values) in params {
            values.sort();
            resource.push_str(&format!("\n{}:{}", name, values.join(",")));
        }

        resource
    }

    /// Sign a string-to-sign and return the base64 signature
    fn sign(&self, string_to_sign: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.key.expose_bytes())
            .expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Build the `Authorization` header value for a request
    fn authorization_header(
        &self,
        method: &str,
        url: &Url,
        content_length: usize,
        content_type: &str,
        ms_headers: &BTreeMap<String, String>,
    ) -> String {
        let string_to_sign =
            self.string_to_sign(method, url, content_length, content_type, ms_headers);
        format!("SharedKey {}:{}", self.account_name, self.sign(&string_to_sign))
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Fields of one `<QueueMessage>` element as returned by the service
#[derive(Debug, Default)]
struct QueueMessageXml {
    message_id: Option<String>,
    insertion_time: Option<String>,
    expiration_time: Option<String>,
    pop_receipt: Option<String>,
    time_next_visible: Option<String>,
    dequeue_count: Option<String>,
    message_text: Option<String>,
}

impl QueueMessageXml {
    fn set(&mut self, field: &str, value: String) {
        match field {
            "MessageId" => self.message_id = Some(value),
            "InsertionTime" => self.insertion_time = Some(value),
            "ExpirationTime" => self.expiration_time = Some(value),
            "PopReceipt" => self.pop_receipt = Some(value),
            "TimeNextVisible" => self.time_next_visible = Some(value),
            "DequeueCount" => self.dequeue_count = Some(value),
            "MessageText" => self.message_text = Some(value),
            _ => {}
        }
    }
}

/// Parse a `QueueMessagesList` document
///
/// Text is not trimmed so payload whitespace survives.
fn parse_queue_messages(xml: &str) -> Result<Vec<QueueMessageXml>, AzureError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);

    let mut messages = Vec::new();
    let mut current: Option<QueueMessageXml> = None;
    let mut field: Option<String> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "QueueMessage" {
                    current = Some(QueueMessageXml::default());
                } else if current.is_some() {
                    field = Some(name);
                    text.clear();
                }
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(message) = current.as_mut() {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    message.set(&name, String::new());
                }
            }
            Ok(Event::Text(e)) if field.is_some() => {
                let unescaped = e.unescape().map_err(|e| {
                    AzureError::SerializationError(format!("Failed to parse XML: {}", e))
                })?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(e)) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                if name.as_ref() == b"QueueMessage" {
                    if let Some(message) = current.take() {
                        messages.push(message);
                    }
                } else if let (Some(message), Some(open)) = (current.as_mut(), field.take()) {
                    message.set(&open, std::mem::take(&mut text));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AzureError::SerializationError(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

/// Extract `<Code>` and `<Message>` from an `<Error>` document
fn parse_error_body(xml: &str) -> (Option<String>, Option<String>) {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = true,
                b"Code" if in_error => in_code = true,
                b"Message" if in_error => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Error" => {
                in_error = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (error_code, error_message)
}

fn parse_time(field: &str, value: Option<&String>) -> Result<Option<Timestamp>, AzureError> {
    value
        .map(|v| {
            Timestamp::from_rfc1123(v).map_err(|e| {
                AzureError::SerializationError(format!("Invalid {} '{}': {}", field, v, e))
            })
        })
        .transpose()
}

// ============================================================================
// Azure Storage Queue Provider
// ============================================================================

/// Response of a successful storage service call
struct AzureResponse {
    status: u16,
    body: String,
}

/// Azure Storage Queue provider implementation
///
/// Implements the QueueProvider trait on top of the queue service REST API.
/// The provider is stateless apart from the shared HTTP client and can be
/// shared across tasks.
pub struct AzureStorageProvider {
    http_client: HttpClient,
    signer: Option<SharedKeySigner>,
    sas_token: Option<SasToken>,
    config: AzureStorageConfig,
    endpoint: String,
    request_timeout: std::time::Duration,
}

impl AzureStorageProvider {
    /// Create new Azure Storage Queue provider
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(
        config: AzureStorageConfig,
        request_timeout: std::time::Duration,
    ) -> Result<Self, AzureError> {
        let credentials = &config.credentials;

        let (signer, sas_token) = match credentials.auth() {
            StorageAuth::SharedKey(key) => (
                Some(SharedKeySigner::new(
                    credentials.account_name().to_string(),
                    key.clone(),
                )),
                None,
            ),
            StorageAuth::SharedAccessSignature(token) => (None, Some(token.clone())),
        };

        let endpoint = credentials.queue_endpoint().to_string();

        let http_client = HttpClient::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AzureError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        debug!(
            endpoint = %endpoint,
            auth = credentials.auth().kind(),
            "Created Azure Storage Queue provider"
        );

        Ok(Self {
            http_client,
            signer,
            sas_token,
            config,
            endpoint,
            request_timeout,
        })
    }

    /// Build the request URL, appending the SAS token when configured
    fn build_url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, AzureError> {
        let mut url = Url::parse(&format!("{}{}", self.endpoint, path))
            .map_err(|e| AzureError::ConfigurationError(format!("Invalid request URL: {}", e)))?;

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        if let Some(token) = &self.sas_token {
            let combined = match url.query() {
                Some(existing) if !existing.is_empty() => {
                    format!("{}&{}", existing, token.expose_secret())
                }
                _ => token.expose_secret().to_string(),
            };
            url.set_query(Some(&combined));
        }

        Ok(url)
    }

    /// Make an authorized HTTP request to the queue service
    async fn make_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<String>,
        queue: &QueueName,
    ) -> Result<AzureResponse, AzureError> {
        let url = self.build_url(path, query)?;
        let date = Timestamp::now().to_rfc1123();

        let mut request = self
            .http_client
            .request(method.clone(), url.clone())
            .header("x-ms-date", &date)
            .header("x-ms-version", STORAGE_API_VERSION);

        let content_length = body.as_ref().map(String::len).unwrap_or(0);
        let content_type = if body.is_some() { XML_CONTENT_TYPE } else { "" };

        if let Some(signer) = &self.signer {
            let mut ms_headers = BTreeMap::new();
            ms_headers.insert("x-ms-date".to_string(), date.clone());
            ms_headers.insert("x-ms-version".to_string(), STORAGE_API_VERSION.to_string());

            let authorization = signer.authorization_header(
                method.as_str(),
                &url,
                content_length,
                content_type,
                &ms_headers,
            );
            request = request.header("Authorization", authorization);
        }

        if let Some(body) = body {
            request = request.header("Content-Type", XML_CONTENT_TYPE).body(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AzureError::Timeout(self.request_timeout)
            } else if e.is_connect() {
                AzureError::NetworkError(format!("Connection failed: {}", e))
            } else {
                AzureError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let error_code = response
            .headers()
            .get(ERROR_CODE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let response_body = response
            .text()
            .await
            .map_err(|e| AzureError::NetworkError(format!("Failed to read response body: {}", e)))?;

        debug!(
            method = %method,
            path = %url.path(),
            status = status.as_u16(),
            "Queue service responded"
        );

        if !status.is_success() {
            let (body_code, body_message) = parse_error_body(&response_body);
            let code = error_code
                .or(body_code)
                .unwrap_or_else(|| "Unknown".to_string());
            let message = body_message.unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string()
            });
            return Err(classify_error(status.as_u16(), &code, message, queue));
        }

        Ok(AzureResponse {
            status: status.as_u16(),
            body: response_body,
        })
    }

    /// Convert a parsed `<QueueMessage>` into a received message
    fn to_received_message(&self, raw: QueueMessageXml) -> Result<ReceivedMessage, AzureError> {
        let message_id = raw
            .message_id
            .as_deref()
            .map(MessageId::from_str)
            .transpose()
            .map_err(|e| AzureError::SerializationError(e.to_string()))?
            .ok_or_else(|| {
                AzureError::SerializationError("MessageId missing from response".to_string())
            })?;

        let pop_receipt = raw.pop_receipt.clone().ok_or_else(|| {
            AzureError::SerializationError("PopReceipt missing from response".to_string())
        })?;

        let next_visible_at = parse_time("TimeNextVisible", raw.time_next_visible.as_ref())?
            .unwrap_or_else(Timestamp::now);

        let dequeue_count = match raw.dequeue_count.as_deref() {
            Some(count) => count.trim().parse().map_err(|_| {
                AzureError::SerializationError(format!("Invalid DequeueCount '{}'", count))
            })?,
            None => 1,
        };

        let body = self
            .config
            .encoding
            .decode(raw.message_text.as_deref().unwrap_or_default())
            .map_err(|e| AzureError::SerializationError(e.to_string()))?;

        Ok(ReceivedMessage {
            receipt_handle: ReceiptHandle::new(
                message_id.clone(),
                pop_receipt,
                next_visible_at,
                ProviderType::AzureStorage,
            ),
            message_id,
            body,
            dequeue_count,
            inserted_at: parse_time("InsertionTime", raw.insertion_time.as_ref())?,
            expires_at: parse_time("ExpirationTime", raw.expiration_time.as_ref())?,
        })
    }
}

impl fmt::Debug for AzureStorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureStorageProvider")
            .field("endpoint", &self.endpoint)
            .field("encoding", &self.config.encoding)
            .field("credentials", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl QueueProvider for AzureStorageProvider {
    #[instrument(skip(self), fields(queue = %queue))]
    async fn create_queue(&self, queue: &QueueName) -> Result<bool, QueueError> {
        let path = format!("/{}", queue.as_str());

        match self
            .make_request(Method::PUT, &path, &[], None, queue)
            .await
        {
            Ok(response) => Ok(response.status == 201),
            Err(AzureError::ServiceError { status: 409, .. }) => Ok(false),
            Err(e) => Err(e.to_queue_error()),
        }
    }

    #[instrument(skip(self, body, options), fields(queue = %queue, size = body.len()))]
    async fn send_message(
        &self,
        queue: &QueueName,
        body: &Bytes,
        options: &SendOptions,
    ) -> Result<MessageId, QueueError> {
        let text = self.config.encoding.encode(body)?;

        let max_size = self.provider_type().max_message_size();
        if text.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: text.len(),
                max_size,
            });
        }

        let xml_body = format!(
            "<QueueMessage><MessageText>{}</MessageText></QueueMessage>",
            quick_xml::escape::escape(&text)
        );

        let mut query = Vec::new();
        if let Some(delay) = options.initial_visibility_delay {
            query.push(("visibilitytimeout", delay.num_seconds().to_string()));
        }
        if let Some(ttl) = options.time_to_live {
            query.push(("messagettl", ttl.num_seconds().to_string()));
        }

        let path = format!("/{}/messages", queue.as_str());
        let response = self
            .make_request(Method::POST, &path, &query, Some(xml_body), queue)
            .await
            .map_err(|e| e.to_queue_error())?;

        let message_id = parse_queue_messages(&response.body)
            .map_err(|e| e.to_queue_error())?
            .into_iter()
            .next()
            .and_then(|m| m.message_id)
            .ok_or_else(|| {
                QueueError::SerializationError(SerializationError::MalformedResponse {
                    message: "MessageId not found in put response".to_string(),
                })
            })?;

        MessageId::from_str(&message_id).map_err(QueueError::ValidationError)
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn receive_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut query = vec![("numofmessages", max_messages.to_string())];
        if let Some(timeout) = visibility_timeout {
            query.push(("visibilitytimeout", timeout.num_seconds().to_string()));
        }

        let path = format!("/{}/messages", queue.as_str());
        let response = self
            .make_request(Method::GET, &path, &query, None, queue)
            .await
            .map_err(|e| e.to_queue_error())?;

        let messages = parse_queue_messages(&response.body)
            .and_then(|raw| {
                raw.into_iter()
                    .map(|m| self.to_received_message(m))
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(|e| e.to_queue_error())?;

        debug!(count = messages.len(), "Received message batch");
        Ok(messages)
    }

    #[instrument(skip(self, receipt), fields(queue = %queue, message_id = %receipt.message_id()))]
    async fn delete_message(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let path = format!(
            "/{}/messages/{}",
            queue.as_str(),
            urlencoding::encode(receipt.message_id().as_str())
        );
        let query = [("popreceipt", receipt.pop_receipt().to_string())];

        match self
            .make_request(Method::DELETE, &path, &query, None, queue)
            .await
        {
            Ok(_) => Ok(()),
            Err(AzureError::MessageNotFound(_)) => Err(QueueError::MessageNotFound {
                receipt: receipt.message_id().to_string(),
            }),
            Err(e) => Err(e.to_queue_error()),
        }
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureStorage
    }

    fn max_batch_size(&self) -> u32 {
        ProviderType::AzureStorage.max_batch_size()
    }
}
