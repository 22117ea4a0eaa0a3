//! Common test utilities for queue-drain integration tests
//!
//! This module provides:
//! - A stateful storage queue emulator mounted on a `wiremock` server. It
//!   verifies SharedKey signatures, hands out pop receipts with visibility
//!   windows and returns the service's XML and error codes
//! - Helpers for building connection strings and clients against it

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use queue_drain_runtime::{
    AzureStorageConfig, MessageEncoding, ProviderConfig, QueueClient, QueueClientFactory,
    QueueConfig, RetryPolicy, StorageCredentials,
};
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const ACCOUNT: &str = "devstoreaccount1";
pub const DEV_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

/// A key that decodes fine but does not match the emulator's key
#[allow(dead_code)]
pub const WRONG_KEY: &str = "d3Jvbmcta2V5LWZvci10ZXN0cw==";

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// Emulator State
// ============================================================================

struct StoredMessage {
    id: String,
    /// XML-escaped text exactly as it was put
    text: String,
    pop_receipt: Option<String>,
    inserted_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
    dequeue_count: u32,
}

#[derive(Default)]
struct EmulatorState {
    queues: HashMap<String, Vec<StoredMessage>>,
    injected_failures: VecDeque<(u16, &'static str)>,
    requests: Vec<(String, String)>,
}

/// In-process emulation of the storage queue REST API
#[derive(Clone)]
pub struct StorageQueueEmulator {
    state: Arc<Mutex<EmulatorState>>,
    key: Vec<u8>,
}

#[allow(dead_code)]
impl StorageQueueEmulator {
    /// Start a mock server with the emulator answering every request
    pub async fn start() -> (MockServer, Self) {
        let emulator = Self {
            state: Arc::new(Mutex::new(EmulatorState::default())),
            key: general_purpose::STANDARD.decode(DEV_KEY).unwrap(),
        };

        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(emulator.clone())
            .mount(&server)
            .await;

        (server, emulator)
    }

    pub fn create_queue(&self, queue: &str) {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(queue.to_string())
            .or_default();
    }

    /// Put a message directly, bypassing HTTP
    pub fn put(&self, queue: &str, text: &str) {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        state
            .queues
            .get_mut(queue)
            .expect("queue must exist")
            .push(StoredMessage {
                id: uuid::Uuid::new_v4().to_string(),
                text: text.to_string(),
                pop_receipt: None,
                inserted_at: now,
                visible_at: now,
                dequeue_count: 0,
            });
    }

    pub fn message_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Raw `MessageText` values currently stored
    pub fn stored_texts(&self, queue: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|messages| messages.iter().map(|m| m.text.clone()).collect())
            .unwrap_or_default()
    }

    /// Answer the next request with the given status and error code
    pub fn fail_next(&self, status: u16, code: &'static str) {
        self.state
            .lock()
            .unwrap()
            .injected_failures
            .push_back((status, code));
    }

    /// Number of requests seen with this HTTP method
    pub fn request_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    fn signature_matches(&self, request: &Request) -> bool {
        let Some(authorization) = header(request, "authorization") else {
            return false;
        };
        let Some(signature) = authorization.strip_prefix(&format!("SharedKey {}:", ACCOUNT)) else {
            return false;
        };

        let content_length = if request.body.is_empty() {
            String::new()
        } else {
            request.body.len().to_string()
        };

        let mut ms_headers: Vec<(String, String)> = request
            .headers
            .iter()
            .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        ms_headers.sort();

        let mut query: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in request.url.query_pairs() {
            query.insert(name.to_lowercase(), value.into_owned());
        }

        let mut string_to_sign = format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n",
            request.method.as_str(),
            content_length,
            header(request, "content-type").unwrap_or_default()
        );
        for (name, value) in ms_headers {
            string_to_sign.push_str(&format!("{}:{}\n", name, value));
        }
        string_to_sign.push_str(&format!("/{}{}", ACCOUNT, request.url.path()));
        for (name, value) in query {
            string_to_sign.push_str(&format!("\n{}:{}", name, value));
        }

        let mut mac = HmacSha256::new_from_slice(&self.key).unwrap();
        mac.update(string_to_sign.as_bytes());
        let expected = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        signature == expected
    }
}

// ============================================================================
// Request Handling
// ============================================================================

fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|v| v.to_str().ok())
}

fn query(request: &Request, name: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn rfc1123(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn error(status: u16, code: &str) -> ResponseTemplate {
    ResponseTemplate::new(status)
        .insert_header("x-ms-error-code", code)
        .set_body_string(format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><Error><Code>{}</Code><Message>{}</Message></Error>",
            code, code
        ))
}

fn message_xml(message: &StoredMessage, include_text: bool) -> String {
    let text = if include_text {
        format!("<MessageText>{}</MessageText>", message.text)
    } else {
        String::new()
    };
    format!(
        "<QueueMessage><MessageId>{}</MessageId><InsertionTime>{}</InsertionTime><ExpirationTime>{}</ExpirationTime><PopReceipt>{}</PopReceipt><TimeNextVisible>{}</TimeNextVisible><DequeueCount>{}</DequeueCount>{}</QueueMessage>",
        message.id,
        rfc1123(message.inserted_at),
        rfc1123(message.inserted_at + Duration::days(7)),
        message.pop_receipt.as_deref().unwrap_or_default(),
        rfc1123(message.visible_at),
        message.dequeue_count,
        text
    )
}

impl Respond for StorageQueueEmulator {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let method = request.method.as_str().to_string();
        self.state
            .lock()
            .unwrap()
            .requests
            .push((method.clone(), request.url.path().to_string()));

        if !self.signature_matches(request) {
            return error(403, "AuthenticationFailed");
        }

        let mut state = self.state.lock().unwrap();
        if let Some((status, code)) = state.injected_failures.pop_front() {
            return error(status, code);
        }

        let prefix = format!("/{}/", ACCOUNT);
        let Some(resource) = request.url.path().strip_prefix(&prefix) else {
            return error(400, "InvalidUri");
        };
        let segments: Vec<&str> = resource.split('/').collect();

        match (method.as_str(), segments.as_slice()) {
            ("PUT", [queue]) => {
                if state.queues.contains_key(*queue) {
                    ResponseTemplate::new(204)
                } else {
                    state.queues.insert(queue.to_string(), Vec::new());
                    ResponseTemplate::new(201)
                }
            }
            ("POST", [queue, "messages"]) => {
                let Some(messages) = state.queues.get_mut(*queue) else {
                    return error(404, "QueueNotFound");
                };
                let body = String::from_utf8_lossy(&request.body);
                let Some(text) = body
                    .split_once("<MessageText>")
                    .and_then(|(_, rest)| rest.split_once("</MessageText>"))
                    .map(|(text, _)| text.to_string())
                else {
                    return error(400, "InvalidXmlDocument");
                };

                let now = Utc::now();
                let delay = query(request, "visibilitytimeout")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                let message = StoredMessage {
                    id: uuid::Uuid::new_v4().to_string(),
                    text,
                    pop_receipt: Some(uuid::Uuid::new_v4().to_string()),
                    inserted_at: now,
                    visible_at: now + Duration::seconds(delay),
                    dequeue_count: 0,
                };
                let xml = format!(
                    "<?xml version=\"1.0\" encoding=\"utf-8\"?><QueueMessagesList>{}</QueueMessagesList>",
                    message_xml(&message, false)
                );
                messages.push(message);
                ResponseTemplate::new(201).set_body_string(xml)
            }
            ("GET", [queue, "messages"]) => {
                let Some(messages) = state.queues.get_mut(*queue) else {
                    return error(404, "QueueNotFound");
                };
                let count: usize = query(request, "numofmessages")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1);
                let visibility: i64 = query(request, "visibilitytimeout")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30);

                let now = Utc::now();
                let mut xml = String::from(
                    "<?xml version=\"1.0\" encoding=\"utf-8\"?><QueueMessagesList>",
                );
                for message in messages
                    .iter_mut()
                    .filter(|m| m.visible_at <= now)
                    .take(count)
                {
                    message.pop_receipt = Some(uuid::Uuid::new_v4().to_string());
                    message.visible_at = now + Duration::seconds(visibility);
                    message.dequeue_count += 1;
                    xml.push_str(&message_xml(message, true));
                }
                xml.push_str("</QueueMessagesList>");
                ResponseTemplate::new(200).set_body_string(xml)
            }
            ("DELETE", [queue, "messages", id]) => {
                let Some(messages) = state.queues.get_mut(*queue) else {
                    return error(404, "QueueNotFound");
                };
                let receipt = query(request, "popreceipt");
                let Some(index) = messages.iter().position(|m| m.id == *id) else {
                    return error(404, "MessageNotFound");
                };
                if messages[index].pop_receipt != receipt {
                    return error(400, "PopReceiptMismatch");
                }
                messages.remove(index);
                ResponseTemplate::new(204)
            }
            _ => error(400, "UnsupportedHttpVerb"),
        }
    }
}

// ============================================================================
// Client Helpers
// ============================================================================

/// Connection string pointing at the emulator
pub fn connection_string(server: &MockServer, key: &str) -> String {
    format!(
        "DefaultEndpointsProtocol=http;AccountName={};AccountKey={};QueueEndpoint={}/{}",
        ACCOUNT,
        key,
        server.uri(),
        ACCOUNT
    )
}

/// Client configuration with fast, deterministic retries
pub fn queue_config(server: &MockServer, key: &str, encoding: MessageEncoding) -> QueueConfig {
    let credentials = StorageCredentials::from_connection_string(&connection_string(server, key))
        .unwrap();
    QueueConfig {
        provider: ProviderConfig::AzureStorage(
            AzureStorageConfig::new(credentials).with_encoding(encoding),
        ),
        request_timeout: std::time::Duration::from_secs(5),
        retry_policy: RetryPolicy::new(
            3,
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(5),
        )
        .without_jitter(),
    }
}

/// Client for the emulator using the valid key and text encoding
#[allow(dead_code)]
pub async fn client(server: &MockServer) -> Box<dyn QueueClient> {
    QueueClientFactory::create_client(queue_config(server, DEV_KEY, MessageEncoding::Text))
        .await
        .unwrap()
}
