//! Storage account credentials parsed from connection strings.
//!
//! A connection string is a `;`-separated list of `Key=Value` pairs, e.g.
//!
//! ```text
//! DefaultEndpointsProtocol=https;AccountName=myaccount;AccountKey=<base64>;EndpointSuffix=core.windows.net
//! ```
//!
//! Keys are matched case-insensitively. Either `AccountKey` (shared key
//! signing) or `SharedAccessSignature` must be present. `QueueEndpoint`
//! overrides the endpoint derived from the account name, and
//! `UseDevelopmentStorage=true` selects the local storage emulator.
//!
//! Secret material is held in zeroize-on-drop containers and is redacted from
//! `Debug` output.

use crate::error::ConfigurationError;
use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;
use std::fmt;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;

const DEFAULT_PROTOCOL: &str = "https";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

const DEVELOPMENT_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEVELOPMENT_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEVELOPMENT_QUEUE_ENDPOINT: &str = "http://127.0.0.1:10001/devstoreaccount1";

// ============================================================================
// Secret Containers
// ============================================================================

/// Decoded storage account key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccountKey(Vec<u8>);

impl AccountKey {
    /// Decode a base64 account key
    pub fn from_base64(encoded: &str) -> Result<Self, ConfigurationError> {
        general_purpose::STANDARD
            .decode(encoded.trim())
            .map(Self)
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("AccountKey is not valid base64: {}", e),
            })
    }

    /// Raw key bytes (only for immediate use in signing)
    pub fn expose_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("length", &self.0.len())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Shared access signature query string, without the leading `?`
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SasToken(String);

impl SasToken {
    /// Create a token, stripping a leading `?` if present
    pub fn new(token: &str) -> Self {
        Self(token.trim().trim_start_matches('?').to_string())
    }

    /// Token string (only for immediate use when building request URLs)
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SasToken")
            .field("length", &self.0.len())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// How requests to the storage account are authorized
#[derive(Debug, Clone)]
pub enum StorageAuth {
    /// Sign each request with the account key
    SharedKey(AccountKey),
    /// Append a pre-issued signature to each request URL
    SharedAccessSignature(SasToken),
}

impl StorageAuth {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SharedKey(_) => "SharedKey",
            Self::SharedAccessSignature(_) => "SharedAccessSignature",
        }
    }
}

/// Account-level access to a storage queue service
#[derive(Debug, Clone)]
pub struct StorageCredentials {
    account_name: String,
    queue_endpoint: String,
    auth: StorageAuth,
}

impl StorageCredentials {
    /// Build credentials from explicit parts
    pub fn new(
        account_name: impl Into<String>,
        queue_endpoint: &str,
        auth: StorageAuth,
    ) -> Result<Self, ConfigurationError> {
        let queue_endpoint = normalize_endpoint(queue_endpoint)?;
        Ok(Self {
            account_name: account_name.into(),
            queue_endpoint,
            auth,
        })
    }

    /// Parse a storage connection string
    pub fn from_connection_string(connection_string: &str) -> Result<Self, ConfigurationError> {
        let settings = parse_settings(connection_string)?;

        if settings
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            let endpoint = settings
                .get("queueendpoint")
                .map(String::as_str)
                .unwrap_or(DEVELOPMENT_QUEUE_ENDPOINT);
            return Self::new(
                DEVELOPMENT_ACCOUNT_NAME,
                endpoint,
                StorageAuth::SharedKey(AccountKey::from_base64(DEVELOPMENT_ACCOUNT_KEY)?),
            );
        }

        let account_name = settings.get("accountname").cloned();

        let auth = if let Some(key) = settings.get("accountkey") {
            StorageAuth::SharedKey(AccountKey::from_base64(key)?)
        } else if let Some(sas) = settings.get("sharedaccesssignature") {
            StorageAuth::SharedAccessSignature(SasToken::new(sas))
        } else {
            return Err(ConfigurationError::Missing {
                key: "AccountKey or SharedAccessSignature".to_string(),
            });
        };

        let queue_endpoint = match (settings.get("queueendpoint"), account_name.as_deref()) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(account)) => {
                let protocol = settings
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_PROTOCOL);
                let suffix = settings
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_ENDPOINT_SUFFIX);
                format!("{}://{}.queue.{}", protocol, account, suffix)
            }
            (None, None) => {
                return Err(ConfigurationError::Missing {
                    key: "AccountName or QueueEndpoint".to_string(),
                })
            }
        };

        let account_name = match (account_name, &auth) {
            (Some(name), _) => name,
            (None, StorageAuth::SharedKey(_)) => {
                return Err(ConfigurationError::Missing {
                    key: "AccountName".to_string(),
                })
            }
            (None, StorageAuth::SharedAccessSignature(_)) => {
                account_from_endpoint(&queue_endpoint).unwrap_or_default()
            }
        };

        Self::new(account_name, &queue_endpoint, auth)
    }

    /// Storage account name
    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    /// Queue service endpoint without a trailing slash
    pub fn queue_endpoint(&self) -> &str {
        &self.queue_endpoint
    }

    /// Authorization method
    pub fn auth(&self) -> &StorageAuth {
        &self.auth
    }
}

fn parse_settings(connection_string: &str) -> Result<HashMap<String, String>, ConfigurationError> {
    let mut settings = HashMap::new();

    for segment in connection_string.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        let (key, value) = segment
            .split_once('=')
            .ok_or_else(|| ConfigurationError::Parsing {
                message: "connection string segments must be Key=Value pairs".to_string(),
            })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigurationError::Parsing {
                message: "connection string contains an empty key".to_string(),
            });
        }

        settings.insert(key.to_ascii_lowercase(), value.trim().to_string());
    }

    if settings.is_empty() {
        return Err(ConfigurationError::Missing {
            key: "connection_string".to_string(),
        });
    }

    Ok(settings)
}

fn normalize_endpoint(endpoint: &str) -> Result<String, ConfigurationError> {
    let url = Url::parse(endpoint).map_err(|e| ConfigurationError::Invalid {
        message: format!("QueueEndpoint '{}' is not a valid URL: {}", endpoint, e),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigurationError::Invalid {
            message: format!("QueueEndpoint must use http or https, got '{}'", url.scheme()),
        });
    }

    Ok(endpoint.trim_end_matches('/').to_string())
}

/// `https://myaccount.queue.core.windows.net` -> `myaccount`
fn account_from_endpoint(endpoint: &str) -> Option<String> {
    let url = Url::parse(endpoint).ok()?;
    let host = url.host_str()?;
    host.split('.').next().map(str::to_string)
}
