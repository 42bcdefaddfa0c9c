use crate::client::SourceHttp;
use crate::config::{HttpConfig, SourceConfig};
use crate::error::RosterSyncResult;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Short-lived bearer for the roster endpoints.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// `None` means no sync is possible this run.
    async fn fetch_token(&self) -> Option<AccessToken>;
}

/// Lowercase hex SHA-1 of `client_id ‖ timestamp ‖ selector_id`.
pub fn signature(client_id: &str, timestamp: i64, selector_id: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_id.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(selector_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Deserialize)]
struct TokenData {
    #[serde(default)]
    token: String
}

pub struct HttpTokenClient {
    http: SourceHttp,
    source: SourceConfig
}

impl HttpTokenClient {
    pub fn new(source: SourceConfig, http: &HttpConfig) -> RosterSyncResult<Self> {
        Ok(Self {
            http: SourceHttp::new(http)?,
            source
        })
    }
}

#[async_trait]
impl TokenProvider for HttpTokenClient {
    async fn fetch_token(&self) -> Option<AccessToken> {
        if !self.source.has_credentials() {
            debug!("Roster source credentials not configured");
            return None;
        }

        let timestamp = Utc::now().timestamp();
        let form = [
            ("clientid", self.source.client_id.clone()),
            ("timestamp", timestamp.to_string()),
            (
                "sign",
                signature(&self.source.client_id, timestamp, &self.source.selector_id)
            )
        ];

        let envelope = match self.http.post_form(&self.source.token_url, &form).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Token request failed");
                return None;
            }
        };

        let token = envelope.into_data::<TokenData>()?.token;
        if token.is_empty() {
            warn!("Token endpoint returned an empty token");
            return None;
        }

        Some(AccessToken(token))
    }
}

pub fn create_token_client(
    source: SourceConfig,
    http: &HttpConfig
) -> RosterSyncResult<Arc<dyn TokenProvider>> {
    Ok(Arc::new(HttpTokenClient::new(source, http)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_concatenates_without_delimiter() {
        let expected = hex::encode(Sha1::digest(b"lms1760000000spring"));
        assert_eq!(signature("lms", 1760000000, "spring"), expected);
        assert_eq!(signature("lms", 1760000000, "spring").len(), 40);
    }

    #[test]
    fn test_signature_depends_on_timestamp() {
        assert_ne!(signature("lms", 1, "spring"), signature("lms", 2, "spring"));
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AccessToken::new("abcdef");
        assert_eq!(format!("{token:?}"), "AccessToken(***)");
        assert_eq!(token.as_str(), "abcdef");
    }

    #[tokio::test]
    async fn test_missing_credentials_yield_no_token() {
        let client = HttpTokenClient::new(SourceConfig::default(), &HttpConfig::default()).unwrap();
        assert!(client.fetch_token().await.is_none());
    }
}
