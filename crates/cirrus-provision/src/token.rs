//! Bootstrap token acquisition for first-time member discovery.

use async_trait::async_trait;
use reqwest::Url;

use crate::config::HttpTimeouts;
use crate::error::{ProvisionError, Result};

#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// Obtains a fresh token for a discovery group of `size` members.
    async fn acquire(&self, size: u32) -> Result<String>;
}

/// Discovery service reached over HTTP.
///
/// `GET <endpoint>/new?size=<n>` answers with a URL whose last path segment is the token.
#[derive(Debug, Clone)]
pub struct HttpTokenSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTokenSource {
    pub fn new(endpoint: impl Into<String>, timeouts: &HttpTimeouts) -> Result<Self> {
        Ok(Self {
            client: timeouts.client()?,
            endpoint: endpoint.into(),
        })
    }

    fn request_url(&self, size: u32) -> String {
        format!("{}/new?size={}", self.endpoint.trim_end_matches('/'), size)
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn acquire(&self, size: u32) -> Result<String> {
        let url = self.request_url(size);
        tracing::debug!("requesting bootstrap token from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProvisionError::Token {
                reason: format!("connection error: {}", e),
            })?;
        if !response.status().is_success() {
            return Err(ProvisionError::Token {
                reason: format!("HTTP {} from {}", response.status(), url),
            });
        }
        let body = response.text().await.map_err(|e| ProvisionError::Token {
            reason: format!("read error: {}", e),
        })?;

        let token = token_from_url(&body)?;
        tracing::info!("acquired bootstrap token for {} member(s)", size);
        Ok(token)
    }
}

/// Last non-empty path segment of `url`.
pub fn token_from_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url.trim()).map_err(|e| ProvisionError::Token {
        reason: format!("invalid discovery url '{}': {}", url.trim(), e),
    })?;
    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| ProvisionError::Token {
            reason: format!("discovery url '{}' has no token segment", url.trim()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_last_segment() {
        assert_eq!(
            token_from_url("https://discovery.etcd.io/3e86b59982e49066c5d813af1c2e2579\n")
                .unwrap(),
            "3e86b59982e49066c5d813af1c2e2579"
        );
        assert_eq!(
            token_from_url("https://discovery.example.lan/groups/abc/").unwrap(),
            "abc"
        );
    }

    #[test]
    fn test_url_without_path_is_rejected() {
        assert!(matches!(
            token_from_url("https://discovery.etcd.io/"),
            Err(ProvisionError::Token { .. })
        ));
        assert!(matches!(
            token_from_url("not a url"),
            Err(ProvisionError::Token { .. })
        ));
    }

    #[test]
    fn test_request_url() {
        let source = HttpTokenSource::new("https://discovery.etcd.io/", &HttpTimeouts::default()).unwrap();
        assert_eq!(source.request_url(3), "https://discovery.etcd.io/new?size=3");
    }
}
