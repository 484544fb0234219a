//! Shared HTTP transport for the *arr v3 REST API.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{RetryConfig, ServiceConfig, ServiceKind};
use crate::metrics;

use super::LibraryError;

/// Authenticated JSON transport bound to one service.
///
/// Reads are retried with exponential backoff on retryable failures. Writes
/// are sent exactly once; a failed write is left for the next scan.
pub struct ApiTransport {
    client: Client,
    base_url: String,
    api_key: String,
    service: ServiceKind,
    retry: RetryConfig,
}

impl ApiTransport {
    pub fn new(
        service: ServiceKind,
        config: &ServiceConfig,
        retry: RetryConfig,
    ) -> Result<Self, LibraryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| LibraryError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_url(service),
            api_key: config.api_key.clone(),
            service,
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// GET an endpoint and deserialize the body, retrying retryable failures.
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, LibraryError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut backoff = Duration::from_millis(self.retry.initial_backoff_ms);
        let mut attempt = 1;

        loop {
            let request = self.client.get(self.url(endpoint));
            match self.send(request, "get").await {
                Ok(body) => {
                    return serde_json::from_str(&body).map_err(|e| {
                        LibraryError::Parse(format!("{} {}: {}", self.service, endpoint, e))
                    });
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        service = %self.service,
                        endpoint,
                        attempt,
                        error = %e,
                        "Request failed, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// PUT a JSON body once.
    pub async fn put_json(&self, endpoint: &str, body: &Value) -> Result<(), LibraryError> {
        let request = self.client.put(self.url(endpoint)).json(body);
        self.send(request, "put").await.map(|_| ())
    }

    async fn send(&self, request: RequestBuilder, method: &str) -> Result<String, LibraryError> {
        let result = self.send_inner(request).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::REMOTE_REQUESTS
            .with_label_values(&[self.service.as_str(), method, outcome])
            .inc();
        result
    }

    async fn send_inner(&self, request: RequestBuilder) -> Result<String, LibraryError> {
        let response = request
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LibraryError::Timeout
                } else if e.is_connect() {
                    LibraryError::Connection(e.to_string())
                } else {
                    LibraryError::Connection(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        let url = response.url().path().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| LibraryError::Parse(format!("Failed to read body: {}", e)))?;

        if status.as_u16() == 404 {
            return Err(LibraryError::NotFound(url));
        }

        if !status.is_success() {
            return Err(LibraryError::Rejected {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        debug!(service = %self.service, %url, status = status.as_u16(), "Request ok");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(url_base: &str) -> ApiTransport {
        let mut config = ServiceConfig::new("media.lan", "secret");
        config.url_base = url_base.to_string();
        ApiTransport::new(ServiceKind::Sonarr, &config, RetryConfig::default()).unwrap()
    }

    #[test]
    fn test_url_building() {
        let t = transport("");
        assert_eq!(t.base_url(), "http://media.lan:8989/api/v3");
        assert_eq!(t.url("series"), "http://media.lan:8989/api/v3/series");
        assert_eq!(t.url("/episode/4"), "http://media.lan:8989/api/v3/episode/4");
    }

    #[test]
    fn test_url_with_base() {
        let t = transport("/sonarr");
        assert_eq!(t.url("series/1"), "http://media.lan:8989/sonarr/api/v3/series/1");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_error() {
        let mut config = ServiceConfig::new("127.0.0.1", "secret");
        config.port = Some(1);
        config.timeout_secs = 2;
        let retry = RetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 1,
        };
        let t = ApiTransport::new(ServiceKind::Radarr, &config, retry).unwrap();
        let err = t.get_json::<Value>("movie").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
