//! Upstream Rate Source Client
//!
//! HTTP client for the remote snapshot endpoint. One request per call with
//! a bounded timeout; the poll loop's next tick is the only retry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};

use crate::application::ports::{FetchError, UpstreamSource};
use crate::domain::quote::UpstreamPayload;
use crate::infrastructure::config::{UpstreamCredential, UpstreamSettings};

/// Identifying user agent sent with every request.
pub const USER_AGENT: &str = concat!("currency-stream/", env!("CARGO_PKG_VERSION"));

/// HTTP implementation of [`UpstreamSource`].
#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    client: Client,
    url: String,
    credential: UpstreamCredential,
    timeout: Duration,
}

impl HttpUpstreamClient {
    /// Create a client from settings.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if the HTTP client cannot be built.
    pub fn new(settings: &UpstreamSettings) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Transport {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: settings.url.clone(),
            credential: settings.credential.clone(),
            timeout: settings.timeout,
        })
    }

    fn map_send_error(&self, e: &reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            FetchError::Transport {
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl UpstreamSource for HttpUpstreamClient {
    async fn fetch_snapshot(&self) -> Result<UpstreamPayload, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(self.credential.token())
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        serde_json::from_slice(&body).map_err(|e| FetchError::Parse {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer, timeout: Duration) -> HttpUpstreamClient {
        HttpUpstreamClient::new(&UpstreamSettings {
            url: format!("{}/rates", server.uri()),
            credential: UpstreamCredential::new("tok".to_string()),
            timeout,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn sends_bearer_and_parses_detail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rates"))
            .and(header("authorization", "Bearer tok"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "detail": [{
                    "CurrencyCode": "USD",
                    "USDBuy": "1",
                    "INRBuy": "83.1",
                    "USDSell": "1",
                    "INRSell": "83.4",
                    "DateTime": "2026-10-15 09:00:00"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let payload = client(&server, Duration::from_secs(2))
            .fetch_snapshot()
            .await
            .unwrap();

        assert_eq!(payload.detail.map(|d| d.len()), Some(1));
    }

    #[tokio::test]
    async fn non_success_status_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client(&server, Duration::from_secs(2)).fetch_snapshot().await;

        assert!(matches!(result, Err(FetchError::Status { status: 503 })));
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let result = client(&server, Duration::from_secs(2)).fetch_snapshot().await;

        assert!(matches!(result, Err(FetchError::Parse { .. })));
    }

    #[tokio::test]
    async fn one_bad_rate_does_not_fail_the_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "detail": [
                    {
                        "CurrencyCode": "USD",
                        "USDBuy": "1",
                        "INRBuy": "83.1",
                        "USDSell": "1",
                        "INRSell": "83.4",
                        "DateTime": "2026-10-15 09:00:00"
                    },
                    {
                        "CurrencyCode": "XAU",
                        "USDBuy": "",
                        "INRBuy": "",
                        "USDSell": "",
                        "INRSell": "",
                        "DateTime": "2026-10-15 09:00:00"
                    }
                ]
            })))
            .mount(&server)
            .await;

        let payload = client(&server, Duration::from_secs(2))
            .fetch_snapshot()
            .await
            .unwrap();

        let detail = payload.detail.unwrap();
        assert_eq!(detail.len(), 1);
        assert_eq!(detail[0].code, "USD");
    }

    #[tokio::test]
    async fn slow_response_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"detail": []}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let result = client(&server, Duration::from_millis(50))
            .fetch_snapshot()
            .await;

        assert!(matches!(result, Err(FetchError::Timeout { timeout_ms: 50 })));
    }

    #[test]
    fn user_agent_names_service() {
        assert!(USER_AGENT.starts_with("currency-stream/"));
    }
}
