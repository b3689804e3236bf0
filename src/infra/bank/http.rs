//! reqwest-backed [`BankTransport`].

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::domain::{BankTransport, CallError, ConfigError, OutboundRequest};

/// Configuration for the HTTP transport
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub connect_timeout: Duration,
    /// Upper bound for any request. Must exceed every per-destination
    /// deadline, which the caller enforces; see [`Self::covering`].
    pub request_timeout: Duration,
    pub pool_idle_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

impl HttpTransportConfig {
    const DEADLINE_SLACK: Duration = Duration::from_secs(5);

    /// Defaults, with the client-wide timeout raised above `max_deadline` so
    /// that the caller's per-destination deadline is always the one to fire.
    #[must_use]
    pub fn covering(max_deadline: Duration) -> Self {
        let defaults = Self::default();
        Self {
            request_timeout: defaults
                .request_timeout
                .max(max_deadline + Self::DEADLINE_SLACK),
            ..defaults
        }
    }
}

pub struct HttpBankTransport {
    http_client: Client,
    config: HttpTransportConfig,
}

impl HttpBankTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, ConfigError> {
        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .build()
            .map_err(|e| ConfigError::invalid("http_client", e.to_string()))?;

        info!("Created bank HTTP transport");
        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::new(HttpTransportConfig::default())
    }

    fn classify(&self, err: &reqwest::Error) -> CallError {
        if err.is_timeout() {
            CallError::Timeout {
                timeout_ms: u64::try_from(self.config.request_timeout.as_millis())
                    .unwrap_or(u64::MAX),
            }
        } else {
            CallError::Connect(err.to_string())
        }
    }
}

#[async_trait]
impl BankTransport for HttpBankTransport {
    #[instrument(skip(self, request), fields(endpoint = %request.endpoint))]
    async fn post_json(&self, request: &OutboundRequest) -> Result<Value, CallError> {
        let mut builder = self.http_client.post(&request.endpoint).json(&request.payload);
        if let Some(key) = &request.credential {
            builder = builder.header("X-API-Key", key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| self.classify(&e))?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(status = %status, "Downstream rejected request");
            return Err(CallError::Downstream {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(&e))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| CallError::Downstream {
            status: status.as_u16(),
            message: format!("invalid JSON body: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, http::StatusCode, routing::post};
    use secrecy::SecretString;
    use serde_json::json;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_covering_outlasts_longest_deadline() {
        let short = HttpTransportConfig::covering(Duration::from_secs(2));
        assert_eq!(short.request_timeout, Duration::from_secs(60));

        let long = HttpTransportConfig::covering(Duration::from_secs(120));
        assert!(long.request_timeout > Duration::from_secs(120));
        assert_eq!(long.connect_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_post_json_sends_api_key_and_decodes_body() {
        let router = Router::new().route(
            "/api/v1/transactions/receive",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let key = headers
                    .get("x-api-key")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(json!({"key": key, "echo": body}))
            }),
        );
        let base = spawn(router).await;
        let transport = HttpBankTransport::with_defaults().unwrap();

        let request = OutboundRequest::new(
            format!("{base}/api/v1/transactions/receive"),
            json!({"amount": 1}),
        )
        .with_credential(Some(SecretString::from("key-a")));
        let body = transport.post_json(&request).await.unwrap();

        assert_eq!(body["key"], "key-a");
        assert_eq!(body["echo"]["amount"], 1);
    }

    #[tokio::test]
    async fn test_non_2xx_maps_to_downstream() {
        let router = Router::new().route(
            "/api/v1/transactions/internal",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "ledger offline") }),
        );
        let base = spawn(router).await;
        let transport = HttpBankTransport::with_defaults().unwrap();

        let err = transport
            .post_json(&OutboundRequest::new(
                format!("{base}/api/v1/transactions/internal"),
                json!({}),
            ))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            CallError::Downstream {
                status: 500,
                message: "ledger offline".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_refused_connection_maps_to_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpBankTransport::with_defaults().unwrap();
        let err = transport
            .post_json(&OutboundRequest::new(format!("http://{addr}/"), json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::Connect(_)));
    }
}
