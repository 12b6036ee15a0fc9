//! Publishing provider for the deploy stage.
//!
//! Posts the generated artifact to a configured HTTP endpoint. With no
//! endpoint configured the provider reports itself unavailable, which
//! the deploy executor turns into an export-only degrade rather than a
//! failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::PublishingConfig;
use crate::connector::{ProviderClient, ProviderError};
use crate::error::ConfigError;
use crate::sanitize::redact_endpoint;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpPublisher {
    endpoint: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpPublisher {
    pub fn new(config: &PublishingConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .use_rustls_tls()
            .build()
            .map_err(|e| ConfigError::Validation {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn map_status(status: StatusCode) -> ProviderError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ProviderError::rejected(format!("authentication failed: {}", status))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                ProviderError::transient(format!("rate limited: {}", status))
            }
            s if s.is_server_error() => {
                ProviderError::transient(format!("server error: {}", status))
            }
            s => ProviderError::rejected(format!("endpoint refused request: {}", s)),
        }
    }
}

#[async_trait]
impl ProviderClient for HttpPublisher {
    fn name(&self) -> &'static str {
        "publisher"
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError> {
        if operation != "publish" {
            return Err(ProviderError::rejected(format!(
                "unsupported operation '{}'",
                operation
            )));
        }

        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| ProviderError::unavailable("no publishing endpoint configured"))?;

        debug!(endpoint = %redact_endpoint(endpoint), "Publishing artifact");

        let mut request = self.client.post(endpoint).json(params);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            // Connection-level failures are worth retrying; the
            // connector's own timeout handles the slow-response case.
            ProviderError::transient(format!("publish request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::map_status(status));
        }

        let job_id = params.get("job_id").and_then(Value::as_str).unwrap_or("");
        let location = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| {
                body.get("location")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| format!("{}/artifacts/{}", endpoint.trim_end_matches('/'), job_id));

        Ok(json!({ "location": location }))
    }
}

/// Closed set of publishing providers.
pub enum PublishingProvider {
    Http(HttpPublisher),
}

#[async_trait]
impl ProviderClient for PublishingProvider {
    fn name(&self) -> &'static str {
        match self {
            PublishingProvider::Http(p) => p.name(),
        }
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError> {
        match self {
            PublishingProvider::Http(p) => p.call(operation, params).await,
        }
    }
}
