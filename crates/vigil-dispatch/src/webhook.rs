// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP webhook delivery.
//!
//! The outbound message is POSTed as JSON. A 2xx answer is a success unless
//! its body says `"success": false`; anything else is a rejection carrying
//! the HTTP status and whatever JSON the endpoint returned.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, warn};
use vigil_core::{
    AdapterType, Collaborator, DispatchReceipt, HealthStatus, MessageDispatcher, OutboundMessage,
    VigilError,
};

/// Body a delivery endpoint may return. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct WebhookReply {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default, alias = "id")]
    message_id: Option<String>,
}

/// Dispatcher that POSTs to a configured webhook.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl WebhookDispatcher {
    /// Build a dispatcher for `endpoint`, authenticating with `api_key` as a
    /// bearer token when one is given.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, VigilError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                VigilError::Config(format!("invalid dispatch api key header value: {e}"))
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| VigilError::Transport {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_error(&self, e: reqwest::Error) -> VigilError {
        if e.is_timeout() {
            VigilError::Timeout {
                duration: self.timeout,
            }
        } else {
            VigilError::Transport {
                message: format!("dispatch request failed: {e}"),
                source: Some(Box::new(e)),
            }
        }
    }
}

/// Human-readable reason from an `error` field, which may be a string or an
/// object with a `message`.
fn reason(error: Option<&serde_json::Value>) -> Option<String> {
    match error? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl Collaborator for WebhookDispatcher {
    fn name(&self) -> &str {
        "webhook"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Dispatcher
    }

    async fn health_check(&self) -> Result<HealthStatus, VigilError> {
        // The endpoint only accepts POSTs; reachability is all we can test.
        match self.client.head(&self.endpoint).send().await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(format!("endpoint unreachable: {e}"))),
        }
    }

    async fn shutdown(&self) -> Result<(), VigilError> {
        Ok(())
    }
}

#[async_trait]
impl MessageDispatcher for WebhookDispatcher {
    async fn dispatch(&self, message: &OutboundMessage) -> Result<DispatchReceipt, VigilError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(message)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.request_error(e))?;
        let payload = serde_json::from_str::<serde_json::Value>(&body).ok();
        let reply = payload
            .as_ref()
            .and_then(|v| WebhookReply::deserialize(v).ok())
            .unwrap_or_default();

        debug!(
            session_id = %message.session_id,
            status = status.as_u16(),
            "dispatch response received"
        );

        if status.is_success() && reply.success != Some(false) {
            return Ok(DispatchReceipt {
                external_id: reply.message_id,
                payload,
            });
        }

        let detail = reason(reply.error.as_ref()).unwrap_or_else(|| {
            if status.is_success() {
                "endpoint reported failure".to_string()
            } else {
                format!("endpoint returned {status}")
            }
        });
        warn!(
            session_id = %message.session_id,
            status = status.as_u16(),
            error = %detail,
            "dispatch rejected"
        );
        Err(VigilError::Dispatch {
            message: detail,
            status: Some(status.as_u16()),
            payload: reply.error.or(payload),
        })
    }
}
