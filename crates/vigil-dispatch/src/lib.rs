// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound message dispatch collaborators.
//!
//! [`WebhookDispatcher`] delivers operator messages over HTTP;
//! [`NotConfiguredDispatcher`] stands in when no endpoint is set so that sends
//! fail with `not_configured` instead of pretending to succeed.

use std::sync::Arc;

use tracing::info;
use vigil_config::DispatchConfig;
use vigil_core::{MessageDispatcher, VigilError};

pub mod unconfigured;
pub mod webhook;

pub use unconfigured::NotConfiguredDispatcher;
pub use webhook::WebhookDispatcher;

/// Build the dispatcher described by `config`.
pub fn from_config(config: &DispatchConfig) -> Result<Arc<dyn MessageDispatcher>, VigilError> {
    match &config.endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "webhook dispatch enabled");
            Ok(Arc::new(WebhookDispatcher::new(
                endpoint.clone(),
                config.api_key.as_deref(),
                config.timeout(),
            )?))
        }
        None => {
            info!("no dispatch endpoint configured, sends will fail with not_configured");
            Ok(Arc::new(NotConfiguredDispatcher))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::Collaborator;

    #[test]
    fn missing_endpoint_builds_unconfigured_dispatcher() {
        let dispatcher = from_config(&DispatchConfig::default()).unwrap();
        assert_eq!(dispatcher.name(), "unconfigured");
    }

    #[test]
    fn endpoint_builds_webhook_dispatcher() {
        let config = DispatchConfig {
            endpoint: Some("https://hooks.example.test/send".into()),
            ..DispatchConfig::default()
        };
        let dispatcher = from_config(&config).unwrap();
        assert_eq!(dispatcher.name(), "webhook");
    }
}
