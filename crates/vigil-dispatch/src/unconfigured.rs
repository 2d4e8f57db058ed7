// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stand-in used when no delivery endpoint is configured.

use async_trait::async_trait;
use vigil_core::{
    AdapterType, Collaborator, DispatchReceipt, HealthStatus, MessageDispatcher, OutboundMessage,
    VigilError,
};

/// Refuses every send with `not_configured`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotConfiguredDispatcher;

#[async_trait]
impl Collaborator for NotConfiguredDispatcher {
    fn name(&self) -> &str {
        "unconfigured"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Dispatcher
    }

    async fn health_check(&self) -> Result<HealthStatus, VigilError> {
        Ok(HealthStatus::Degraded("no dispatch endpoint configured".into()))
    }

    async fn shutdown(&self) -> Result<(), VigilError> {
        Ok(())
    }
}

#[async_trait]
impl MessageDispatcher for NotConfiguredDispatcher {
    async fn dispatch(&self, _message: &OutboundMessage) -> Result<DispatchReceipt, VigilError> {
        Err(VigilError::NotConfigured(
            "dispatch.endpoint is not set".into(),
        ))
    }
}
