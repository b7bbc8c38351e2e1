/*
 *  Copyright 2025-2026 Mercato Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Relay transport: marketplace calls executed through an external
//! agent holding a live authenticated browser session.
//!
//! The agent itself is outside this crate; it is reached through the
//! [`RelayChannel`] trait so tests can stand in a mock and the server
//! can plug in its HTTP client. The transport adds what the channel
//! does not: the per-call deadline and uniform error classification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::TransportError;
use crate::tenant::TenantContext;
use crate::transport::{HttpTaskSpec, ResponseEnvelope, Transport};

/// The boundary to the session-holding relay agent.
#[async_trait]
pub trait RelayChannel: Send + Sync {
    /// Forwards one call into the held session and returns whatever the
    /// marketplace answered.
    async fn forward(
        &self,
        tenant_id: &str,
        request: &HttpTaskSpec,
    ) -> Result<ResponseEnvelope, TransportError>;
}

/// [`Transport`] over a [`RelayChannel`].
#[derive(Clone)]
pub struct RelayTransport {
    channel: Arc<dyn RelayChannel>,
    timeout: Duration,
}

impl RelayTransport {
    /// Relay calls ride a real browser session, so the default deadline
    /// is generous.
    pub fn new(channel: Arc<dyn RelayChannel>, timeout: Duration) -> Self {
        Self { channel, timeout }
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn execute(
        &self,
        tenant: &TenantContext,
        request: &HttpTaskSpec,
    ) -> Result<ResponseEnvelope, TransportError> {
        debug!(
            tenant = %tenant,
            method = %request.method,
            path = %request.path,
            carrier = ?request.carrier,
            "forwarding call through relay"
        );
        match tokio::time::timeout(self.timeout, self.channel.forward(tenant.id(), request)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }
}
