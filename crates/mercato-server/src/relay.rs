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

//! HTTP client for the relay agent.
//!
//! The agent holds live browser sessions for session-bound marketplaces
//! and exposes one endpoint, `POST /forward`. It answers with the
//! marketplace's response wrapped in a [`ResponseEnvelope`], whatever
//! the marketplace's own status was; non-2xx from the agent itself
//! means the agent (not the marketplace) is unhealthy.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use url::Url;

use mercato::transport::{HttpTaskSpec, RelayChannel, ResponseEnvelope};
use mercato::TransportError;

#[derive(Debug, Clone)]
pub struct HttpRelayChannel {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRelayChannel {
    /// # Panics
    /// Panics if the underlying HTTP client cannot be constructed.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let base = Url::parse(base_url)
            .map_err(|e| TransportError::MalformedPayload(format!("bad relay url: {}", e)))?;
        let endpoint = base
            .join("forward")
            .map_err(|e| TransportError::MalformedPayload(format!("bad relay url: {}", e)))?;
        Ok(Self {
            client: reqwest::Client::builder()
                .build()
                .expect("Failed to build HTTP client"),
            endpoint,
        })
    }
}

#[async_trait]
impl RelayChannel for HttpRelayChannel {
    async fn forward(
        &self,
        tenant_id: &str,
        request: &HttpTaskSpec,
    ) -> Result<ResponseEnvelope, TransportError> {
        debug!(tenant_id, method = %request.method, path = %request.path, "forwarding to relay agent");
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({
                "tenant": tenant_id,
                "method": request.method,
                "path": request.path,
                "body": request.body,
                "carrier": request.carrier,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Connection(format!("relay agent timed out: {}", e))
                } else {
                    TransportError::Connection(format!("relay agent unreachable: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Connection(format!(
                "relay agent answered {}: {}",
                status, body
            )));
        }

        response
            .json::<ResponseEnvelope>()
            .await
            .map_err(|e| TransportError::MalformedPayload(format!("bad relay envelope: {}", e)))
    }
}
