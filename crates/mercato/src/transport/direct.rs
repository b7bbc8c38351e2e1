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

//! Direct transport: authenticated HTTP calls straight to a
//! marketplace's public API.
//!
//! Credentials come from a [`TokenProvider`] keyed by tenant and
//! marketplace, so one transport instance serves every tenant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::TransportError;
use crate::models::action::Marketplace;
use crate::tenant::TenantContext;
use crate::transport::{HttpTaskSpec, ResponseEnvelope, Transport};

/// Source of per-tenant API credentials.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(
        &self,
        tenant: &TenantContext,
        marketplace: Marketplace,
    ) -> Result<String, TransportError>;
}

/// Fixed in-memory token table. Suits tests and single-box deployments
/// where credentials live in the config file.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenProvider {
    tokens: HashMap<(String, Marketplace), String>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(
        mut self,
        tenant_id: impl Into<String>,
        marketplace: Marketplace,
        token: impl Into<String>,
    ) -> Self {
        self.tokens
            .insert((tenant_id.into(), marketplace), token.into());
        self
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(
        &self,
        tenant: &TenantContext,
        marketplace: Marketplace,
    ) -> Result<String, TransportError> {
        self.tokens
            .get(&(tenant.id().to_string(), marketplace))
            .cloned()
            .ok_or_else(|| {
                TransportError::Connection(format!(
                    "no credentials for tenant '{}' on '{}'",
                    tenant, marketplace
                ))
            })
    }
}

/// [`Transport`] that calls a marketplace API directly over HTTPS.
#[derive(Clone)]
pub struct DirectTransport {
    marketplace: Marketplace,
    base_url: Url,
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    timeout: Duration,
}

impl DirectTransport {
    /// # Panics
    /// Panics if the underlying HTTP client cannot be constructed.
    pub fn new(
        marketplace: Marketplace,
        base_url: Url,
        tokens: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            marketplace,
            base_url,
            client,
            tokens,
            timeout,
        }
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn execute(
        &self,
        tenant: &TenantContext,
        request: &HttpTaskSpec,
    ) -> Result<ResponseEnvelope, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TransportError::MalformedPayload(format!(
                "invalid HTTP method '{}'",
                request.method
            )))?;
        let url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| {
                TransportError::MalformedPayload(format!("invalid path '{}': {}", request.path, e))
            })?;
        let token = self.tokens.bearer_token(tenant, self.marketplace).await?;

        debug!(
            tenant = %tenant,
            marketplace = %self.marketplace,
            method = %request.method,
            %url,
            "direct marketplace call"
        );

        let mut builder = self.client.request(method, url).bearer_auth(token);
        if !request.body.is_null() {
            builder = builder.json(&request.body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Connection(e.to_string())
            }
        })?;

        let status_code = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let body = if text.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };

        Ok(ResponseEnvelope {
            status_code,
            headers,
            body,
        })
    }
}
