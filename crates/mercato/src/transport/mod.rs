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

//! Transports: how HTTP-shaped Tasks reach a marketplace.
//!
//! Two implementations exist. [`relay::RelayTransport`] forwards calls
//! through an external relay agent that holds a live authenticated
//! browser session (Vinted). [`direct::DirectTransport`] calls a
//! marketplace API directly with bearer-token auth (eBay, Etsy).
//! Handlers see only the [`Transport`] trait and a uniform
//! [`ResponseEnvelope`], so a Handler never knows which path its call
//! took.

pub mod direct;
pub mod relay;

pub use direct::{DirectTransport, StaticTokenProvider, TokenProvider};
pub use relay::{RelayChannel, RelayTransport};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::models::action::Marketplace;
use crate::tenant::TenantContext;

/// One HTTP-shaped call a Handler wants executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTaskSpec {
    /// HTTP method, upper case ("GET", "POST", ...).
    pub method: String,
    /// Path relative to the marketplace's API root.
    pub path: String,
    /// JSON request body; `null` for body-less calls.
    pub body: serde_json::Value,
    /// Relay session identifier, when the call must ride a specific
    /// held session. Ignored by direct transports.
    pub carrier: Option<String>,
}

/// Uniform response shape both transports produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

impl ResponseEnvelope {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Converts a non-2xx envelope into the corresponding
    /// [`TransportError::Http`], preserving the body for diagnosis.
    pub fn ensure_success(self) -> Result<ResponseEnvelope, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::Http {
                status: self.status_code,
                body: self.body.to_string(),
            })
        }
    }

    /// Reads a string field out of the body, e.g. the id a marketplace
    /// assigned to a created listing.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(|v| v.as_str())
    }
}

/// Executes HTTP-shaped Tasks against one marketplace.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        tenant: &TenantContext,
        request: &HttpTaskSpec,
    ) -> Result<ResponseEnvelope, TransportError>;
}

/// Maps each marketplace to the Transport that reaches it.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<Marketplace, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, marketplace: Marketplace, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(marketplace, transport);
        self
    }

    pub fn get(&self, marketplace: Marketplace) -> Result<&Arc<dyn Transport>, TransportError> {
        self.transports
            .get(&marketplace)
            .ok_or_else(|| TransportError::Connection(format!(
                "no transport configured for marketplace '{}'",
                marketplace
            )))
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("marketplaces", &self.transports.keys().collect::<Vec<_>>())
            .finish()
    }
}
