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

//! Explicit tenant context for multi-tenant data isolation.
//!
//! Every DAL call takes a [`TenantContext`] and scopes its queries to that
//! tenant's partition. There is no ambient or connection-level tenant
//! state: a query that forgets the tenant does not compile.

use std::fmt;

use thiserror::Error;

/// Maximum length for tenant identifiers.
const MAX_TENANT_ID_LENGTH: usize = 63;

/// Errors raised when a tenant identifier fails validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantError {
    /// Identifier is empty or exceeds the maximum length.
    #[error("tenant id length invalid: '{id}' (must be 1-{max} characters)")]
    InvalidLength { id: String, max: usize },

    /// Identifier does not start with a letter or underscore.
    #[error("tenant id must start with a letter or underscore: '{0}'")]
    InvalidStart(String),

    /// Identifier contains characters other than alphanumeric or underscore.
    #[error("tenant id contains invalid characters (only alphanumeric and underscore allowed): '{0}'")]
    InvalidCharacters(String),
}

/// A validated tenant identifier threaded through every data-access call.
///
/// Validation enforces identifier-style naming so tenant ids are safe to
/// index, log and embed in diagnostics:
/// - length between 1 and 63 characters
/// - starts with a letter (a-z, A-Z) or underscore
/// - subsequent characters alphanumeric or underscore
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantContext {
    id: String,
}

impl TenantContext {
    /// Validates and wraps a tenant identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, TenantError> {
        let id = id.into();

        if id.is_empty() || id.len() > MAX_TENANT_ID_LENGTH {
            return Err(TenantError::InvalidLength {
                id,
                max: MAX_TENANT_ID_LENGTH,
            });
        }

        let first = id.chars().next().unwrap(); // non-empty checked above
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(TenantError::InvalidStart(id));
        }

        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(TenantError::InvalidCharacters(id));
        }

        Ok(Self { id })
    }

    /// The validated tenant identifier.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
