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

//! Action registry: the immutable catalog of supported
//! marketplace/action pairs and their execution policy.
//!
//! The catalog is shared across all tenants and loaded once per
//! process. Resolution failures are permanent by definition: retrying a
//! Job cannot make an unknown pair known.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::RegistryError;
use crate::models::action::{ActionCode, ActionDefinition, Marketplace};

static BUILTIN_CATALOG: Lazy<ActionRegistry> = Lazy::new(|| {
    let mut defs = Vec::new();
    for &marketplace in Marketplace::all() {
        for code in [
            ActionCode::Publish,
            ActionCode::Update,
            ActionCode::Delete,
            ActionCode::Sync,
        ] {
            defs.push(ActionDefinition {
                marketplace,
                code,
                display_name: format!("{} {}", marketplace, code),
                // sync is cheap and frequent, so it jumps the queue
                default_priority: if code == ActionCode::Sync { 10 } else { 0 },
                default_max_retries: 3,
            });
        }
    }
    ActionRegistry::from_catalog(defs)
});

/// Read-only lookup from (marketplace, action) to its definition.
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    entries: HashMap<(Marketplace, ActionCode), ActionDefinition>,
}

impl ActionRegistry {
    /// Builds a registry from an explicit catalog. Later duplicates of
    /// the same pair replace earlier ones.
    pub fn from_catalog(definitions: Vec<ActionDefinition>) -> Self {
        let entries = definitions
            .into_iter()
            .map(|d| ((d.marketplace, d.code), d))
            .collect();
        Self { entries }
    }

    /// The built-in catalog: every marketplace supports every action.
    pub fn builtin() -> &'static ActionRegistry {
        &BUILTIN_CATALOG
    }

    /// Resolves a pair to its definition.
    pub fn resolve(
        &self,
        marketplace: Marketplace,
        action: ActionCode,
    ) -> Result<&ActionDefinition, RegistryError> {
        self.entries
            .get(&(marketplace, action))
            .ok_or(RegistryError::UnknownAction {
                marketplace,
                action,
            })
    }

    /// Whether the pair is registered.
    pub fn supports(&self, marketplace: Marketplace, action: ActionCode) -> bool {
        self.entries.contains_key(&(marketplace, action))
    }

    /// All definitions, in no particular order.
    pub fn definitions(&self) -> impl Iterator<Item = &ActionDefinition> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
