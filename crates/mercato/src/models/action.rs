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

//! Marketplaces, action codes and the immutable ActionDefinition catalog
//! entry they key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::database::universal_types::text_enum_sql;

/// A downstream marketplace the orchestrator can publish to.
///
/// Vinted listings are executed over the relay transport (inside a live
/// authenticated browser session); eBay and Etsy use direct authenticated
/// HTTP.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    diesel::expression::AsExpression,
    diesel::deserialize::FromSqlRow,
)]
#[diesel(sql_type = diesel::sql_types::Text)]
#[serde(rename_all = "lowercase")]
pub enum Marketplace {
    Vinted,
    Ebay,
    Etsy,
}

impl Marketplace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Marketplace::Vinted => "vinted",
            Marketplace::Ebay => "ebay",
            Marketplace::Etsy => "etsy",
        }
    }

    /// All supported marketplaces, in catalog order.
    pub fn all() -> &'static [Marketplace] {
        &[Marketplace::Vinted, Marketplace::Ebay, Marketplace::Etsy]
    }
}

impl FromStr for Marketplace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vinted" => Ok(Marketplace::Vinted),
            "ebay" => Ok(Marketplace::Ebay),
            "etsy" => Ok(Marketplace::Etsy),
            other => Err(format!("unknown marketplace '{}'", other)),
        }
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

text_enum_sql!(Marketplace);

/// The operation a Job performs against its marketplace.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    diesel::expression::AsExpression,
    diesel::deserialize::FromSqlRow,
)]
#[diesel(sql_type = diesel::sql_types::Text)]
#[serde(rename_all = "lowercase")]
pub enum ActionCode {
    /// Create a remote listing for a product.
    Publish,
    /// Patch an existing remote listing.
    Update,
    /// Remove a remote listing.
    Delete,
    /// Push the current stock quantity to a remote listing.
    Sync,
}

impl ActionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCode::Publish => "publish",
            ActionCode::Update => "update",
            ActionCode::Delete => "delete",
            ActionCode::Sync => "sync",
        }
    }
}

impl FromStr for ActionCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publish" => Ok(ActionCode::Publish),
            "update" => Ok(ActionCode::Update),
            "delete" => Ok(ActionCode::Delete),
            "sync" => Ok(ActionCode::Sync),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

text_enum_sql!(ActionCode);

/// One catalog entry: the execution policy for a marketplace/action pair.
///
/// Shared, immutable and tenant-independent. Loaded once at startup and
/// cached for the process lifetime (the catalog is effectively static
/// configuration).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub marketplace: Marketplace,
    pub code: ActionCode,
    pub display_name: String,
    pub default_priority: i32,
    pub default_max_retries: i32,
}
