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

//! Job payload schemas.
//!
//! Job `input` and `result` columns store JSON whose shape is a tagged
//! union keyed by the action, so a `publish` input cannot be confused
//! with a `sync` input at deserialization time. Handlers match on the
//! variant and get the right fields with no downcasting.

use serde::{Deserialize, Serialize};

use crate::models::action::ActionCode;

/// A point-in-time copy of the product a `publish` job works from.
///
/// Snapshot semantics: edits to the product after job creation do not
/// affect an in-flight publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    /// Caller-side product identifier.
    pub product_id: String,
    pub title: String,
    pub description: String,
    /// Price in minor units (cents).
    pub price_cents: i64,
    pub currency: String,
    pub quantity: i32,
    #[serde(default)]
    pub category: Option<String>,
    /// Source URLs of the media to stage and upload, in display order.
    #[serde(default)]
    pub media_urls: Vec<String>,
    /// Marketplace-specific attributes passed through verbatim.
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// A reference to an already-published remote listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRef {
    /// Caller-side product identifier.
    pub product_id: String,
    /// Identifier the marketplace assigned at publish time.
    pub remote_listing_id: String,
}

/// Fields an `update` job may change on a remote listing. Absent fields
/// are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i32>,
}

impl ListingChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.price_cents.is_none()
            && self.quantity.is_none()
    }
}

/// Input payload of a Job, tagged by action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum JobInput {
    Publish { product: ProductSnapshot },
    Update { listing: ListingRef, changes: ListingChanges },
    Delete { listing: ListingRef },
    Sync { listing: ListingRef, quantity: i32 },
}

impl JobInput {
    /// The action this payload shape belongs to.
    pub fn action(&self) -> ActionCode {
        match self {
            JobInput::Publish { .. } => ActionCode::Publish,
            JobInput::Update { .. } => ActionCode::Update,
            JobInput::Delete { .. } => ActionCode::Delete,
            JobInput::Sync { .. } => ActionCode::Sync,
        }
    }

    /// The caller-side product this job targets.
    pub fn product_id(&self) -> &str {
        match self {
            JobInput::Publish { product } => &product.product_id,
            JobInput::Update { listing, .. }
            | JobInput::Delete { listing }
            | JobInput::Sync { listing, .. } => &listing.product_id,
        }
    }

    /// Rejects payloads that are structurally valid JSON but make no
    /// sense as work, before a Job row is ever written.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            JobInput::Publish { product } => {
                if product.product_id.is_empty() {
                    return Err("product_id must not be empty".into());
                }
                if product.title.trim().is_empty() {
                    return Err("title must not be empty".into());
                }
                if product.price_cents < 0 {
                    return Err("price_cents must not be negative".into());
                }
                if product.quantity < 0 {
                    return Err("quantity must not be negative".into());
                }
                Ok(())
            }
            JobInput::Update { listing, changes } => {
                if listing.remote_listing_id.is_empty() {
                    return Err("remote_listing_id must not be empty".into());
                }
                if changes.is_empty() {
                    return Err("update carries no changes".into());
                }
                if matches!(changes.price_cents, Some(p) if p < 0) {
                    return Err("price_cents must not be negative".into());
                }
                Ok(())
            }
            JobInput::Delete { listing } => {
                if listing.remote_listing_id.is_empty() {
                    return Err("remote_listing_id must not be empty".into());
                }
                Ok(())
            }
            JobInput::Sync { listing, quantity } => {
                if listing.remote_listing_id.is_empty() {
                    return Err("remote_listing_id must not be empty".into());
                }
                if *quantity < 0 {
                    return Err("quantity must not be negative".into());
                }
                Ok(())
            }
        }
    }
}

/// Result payload of a completed Job, tagged by action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum JobResult {
    Publish {
        remote_listing_id: String,
        /// Public URL of the created listing, when the marketplace
        /// returns one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        listing_url: Option<String>,
    },
    Update {
        remote_listing_id: String,
    },
    Delete {
        remote_listing_id: String,
    },
    Sync {
        remote_listing_id: String,
        quantity: i32,
    },
}
