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

//! Update: patch changed fields on an existing remote listing.

use async_trait::async_trait;
use serde_json::json;

use crate::error::HandlerError;
use crate::handler::{parse_input, Handler, HandlerContext, StepRunner};
use crate::models::job::Job;
use crate::models::payload::{JobInput, JobResult};

pub struct UpdateHandler;

#[async_trait]
impl Handler for UpdateHandler {
    async fn execute(&self, ctx: &HandlerContext, job: &Job) -> Result<JobResult, HandlerError> {
        let JobInput::Update { listing, changes } = parse_input(job)? else {
            return Err(HandlerError::InvalidPayload(
                "update job carries a non-update payload".to_string(),
            ));
        };

        let mut body = json!({});
        if let Some(title) = &changes.title {
            body["title"] = json!(title);
        }
        if let Some(description) = &changes.description {
            body["description"] = json!(description);
        }
        if let Some(price_cents) = changes.price_cents {
            body["price_cents"] = json!(price_cents);
        }
        if let Some(quantity) = changes.quantity {
            body["quantity"] = json!(quantity);
        }

        let mut steps = StepRunner::new(ctx, job);
        let path = steps.profile().listing_path(&listing.remote_listing_id);
        steps
            .run_http_step("update remote listing", "PATCH", path, body, &[])
            .await?;

        Ok(JobResult::Update {
            remote_listing_id: listing.remote_listing_id,
        })
    }
}
