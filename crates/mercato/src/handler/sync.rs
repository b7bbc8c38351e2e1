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

//! Sync: push the current stock quantity to a remote listing.

use async_trait::async_trait;
use serde_json::json;

use crate::error::HandlerError;
use crate::handler::{parse_input, Handler, HandlerContext, StepRunner};
use crate::models::job::Job;
use crate::models::payload::{JobInput, JobResult};

pub struct SyncHandler;

#[async_trait]
impl Handler for SyncHandler {
    async fn execute(&self, ctx: &HandlerContext, job: &Job) -> Result<JobResult, HandlerError> {
        let JobInput::Sync { listing, quantity } = parse_input(job)? else {
            return Err(HandlerError::InvalidPayload(
                "sync job carries a non-sync payload".to_string(),
            ));
        };

        let mut steps = StepRunner::new(ctx, job);
        let path = steps.profile().quantity_path(&listing.remote_listing_id);
        steps
            .run_http_step(
                "push stock quantity",
                "PUT",
                path,
                json!({ "quantity": quantity }),
                &[],
            )
            .await?;

        Ok(JobResult::Sync {
            remote_listing_id: listing.remote_listing_id,
            quantity,
        })
    }
}
