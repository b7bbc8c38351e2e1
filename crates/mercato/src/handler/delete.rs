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

//! Delete: remove a remote listing and drop its link.
//!
//! A 404 from the marketplace counts as success; the listing is gone
//! either way, and treating it as failure would make a retried delete
//! impossible to finish.

use async_trait::async_trait;
use serde_json::json;

use crate::error::HandlerError;
use crate::handler::{parse_input, Handler, HandlerContext, StepRunner};
use crate::models::job::Job;
use crate::models::payload::{JobInput, JobResult};
use crate::models::task::TaskKind;

pub struct DeleteHandler;

#[async_trait]
impl Handler for DeleteHandler {
    async fn execute(&self, ctx: &HandlerContext, job: &Job) -> Result<JobResult, HandlerError> {
        let JobInput::Delete { listing } = parse_input(job)? else {
            return Err(HandlerError::InvalidPayload(
                "delete job carries a non-delete payload".to_string(),
            ));
        };

        let mut steps = StepRunner::new(ctx, job);
        let path = steps.profile().listing_path(&listing.remote_listing_id);
        steps
            .run_http_step(
                "delete remote listing",
                "DELETE",
                path,
                serde_json::Value::Null,
                &[404],
            )
            .await?;

        steps
            .run_local_step(
                TaskKind::StorageOp,
                "remove listing link",
                json!({"product_id": listing.product_id}),
                || async {
                    ctx.links
                        .remove(&ctx.tenant, job.marketplace, &listing.product_id)
                        .await
                        .map_err(HandlerError::Gateway)?;
                    Ok(json!({"removed": true}))
                },
            )
            .await?;

        Ok(JobResult::Delete {
            remote_listing_id: listing.remote_listing_id,
        })
    }
}
