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

//! Publish: create a remote listing for a product snapshot.
//!
//! Step sequence (media steps are omitted for products without media):
//! validate payload, stage media, upload media, create the listing,
//! persist the product-to-listing link. The link pre-check at the top
//! makes a re-submitted publish complete without touching the
//! marketplace at all.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::error::HandlerError;
use crate::handler::{parse_input, Handler, HandlerContext, ListingLink, StepRunner};
use crate::models::job::Job;
use crate::models::payload::{JobInput, JobResult};
use crate::models::task::TaskKind;

pub struct PublishHandler;

#[async_trait]
impl Handler for PublishHandler {
    async fn execute(&self, ctx: &HandlerContext, job: &Job) -> Result<JobResult, HandlerError> {
        let JobInput::Publish { product } = parse_input(job)? else {
            return Err(HandlerError::InvalidPayload(
                "publish job carries a non-publish payload".to_string(),
            ));
        };

        // Already published? Then there is nothing to do remotely.
        if let Some(link) = ctx
            .links
            .get(&ctx.tenant, job.marketplace, &product.product_id)
            .await
            .map_err(HandlerError::Gateway)?
        {
            info!(
                job_id = %job.id,
                product_id = %product.product_id,
                remote_listing_id = %link.remote_listing_id,
                "product already live on marketplace, completing without remote calls"
            );
            return Ok(JobResult::Publish {
                remote_listing_id: link.remote_listing_id,
                listing_url: link.listing_url,
            });
        }

        let mut steps = StepRunner::new(ctx, job);
        let media_path = steps.profile().media_path().to_string();
        let listings_path = steps.profile().listings_path().to_string();
        let id_field = steps.profile().listing_id_field();
        let url_field = steps.profile().listing_url_field();

        steps
            .run_local_step(
                TaskKind::StorageOp,
                "validate product payload",
                json!({"product_id": product.product_id}),
                || async {
                    if product.currency.len() != 3 {
                        return Err(HandlerError::InvalidPayload(format!(
                            "currency '{}' is not an ISO code",
                            product.currency
                        )));
                    }
                    if product.media_urls.len() > 20 {
                        return Err(HandlerError::InvalidPayload(
                            "more than 20 media files".to_string(),
                        ));
                    }
                    Ok(json!({"ok": true}))
                },
            )
            .await?;

        let mut media_ids = json!([]);
        if !product.media_urls.is_empty() {
            let staged = steps
                .run_local_step(
                    TaskKind::FileOp,
                    "stage media files",
                    json!({"count": product.media_urls.len()}),
                    || async {
                        let staged: Vec<serde_json::Value> = product
                            .media_urls
                            .iter()
                            .enumerate()
                            .map(|(slot, source)| json!({"slot": slot, "source": source}))
                            .collect();
                        Ok(json!({ "staged": staged }))
                    },
                )
                .await?;

            let uploaded = steps
                .run_http_step(
                    "upload media",
                    "POST",
                    media_path,
                    json!({
                        "product_id": product.product_id,
                        "media": staged.get("staged").cloned().unwrap_or(json!([])),
                    }),
                    &[],
                )
                .await?;
            media_ids = uploaded.body.get("media_ids").cloned().unwrap_or(json!([]));
        }

        let created = steps
            .run_http_step(
                "create remote listing",
                "POST",
                listings_path,
                json!({
                    "title": product.title,
                    "description": product.description,
                    "price_cents": product.price_cents,
                    "currency": product.currency,
                    "quantity": product.quantity,
                    "category": product.category,
                    "attributes": product.attributes,
                    "media": media_ids,
                }),
                &[],
            )
            .await?;

        let remote_listing_id = created
            .str_field(id_field)
            .map(str::to_string)
            .or_else(|| {
                created
                    .body
                    .get(id_field)
                    .and_then(|v| v.as_i64())
                    .map(|n| n.to_string())
            })
            .ok_or_else(|| {
                HandlerError::MalformedResponse(format!(
                    "create response is missing '{}'",
                    id_field
                ))
            })?;
        let listing_url = created.str_field(url_field).map(str::to_string);

        let link = ListingLink {
            remote_listing_id: remote_listing_id.clone(),
            listing_url: listing_url.clone(),
        };
        steps
            .run_local_step(
                TaskKind::StorageOp,
                "persist listing link",
                json!({"remote_listing_id": remote_listing_id}),
                || async {
                    ctx.links
                        .put(&ctx.tenant, job.marketplace, &product.product_id, link)
                        .await
                        .map_err(|e| {
                            warn!(
                                job_id = %job.id,
                                remote_listing_id = %remote_listing_id,
                                "listing exists remotely but the link write failed; \
                                 orphaned until a retry re-persists it"
                            );
                            HandlerError::Gateway(e)
                        })?;
                    Ok(json!({"persisted": true}))
                },
            )
            .await?;

        Ok(JobResult::Publish {
            remote_listing_id,
            listing_url,
        })
    }
}
