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

//! Handlers: the action-specific logic that turns a claimed Job into a
//! sequence of executed Tasks.
//!
//! Dispatch is a plain enum match on the action code; marketplace
//! differences (transport kind, API paths, response field names) are
//! data in [`MarketplaceProfile`], not separate handler types.
//!
//! The [`StepRunner`] is what makes Handlers re-entrant: every step is
//! backed by a Task row at a deterministic position, each step commits
//! before the next starts, and a step whose Task already completed is
//! skipped with its stored result replayed. Retrying a half-done Job
//! therefore resumes exactly where it stopped and never repeats a
//! side effect that already happened remotely.

mod delete;
mod publish;
mod sync;
mod update;

pub use delete::DeleteHandler;
pub use publish::PublishHandler;
pub use sync::SyncHandler;
pub use update::UpdateHandler;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::CoreConfig;
use crate::dal::{NewTaskSpec, DAL};
use crate::error::{HandlerError, StorageError, TransportError};
use crate::models::action::{ActionCode, Marketplace};
use crate::models::job::Job;
use crate::models::payload::JobResult;
use crate::models::task::TaskKind;
use crate::tenant::TenantContext;
use crate::transport::{HttpTaskSpec, ResponseEnvelope, TransportRegistry};

/// Executes one claimed Job to a result, or fails trying.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn execute(&self, ctx: &HandlerContext, job: &Job) -> Result<JobResult, HandlerError>;
}

/// Picks the Handler for an action. Adding an action without a Handler
/// arm is a compile error.
pub fn handler_for(action: ActionCode) -> &'static dyn Handler {
    match action {
        ActionCode::Publish => &PublishHandler,
        ActionCode::Update => &UpdateHandler,
        ActionCode::Delete => &DeleteHandler,
        ActionCode::Sync => &SyncHandler,
    }
}

/// Everything a Handler needs besides the Job itself.
#[derive(Clone)]
pub struct HandlerContext {
    pub dal: DAL,
    pub tenant: TenantContext,
    pub transports: TransportRegistry,
    pub links: Arc<dyn ListingLinkStore>,
    pub config: CoreConfig,
}

/// How one marketplace is reached: which transport kind its HTTP Tasks
/// use, which relay session they ride, and where its API lives.
#[derive(Debug, Clone)]
pub struct MarketplaceProfile {
    pub marketplace: Marketplace,
    pub http_kind: TaskKind,
    pub carrier: Option<String>,
}

impl MarketplaceProfile {
    pub fn for_marketplace(marketplace: Marketplace) -> Self {
        match marketplace {
            Marketplace::Vinted => Self {
                marketplace,
                http_kind: TaskKind::RelayHttp,
                carrier: Some("vinted-web".to_string()),
            },
            Marketplace::Ebay | Marketplace::Etsy => Self {
                marketplace,
                http_kind: TaskKind::DirectHttp,
                carrier: None,
            },
        }
    }

    pub fn listings_path(&self) -> &'static str {
        match self.marketplace {
            Marketplace::Vinted => "/api/v2/items",
            Marketplace::Ebay => "/sell/listing/v1/listings",
            Marketplace::Etsy => "/v3/application/listings",
        }
    }

    pub fn listing_path(&self, remote_listing_id: &str) -> String {
        format!("{}/{}", self.listings_path(), remote_listing_id)
    }

    pub fn media_path(&self) -> &'static str {
        match self.marketplace {
            Marketplace::Vinted => "/api/v2/photos",
            Marketplace::Ebay => "/sell/listing/v1/media",
            Marketplace::Etsy => "/v3/application/uploads",
        }
    }

    pub fn quantity_path(&self, remote_listing_id: &str) -> String {
        format!("{}/{}/quantity", self.listings_path(), remote_listing_id)
    }

    /// Name of the listing-id field in this marketplace's create
    /// response.
    pub fn listing_id_field(&self) -> &'static str {
        match self.marketplace {
            Marketplace::Vinted => "id",
            Marketplace::Ebay => "listingId",
            Marketplace::Etsy => "listing_id",
        }
    }

    /// Name of the public-URL field in a create response, when present.
    pub fn listing_url_field(&self) -> &'static str {
        "url"
    }
}

/// A persisted product-to-listing mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLink {
    pub remote_listing_id: String,
    pub listing_url: Option<String>,
}

/// Boundary to the catalog that records which products are live on
/// which marketplaces. Failures are reported as plain strings and
/// treated as transient gateway errors.
#[async_trait]
pub trait ListingLinkStore: Send + Sync {
    async fn get(
        &self,
        tenant: &TenantContext,
        marketplace: Marketplace,
        product_id: &str,
    ) -> Result<Option<ListingLink>, String>;

    async fn put(
        &self,
        tenant: &TenantContext,
        marketplace: Marketplace,
        product_id: &str,
        link: ListingLink,
    ) -> Result<(), String>;

    async fn remove(
        &self,
        tenant: &TenantContext,
        marketplace: Marketplace,
        product_id: &str,
    ) -> Result<(), String>;
}

/// In-memory link store for tests and single-process deployments.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLinkStore {
    entries: Arc<tokio::sync::RwLock<HashMap<(String, Marketplace, String), ListingLink>>>,
}

impl InMemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListingLinkStore for InMemoryLinkStore {
    async fn get(
        &self,
        tenant: &TenantContext,
        marketplace: Marketplace,
        product_id: &str,
    ) -> Result<Option<ListingLink>, String> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(tenant.id().to_string(), marketplace, product_id.to_string()))
            .cloned())
    }

    async fn put(
        &self,
        tenant: &TenantContext,
        marketplace: Marketplace,
        product_id: &str,
        link: ListingLink,
    ) -> Result<(), String> {
        let mut entries = self.entries.write().await;
        entries.insert(
            (tenant.id().to_string(), marketplace, product_id.to_string()),
            link,
        );
        Ok(())
    }

    async fn remove(
        &self,
        tenant: &TenantContext,
        marketplace: Marketplace,
        product_id: &str,
    ) -> Result<(), String> {
        let mut entries = self.entries.write().await;
        entries.remove(&(tenant.id().to_string(), marketplace, product_id.to_string()));
        Ok(())
    }
}

/// Runs a Handler's steps against their backing Task rows.
///
/// Positions are assigned in call order starting at zero, so the step
/// sequence of a given Job shape is deterministic across attempts.
pub struct StepRunner<'a> {
    ctx: &'a HandlerContext,
    job: &'a Job,
    profile: MarketplaceProfile,
    position: i32,
}

impl<'a> StepRunner<'a> {
    pub fn new(ctx: &'a HandlerContext, job: &'a Job) -> Self {
        Self {
            ctx,
            job,
            profile: MarketplaceProfile::for_marketplace(job.marketplace),
            position: 0,
        }
    }

    pub fn profile(&self) -> &MarketplaceProfile {
        &self.profile
    }

    fn next_position(&mut self) -> i32 {
        let position = self.position;
        self.position += 1;
        position
    }

    /// Runs a local (storage or file) step. A step whose Task already
    /// completed in an earlier attempt is skipped and its stored result
    /// replayed.
    pub async fn run_local_step<F, Fut>(
        &mut self,
        kind: TaskKind,
        description: &str,
        payload: serde_json::Value,
        work: F,
    ) -> Result<serde_json::Value, HandlerError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<serde_json::Value, HandlerError>>,
    {
        let position = self.next_position();
        let (task, created) = self
            .ctx
            .dal
            .tasks()
            .get_or_create(
                &self.ctx.tenant,
                self.job.id,
                NewTaskSpec {
                    kind,
                    description: description.to_string(),
                    position,
                    payload,
                    method: None,
                    path: None,
                    carrier: None,
                },
            )
            .await?;

        if task.status.is_success() {
            debug!(job_id = %self.job.id, position, "step already done, replaying stored result");
            let stored = task
                .parsed_result()
                .map_err(|e| HandlerError::Storage(e.into()))?;
            return Ok(stored.unwrap_or(serde_json::Value::Null));
        }
        if !created {
            self.ctx
                .dal
                .tasks()
                .increment_retry(&self.ctx.tenant, task.id)
                .await?;
        }
        self.ctx
            .dal
            .tasks()
            .mark_running(&self.ctx.tenant, task.id)
            .await?;

        match work().await {
            Ok(result) => {
                self.ctx
                    .dal
                    .tasks()
                    .mark_completed(&self.ctx.tenant, task.id, &result)
                    .await?;
                Ok(result)
            }
            Err(e) => {
                self.ctx
                    .dal
                    .tasks()
                    .mark_failed(&self.ctx.tenant, task.id, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Runs an HTTP step over the marketplace's transport. Statuses in
    /// `acceptable` count as success alongside 2xx (e.g. 404 on a
    /// delete that already happened).
    pub async fn run_http_step(
        &mut self,
        description: &str,
        method: &str,
        path: String,
        body: serde_json::Value,
        acceptable: &[u16],
    ) -> Result<ResponseEnvelope, HandlerError> {
        let position = self.next_position();
        let spec = HttpTaskSpec {
            method: method.to_string(),
            path,
            body,
            carrier: self.profile.carrier.clone(),
        };
        let (task, created) = self
            .ctx
            .dal
            .tasks()
            .get_or_create(
                &self.ctx.tenant,
                self.job.id,
                NewTaskSpec {
                    kind: self.profile.http_kind,
                    description: description.to_string(),
                    position,
                    payload: spec.body.clone(),
                    method: Some(spec.method.clone()),
                    path: Some(spec.path.clone()),
                    carrier: spec.carrier.clone(),
                },
            )
            .await?;

        if task.status.is_success() {
            debug!(job_id = %self.job.id, position, "http step already done, replaying response");
            let stored = task
                .parsed_result()
                .map_err(|e| HandlerError::Storage(e.into()))?
                .ok_or_else(|| {
                    HandlerError::MalformedResponse(
                        "completed http task has no stored response".to_string(),
                    )
                })?;
            let envelope: ResponseEnvelope =
                serde_json::from_value(stored).map_err(|e| HandlerError::Storage(e.into()))?;
            return Ok(envelope);
        }
        if !created {
            self.ctx
                .dal
                .tasks()
                .increment_retry(&self.ctx.tenant, task.id)
                .await?;
        }
        self.ctx
            .dal
            .tasks()
            .mark_running(&self.ctx.tenant, task.id)
            .await?;

        let transport = self
            .ctx
            .transports
            .get(self.job.marketplace)
            .map_err(|e| HandlerError::Transport(e))?;
        match transport.execute(&self.ctx.tenant, &spec).await {
            Ok(envelope) => {
                if envelope.is_success() || acceptable.contains(&envelope.status_code) {
                    let stored = serde_json::to_value(&envelope)
                        .map_err(|e| HandlerError::Storage(e.into()))?;
                    self.ctx
                        .dal
                        .tasks()
                        .mark_completed(&self.ctx.tenant, task.id, &stored)
                        .await?;
                    Ok(envelope)
                } else {
                    self.ctx
                        .dal
                        .tasks()
                        .mark_failed(
                            &self.ctx.tenant,
                            task.id,
                            &format!("remote returned status {}", envelope.status_code),
                        )
                        .await?;
                    Err(TransportError::Http {
                        status: envelope.status_code,
                        body: envelope.body.to_string(),
                    }
                    .into())
                }
            }
            Err(e) => {
                if e.is_timeout() {
                    self.ctx
                        .dal
                        .tasks()
                        .mark_timeout(&self.ctx.tenant, task.id, &e.to_string())
                        .await?;
                } else {
                    self.ctx
                        .dal
                        .tasks()
                        .mark_failed(&self.ctx.tenant, task.id, &e.to_string())
                        .await?;
                }
                Err(e.into())
            }
        }
    }
}

/// Parses a Job's stored input, mapping a schema mismatch to the
/// permanent [`HandlerError::InvalidPayload`].
pub(crate) fn parse_input(job: &Job) -> Result<crate::models::payload::JobInput, HandlerError> {
    job.parsed_input()
        .map_err(|e| HandlerError::InvalidPayload(e.to_string()))
}
