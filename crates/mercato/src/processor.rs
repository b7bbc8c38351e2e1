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

//! The processor: claims Jobs, runs their Handlers, records outcomes.
//!
//! Several processors may run concurrently against the same database;
//! atomic claiming guarantees each Job has exactly one executor. A
//! result arriving for a Job that went terminal in the meantime (user
//! cancellation winning a race) is logged and discarded, never applied.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::dal::DAL;
use crate::database::universal_types::UniversalUuid;
use crate::error::StorageError;
use crate::handler::{handler_for, HandlerContext, ListingLinkStore};
use crate::models::job::{Job, JobStatus};
use crate::registry::ActionRegistry;
use crate::tenant::TenantContext;
use crate::transport::TransportRegistry;

/// What happened to one claimed Job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    /// Re-queued with backoff; `attempt` counts consumed retries.
    Retrying { attempt: i32, delay: Duration },
    Failed,
    /// The Job went terminal while the Handler ran; its result was
    /// dropped.
    Discarded,
}

/// Report for one `process_next` claim.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub job_id: UniversalUuid,
    pub outcome: ProcessOutcome,
}

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub recovered: usize,
    /// Open Batches the settle pass moved into a final status.
    pub batches_settled: usize,
}

/// Claims and executes Jobs for one deployment.
#[derive(Clone)]
pub struct Processor {
    dal: DAL,
    registry: Arc<ActionRegistry>,
    transports: TransportRegistry,
    links: Arc<dyn ListingLinkStore>,
    config: CoreConfig,
}

impl Processor {
    pub fn new(
        dal: DAL,
        registry: Arc<ActionRegistry>,
        transports: TransportRegistry,
        links: Arc<dyn ListingLinkStore>,
        config: CoreConfig,
    ) -> Self {
        Self {
            dal,
            registry,
            transports,
            links,
            config,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Claims and fully executes the next eligible Job for the tenant.
    /// Returns `None` when nothing is claimable.
    pub async fn process_next(
        &self,
        tenant: &TenantContext,
    ) -> Result<Option<ProcessReport>, StorageError> {
        let Some(job) = self.dal.jobs().claim_next(tenant).await? else {
            return Ok(None);
        };
        info!(
            tenant = %tenant,
            job_id = %job.id,
            marketplace = %job.marketplace,
            action = %job.action,
            attempt = job.retry_count,
            "claimed job"
        );

        // An unknown pair cannot become known by retrying.
        if let Err(e) = self.registry.resolve(job.marketplace, job.action) {
            let outcome = self
                .record_failure(tenant, &job, &e.to_string(), false)
                .await?;
            return Ok(Some(ProcessReport {
                job_id: job.id,
                outcome,
            }));
        }

        let handler = handler_for(job.action);
        let ctx = HandlerContext {
            dal: self.dal.clone(),
            tenant: tenant.clone(),
            transports: self.transports.clone(),
            links: self.links.clone(),
            config: self.config.clone(),
        };

        let outcome = match handler.execute(&ctx, &job).await {
            Ok(result) => match self.dal.jobs().complete(tenant, job.id, &result).await {
                Ok(_) => {
                    info!(job_id = %job.id, "job completed");
                    ProcessOutcome::Completed
                }
                Err(StorageError::TerminalState(v)) => {
                    warn!(job_id = %job.id, %v, "discarding completion for terminal job");
                    ProcessOutcome::Discarded
                }
                Err(StorageError::IllegalTransition { from, .. }) => {
                    warn!(
                        job_id = %job.id,
                        %from,
                        "discarding completion, job left the running state"
                    );
                    ProcessOutcome::Discarded
                }
                Err(e) => return Err(e),
            },
            Err(e) => {
                self.record_failure(tenant, &job, &e.to_string(), e.is_retryable())
                    .await?
            }
        };

        Ok(Some(ProcessReport {
            job_id: job.id,
            outcome,
        }))
    }

    /// Processes Jobs until none is claimable. Returns every report.
    pub async fn drain(&self, tenant: &TenantContext) -> Result<Vec<ProcessReport>, StorageError> {
        let mut reports = Vec::new();
        while let Some(report) = self.process_next(tenant).await? {
            reports.push(report);
        }
        Ok(reports)
    }

    /// One housekeeping pass: expires overdue pending Jobs, re-queues
    /// Jobs stranded in `running` by a crashed processor, and settles
    /// Batches whose final recompute was lost to such a crash.
    pub async fn run_maintenance(
        &self,
        tenant: &TenantContext,
    ) -> Result<MaintenanceReport, StorageError> {
        let expired = self.dal.jobs().sweep_expired(tenant).await?;
        if expired > 0 {
            info!(tenant = %tenant, expired, "expired overdue jobs");
        }
        let recovered = self
            .dal
            .jobs()
            .recover_stalled(tenant, self.config.stalled_grace)
            .await?;
        for job in &recovered {
            warn!(job_id = %job.id, "re-queued job stranded by a crashed processor");
        }
        let batches_settled = self.dal.batches().settle_open(tenant).await?;
        if batches_settled > 0 {
            info!(tenant = %tenant, batches_settled, "settled batches with no live children");
        }
        Ok(MaintenanceReport {
            expired,
            recovered: recovered.len(),
            batches_settled,
        })
    }

    async fn record_failure(
        &self,
        tenant: &TenantContext,
        job: &Job,
        error: &str,
        retryable: bool,
    ) -> Result<ProcessOutcome, StorageError> {
        let delay = if retryable {
            Some(self.config.retry_delay(job.retry_count))
        } else {
            None
        };
        match self
            .dal
            .jobs()
            .fail(tenant, job.id, error, retryable, delay)
            .await
        {
            Ok(updated) if updated.status == JobStatus::Pending => {
                info!(
                    job_id = %job.id,
                    attempt = updated.retry_count,
                    ?delay,
                    error,
                    "job failed, retry scheduled"
                );
                Ok(ProcessOutcome::Retrying {
                    attempt: updated.retry_count,
                    delay: delay.unwrap_or_default(),
                })
            }
            Ok(_) => {
                warn!(job_id = %job.id, error, "job failed permanently");
                Ok(ProcessOutcome::Failed)
            }
            Err(StorageError::TerminalState(v)) => {
                warn!(job_id = %job.id, %v, "discarding failure for terminal job");
                Ok(ProcessOutcome::Discarded)
            }
            Err(StorageError::IllegalTransition { from, .. }) => {
                warn!(
                    job_id = %job.id,
                    %from,
                    "discarding failure, job left the running state"
                );
                Ok(ProcessOutcome::Discarded)
            }
            Err(e) => Err(e),
        }
    }
}
