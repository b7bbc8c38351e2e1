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

//! Batch persistence: atomic creation of a Batch with its Jobs, and the
//! counter/status recomputation that keeps the Batch row consistent
//! with its children.
//!
//! Recompute recounts from the actual child rows every time, so it is
//! self-correcting: a recompute lost to a crash is repaired by the next
//! child state change, or by the maintenance [`settle_open`] pass when
//! no child change is coming. On PostgreSQL the Batch row is locked for
//! the duration so two children finishing at once serialize their
//! recomputes; on SQLite the single pooled connection serializes them.
//!
//! [`settle_open`]: BatchDAL::settle_open

use std::time::Duration;

use diesel::prelude::*;

use crate::database::schema::{batches, jobs, tasks};
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::database::Database;
use crate::error::StorageError;
use crate::models::action::{ActionCode, Marketplace};
use crate::models::batch::{Batch, BatchStatus, ChildCounts, NewBatch};
use crate::models::job::{Job, JobStatus, NewJob};
use crate::models::payload::JobInput;
use crate::models::task::TaskStatus;
use crate::tenant::TenantContext;

use super::with_conn;

/// One item of a bulk request, becoming one child Job.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub input: JobInput,
    pub target_entity_id: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Everything needed to create a Batch and its child Jobs atomically.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Caller-chosen label for the bulk action, e.g. "autumn-republish".
    pub batch_key: String,
    pub marketplace: Marketplace,
    pub action: ActionCode,
    pub priority: i32,
    pub max_retries: i32,
    pub ttl: Duration,
    pub items: Vec<BatchItem>,
}

/// Batch persistence operations, scoped to one tenant per call.
#[derive(Clone, Debug)]
pub struct BatchDAL {
    pub(super) database: Database,
}

impl BatchDAL {
    /// Creates a Batch and all of its child Jobs in one transaction.
    /// Either the whole bulk action is accepted or none of it is.
    ///
    /// Every item's payload must match the Batch's action. An empty
    /// item list produces a trivially completed Batch.
    pub async fn create(
        &self,
        tenant: &TenantContext,
        request: BatchRequest,
    ) -> Result<(Batch, Vec<Job>), StorageError> {
        if request.batch_key.trim().is_empty() {
            return Err(StorageError::InvalidInput(
                "batch_key must not be empty".into(),
            ));
        }
        for item in &request.items {
            item.input.validate().map_err(StorageError::InvalidInput)?;
            if item.input.action() != request.action {
                return Err(StorageError::InvalidInput(format!(
                    "item payload is for action '{}' but batch is '{}'",
                    item.input.action(),
                    request.action
                )));
            }
        }

        let tenant_id = tenant.id().to_string();
        let now = UniversalTimestamp::now();
        let ttl = chrono::Duration::from_std(request.ttl)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let batch_id = UniversalUuid::new_v4();
        let total = request.items.len() as i32;

        let new_batch = NewBatch {
            id: batch_id,
            tenant_id: tenant_id.clone(),
            batch_key: request.batch_key,
            marketplace: request.marketplace,
            action: request.action,
            status: if total == 0 {
                BatchStatus::Completed
            } else {
                BatchStatus::Pending
            },
            total_count: total,
            priority: request.priority,
            created_at: now,
            updated_at: now,
        };

        let mut new_jobs = Vec::with_capacity(request.items.len());
        for item in request.items {
            new_jobs.push(NewJob {
                id: UniversalUuid::new_v4(),
                tenant_id: tenant_id.clone(),
                marketplace: request.marketplace,
                action: request.action,
                target_entity_id: item.target_entity_id,
                batch_id: Some(batch_id),
                status: JobStatus::Pending,
                priority: request.priority,
                retry_count: 0,
                max_retries: request.max_retries,
                expires_at: UniversalTimestamp(now.0 + ttl),
                created_at: now,
                input: serde_json::to_string(&item.input)?,
                idempotency_key: item.idempotency_key,
                updated_at: now,
            });
        }

        with_conn!(self.database, conn => {
            conn.transaction::<(Batch, Vec<Job>), StorageError, _>(|conn| {
                let batch = diesel::insert_into(batches::table)
                    .values(&new_batch)
                    .get_result::<Batch>(conn)?;
                let mut children = Vec::with_capacity(new_jobs.len());
                for new_job in &new_jobs {
                    let job = diesel::insert_into(jobs::table)
                        .values(new_job)
                        .get_result::<Job>(conn)
                        .map_err(|e| match e {
                            diesel::result::Error::DatabaseError(
                                diesel::result::DatabaseErrorKind::UniqueViolation,
                                _,
                            ) => StorageError::Conflict {
                                key: new_job.idempotency_key.clone().unwrap_or_default(),
                            },
                            other => StorageError::Database(other),
                        })?;
                    children.push(job);
                }
                Ok((batch, children))
            })
        })
    }

    /// Fetches a Batch by id within the tenant's partition.
    pub async fn get_by_id(
        &self,
        tenant: &TenantContext,
        batch_id: UniversalUuid,
    ) -> Result<Batch, StorageError> {
        let tenant_id = tenant.id().to_string();
        let id_str = batch_id.to_string();
        with_conn!(self.database, conn => {
            batches::table
                .filter(batches::tenant_id.eq(&tenant_id))
                .filter(batches::id.eq(batch_id))
                .first::<Batch>(conn)
                .optional()
                .map_err(StorageError::Database)?
                .ok_or(StorageError::NotFound {
                    entity: "batch",
                    id: id_str,
                })
        })
    }

    /// Lists a tenant's Batches, newest first.
    pub async fn list(
        &self,
        tenant: &TenantContext,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Batch>, StorageError> {
        let tenant_id = tenant.id().to_string();
        with_conn!(self.database, conn => {
            batches::table
                .filter(batches::tenant_id.eq(&tenant_id))
                .order(batches::created_at.desc())
                .limit(limit)
                .offset(offset)
                .load::<Batch>(conn)
                .map_err(StorageError::Database)
        })
    }

    /// Lists a Batch's child Jobs in creation order.
    pub async fn list_jobs(
        &self,
        tenant: &TenantContext,
        batch_id: UniversalUuid,
    ) -> Result<Vec<Job>, StorageError> {
        let tenant_id = tenant.id().to_string();
        with_conn!(self.database, conn => {
            jobs::table
                .filter(jobs::tenant_id.eq(&tenant_id))
                .filter(jobs::batch_id.eq(Some(batch_id)))
                .order(jobs::created_at.asc())
                .load::<Job>(conn)
                .map_err(StorageError::Database)
        })
    }

    /// Recounts the Batch's children and updates its outcome counters
    /// and derived status. `total_count` is fixed at creation and never
    /// touched here, so a child detached later cannot shrink it.
    pub async fn recompute(
        &self,
        tenant: &TenantContext,
        batch_id: UniversalUuid,
    ) -> Result<Batch, StorageError> {
        let tenant_id = tenant.id().to_string();
        let id_str = batch_id.to_string();
        let now = UniversalTimestamp::now();
        let lock_row = self.database.backend().is_postgres();

        with_conn!(self.database, conn => {
            conn.transaction::<Batch, StorageError, _>(|conn| {
                if lock_row {
                    diesel::sql_query(
                        "SELECT id FROM batches WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
                    )
                    .bind::<diesel::sql_types::Binary, _>(
                        batch_id.as_uuid().as_bytes().to_vec(),
                    )
                    .bind::<diesel::sql_types::Text, _>(&tenant_id)
                    .execute(conn)?;
                }

                let batch = batches::table
                    .filter(batches::tenant_id.eq(&tenant_id))
                    .filter(batches::id.eq(batch_id))
                    .first::<Batch>(conn)
                    .optional()?
                    .ok_or(StorageError::NotFound {
                        entity: "batch",
                        id: id_str,
                    })?;

                let statuses: Vec<JobStatus> = jobs::table
                    .filter(jobs::tenant_id.eq(&tenant_id))
                    .filter(jobs::batch_id.eq(Some(batch_id)))
                    .select(jobs::status)
                    .load(conn)?;
                let mut counts = ChildCounts::default();
                for status in statuses {
                    counts.record(status);
                }
                let derived = BatchStatus::derive(&counts, batch.cancelled_at.is_some());

                diesel::update(
                    batches::table
                        .filter(batches::tenant_id.eq(&tenant_id))
                        .filter(batches::id.eq(batch_id)),
                )
                .set((
                    batches::status.eq(derived),
                    batches::completed_count.eq(counts.completed),
                    batches::failed_count.eq(counts.failed),
                    batches::cancelled_count.eq(counts.cancelled),
                    batches::updated_at.eq(now),
                ))
                .get_result::<Batch>(conn)
                .map_err(StorageError::Database)
            })
        })
    }

    /// Recomputes every Batch still `pending` or `running`, catching
    /// rows whose recompute was lost between a child's terminal
    /// transition and the follow-up recompute (a crash in that window
    /// leaves the last child terminal with nothing left to trigger the
    /// recount). Returns how many Batches settled into a final status.
    pub async fn settle_open(&self, tenant: &TenantContext) -> Result<usize, StorageError> {
        let tenant_id = tenant.id().to_string();
        let open: Vec<UniversalUuid> = with_conn!(self.database, conn => {
            batches::table
                .filter(batches::tenant_id.eq(&tenant_id))
                .filter(batches::status.eq_any([BatchStatus::Pending, BatchStatus::Running]))
                .select(batches::id)
                .load(conn)
                .map_err(StorageError::Database)
        })?;

        let mut settled = 0;
        for batch_id in open {
            if self.recompute(tenant, batch_id).await?.status.is_settled() {
                settled += 1;
            }
        }
        Ok(settled)
    }

    /// Cancels the Batch: records the user cancel on the Batch row,
    /// cancels every unfinished child Job (and their unfinished Tasks)
    /// in one transaction, then recomputes. The recompute sees the
    /// recorded cancel and settles the Batch as `Cancelled`.
    ///
    /// Children already terminal keep their outcome. A Handler still
    /// holding a just-cancelled child will have its result rejected by
    /// the terminal-state check when it reports back. Cancelling an
    /// already-settled Batch changes nothing and returns it as is.
    pub async fn cancel(
        &self,
        tenant: &TenantContext,
        batch_id: UniversalUuid,
    ) -> Result<Batch, StorageError> {
        let tenant_id = tenant.id().to_string();
        let id_str = batch_id.to_string();
        let now = UniversalTimestamp::now();

        let already_settled = with_conn!(self.database, conn => {
            conn.transaction::<bool, StorageError, _>(|conn| {
                let batch = batches::table
                    .filter(batches::tenant_id.eq(&tenant_id))
                    .filter(batches::id.eq(batch_id))
                    .first::<Batch>(conn)
                    .optional()?
                    .ok_or(StorageError::NotFound {
                        entity: "batch",
                        id: id_str,
                    })?;
                if batch.status.is_settled() {
                    return Ok(true);
                }

                diesel::update(
                    batches::table
                        .filter(batches::tenant_id.eq(&tenant_id))
                        .filter(batches::id.eq(batch_id)),
                )
                .set((
                    batches::cancelled_at.eq(Some(now)),
                    batches::updated_at.eq(now),
                ))
                .execute(conn)?;

                let victims: Vec<UniversalUuid> = jobs::table
                    .filter(jobs::tenant_id.eq(&tenant_id))
                    .filter(jobs::batch_id.eq(Some(batch_id)))
                    .filter(jobs::status.eq_any([
                        JobStatus::Pending,
                        JobStatus::Running,
                        JobStatus::Paused,
                    ]))
                    .select(jobs::id)
                    .load(conn)?;
                if victims.is_empty() {
                    return Ok(false);
                }

                diesel::update(jobs::table.filter(jobs::id.eq_any(victims.clone())))
                    .set((
                        jobs::status.eq(JobStatus::Cancelled),
                        jobs::completed_at.eq(Some(now)),
                        jobs::retry_at.eq(None::<UniversalTimestamp>),
                        jobs::updated_at.eq(now),
                    ))
                    .execute(conn)?;
                diesel::update(
                    tasks::table
                        .filter(tasks::job_id.eq_any(victims))
                        .filter(tasks::status.eq_any([TaskStatus::Pending, TaskStatus::Running])),
                )
                .set((
                    tasks::status.eq(TaskStatus::Cancelled),
                    tasks::completed_at.eq(Some(now)),
                    tasks::updated_at.eq(now),
                ))
                .execute(conn)?;
                Ok(false)
            })
        })?;

        if already_settled {
            return self.get_by_id(tenant, batch_id).await;
        }
        self.recompute(tenant, batch_id).await
    }
}
