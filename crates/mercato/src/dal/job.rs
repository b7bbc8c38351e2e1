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

//! Job persistence: creation with idempotency, atomic claiming, and
//! every state transition of the Job state machine.
//!
//! All transitions are validated against [`JobStatus::check_transition`]
//! inside the same transaction that applies them, so a terminal Job can
//! never be mutated even under concurrent writers.

use std::time::Duration;

use diesel::prelude::*;
use tracing::debug;

use crate::database::connection::AnyPool;
use crate::database::schema::{jobs, tasks};
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::database::Database;
use crate::error::StorageError;
use crate::models::action::{ActionDefinition, Marketplace};
use crate::models::job::{Job, JobStatus, NewJob};
use crate::models::payload::{JobInput, JobResult};
use crate::models::task::TaskStatus;
use crate::tenant::TenantContext;

use super::batch::BatchDAL;
use super::with_conn;

/// Everything needed to create one Job.
#[derive(Debug, Clone)]
pub struct NewJobRequest {
    pub marketplace: Marketplace,
    pub input: JobInput,
    pub target_entity_id: Option<String>,
    pub batch_id: Option<UniversalUuid>,
    pub priority: i32,
    pub max_retries: i32,
    pub idempotency_key: Option<String>,
    /// How long the Job may wait before the expiry sweep terminates it.
    pub ttl: Duration,
}

impl NewJobRequest {
    /// Builds a request with the catalog defaults for priority and
    /// retry budget.
    pub fn from_definition(
        definition: &ActionDefinition,
        input: JobInput,
        ttl: Duration,
    ) -> Self {
        Self {
            marketplace: definition.marketplace,
            input,
            target_entity_id: None,
            batch_id: None,
            priority: definition.default_priority,
            max_retries: definition.default_max_retries,
            idempotency_key: None,
            ttl,
        }
    }
}

/// Outcome of a create call: the Job, and whether it was served from an
/// earlier submission with the same idempotency key.
#[derive(Debug, Clone)]
pub struct JobCreation {
    pub job: Job,
    pub cached: bool,
}

/// Filters for listing a tenant's Jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub marketplace: Option<Marketplace>,
    pub batch_id: Option<UniversalUuid>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            marketplace: None,
            batch_id: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Loads a Job by id within a tenant's partition, failing with
/// `NotFound` when absent. A macro so each expansion type-checks
/// against the concrete connection in scope.
macro_rules! load_job {
    ($conn:expr, $tenant_id:expr, $job_id:expr) => {{
        jobs::table
            .filter(jobs::tenant_id.eq($tenant_id))
            .filter(jobs::id.eq($job_id))
            .first::<Job>($conn)
            .optional()?
            .ok_or(StorageError::NotFound {
                entity: "job",
                id: $job_id.to_string(),
            })?
    }};
}

#[cfg(feature = "postgres")]
#[derive(diesel::QueryableByName)]
struct ClaimedId {
    #[diesel(sql_type = diesel::sql_types::Binary)]
    id: Vec<u8>,
}

/// Job persistence operations, scoped to one tenant per call.
#[derive(Clone, Debug)]
pub struct JobDAL {
    pub(super) database: Database,
}

impl JobDAL {
    fn batches(&self) -> BatchDAL {
        BatchDAL {
            database: self.database.clone(),
        }
    }

    /// Creates a Job, honoring the idempotency key when one is given.
    ///
    /// A resubmission with a key already present in the tenant's
    /// partition returns the existing Job with `cached = true` and
    /// writes nothing. The partial unique index is the last defense
    /// against two concurrent first submissions; the loser surfaces as
    /// [`StorageError::Conflict`].
    pub async fn create(
        &self,
        tenant: &TenantContext,
        request: NewJobRequest,
    ) -> Result<JobCreation, StorageError> {
        request
            .input
            .validate()
            .map_err(StorageError::InvalidInput)?;
        let input_json = serde_json::to_string(&request.input)?;

        let tenant_id = tenant.id().to_string();
        let now = UniversalTimestamp::now();
        let ttl = chrono::Duration::from_std(request.ttl)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let key = request.idempotency_key.clone();
        let new_job = NewJob {
            id: UniversalUuid::new_v4(),
            tenant_id: tenant_id.clone(),
            marketplace: request.marketplace,
            action: request.input.action(),
            target_entity_id: request.target_entity_id,
            batch_id: request.batch_id,
            status: JobStatus::Pending,
            priority: request.priority,
            retry_count: 0,
            max_retries: request.max_retries,
            expires_at: UniversalTimestamp(now.0 + ttl),
            created_at: now,
            input: input_json,
            idempotency_key: request.idempotency_key,
            updated_at: now,
        };

        with_conn!(self.database, conn => {
            conn.transaction::<JobCreation, StorageError, _>(|conn| {
                if let Some(ref key) = key {
                    let existing = jobs::table
                        .filter(jobs::tenant_id.eq(&tenant_id))
                        .filter(jobs::idempotency_key.eq(key))
                        .first::<Job>(conn)
                        .optional()?;
                    if let Some(job) = existing {
                        return Ok(JobCreation { job, cached: true });
                    }
                }
                let job = diesel::insert_into(jobs::table)
                    .values(&new_job)
                    .get_result::<Job>(conn)
                    .map_err(|e| match e {
                        diesel::result::Error::DatabaseError(
                            diesel::result::DatabaseErrorKind::UniqueViolation,
                            _,
                        ) => StorageError::Conflict {
                            key: key.clone().unwrap_or_default(),
                        },
                        other => StorageError::Database(other),
                    })?;
                Ok(JobCreation { job, cached: false })
            })
        })
    }

    /// Fetches a Job by id within the tenant's partition.
    pub async fn get_by_id(
        &self,
        tenant: &TenantContext,
        job_id: UniversalUuid,
    ) -> Result<Job, StorageError> {
        let tenant_id = tenant.id().to_string();
        let id_str = job_id.to_string();
        with_conn!(self.database, conn => {
            jobs::table
                .filter(jobs::tenant_id.eq(&tenant_id))
                .filter(jobs::id.eq(job_id))
                .first::<Job>(conn)
                .optional()
                .map_err(StorageError::Database)?
                .ok_or(StorageError::NotFound {
                    entity: "job",
                    id: id_str,
                })
        })
    }

    /// Lists a tenant's Jobs, newest first.
    pub async fn list(
        &self,
        tenant: &TenantContext,
        filter: JobFilter,
    ) -> Result<Vec<Job>, StorageError> {
        let tenant_id = tenant.id().to_string();
        with_conn!(self.database, conn => {
            let mut query = jobs::table
                .filter(jobs::tenant_id.eq(&tenant_id))
                .into_boxed();
            if let Some(status) = filter.status {
                query = query.filter(jobs::status.eq(status));
            }
            if let Some(marketplace) = filter.marketplace {
                query = query.filter(jobs::marketplace.eq(marketplace));
            }
            if let Some(batch_id) = filter.batch_id {
                query = query.filter(jobs::batch_id.eq(Some(batch_id)));
            }
            query
                .order(jobs::created_at.desc())
                .limit(filter.limit)
                .offset(filter.offset)
                .load::<Job>(conn)
                .map_err(StorageError::Database)
        })
    }

    /// Atomically claims the next runnable Job for the tenant, moving it
    /// to `running`. Returns `None` when no work is eligible.
    ///
    /// Eligible means: `pending`, past any scheduled retry time, and not
    /// yet expired. Highest priority wins; FIFO within a priority.
    ///
    /// On PostgreSQL this uses `FOR UPDATE SKIP LOCKED` so concurrent
    /// processors never double-claim and never block each other. On
    /// SQLite an immediate transaction on the single pooled connection
    /// gives the same exclusivity.
    pub async fn claim_next(
        &self,
        tenant: &TenantContext,
    ) -> Result<Option<Job>, StorageError> {
        let tenant_id = tenant.id().to_string();
        let now = UniversalTimestamp::now();

        match self.database.pool() {
            #[cfg(feature = "postgres")]
            AnyPool::Postgres(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| StorageError::ConnectionPool(e.to_string()))?;
                conn.interact(move |conn| {
                    use diesel::sql_types::{Text, Timestamp};

                    let claimed: Option<ClaimedId> = diesel::sql_query(
                        r#"
                        WITH next_job AS (
                            SELECT id FROM jobs
                            WHERE tenant_id = $1
                              AND status = 'pending'
                              AND (retry_at IS NULL OR retry_at <= $2)
                              AND expires_at > $3
                            ORDER BY priority DESC, created_at ASC
                            LIMIT 1
                            FOR UPDATE SKIP LOCKED
                        )
                        UPDATE jobs
                        SET status = 'running', started_at = $4, updated_at = $5
                        FROM next_job
                        WHERE jobs.id = next_job.id
                        RETURNING jobs.id
                        "#,
                    )
                    .bind::<Text, _>(&tenant_id)
                    .bind::<Timestamp, _>(now)
                    .bind::<Timestamp, _>(now)
                    .bind::<Timestamp, _>(now)
                    .bind::<Timestamp, _>(now)
                    .get_result(conn)
                    .optional()?;

                    match claimed {
                        Some(row) => {
                            let id = uuid::Uuid::from_slice(&row.id).map_err(|e| {
                                StorageError::InvalidInput(format!("bad uuid bytes: {}", e))
                            })?;
                            let job = jobs::table
                                .filter(jobs::id.eq(UniversalUuid(id)))
                                .first::<Job>(conn)?;
                            Ok(Some(job))
                        }
                        None => Ok(None),
                    }
                })
                .await
                .map_err(|e| StorageError::ConnectionPool(e.to_string()))?
            }
            #[cfg(feature = "sqlite")]
            AnyPool::Sqlite(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| StorageError::ConnectionPool(e.to_string()))?;
                conn.interact(move |conn| {
                    conn.immediate_transaction::<Option<Job>, StorageError, _>(|conn| {
                        let candidate = jobs::table
                            .filter(jobs::tenant_id.eq(&tenant_id))
                            .filter(jobs::status.eq(JobStatus::Pending))
                            .filter(
                                jobs::retry_at
                                    .is_null()
                                    .or(jobs::retry_at.le(Some(now))),
                            )
                            .filter(jobs::expires_at.gt(now))
                            .order((jobs::priority.desc(), jobs::created_at.asc()))
                            .first::<Job>(conn)
                            .optional()?;

                        match candidate {
                            Some(job) => {
                                let updated = diesel::update(
                                    jobs::table.filter(jobs::id.eq(job.id)),
                                )
                                .set((
                                    jobs::status.eq(JobStatus::Running),
                                    jobs::started_at.eq(Some(now)),
                                    jobs::updated_at.eq(now),
                                ))
                                .get_result::<Job>(conn)?;
                                Ok(Some(updated))
                            }
                            None => Ok(None),
                        }
                    })
                })
                .await
                .map_err(|e| StorageError::ConnectionPool(e.to_string()))?
            }
        }
    }

    /// Marks a running Job completed and stores its result.
    pub async fn complete(
        &self,
        tenant: &TenantContext,
        job_id: UniversalUuid,
        result: &JobResult,
    ) -> Result<Job, StorageError> {
        let result_json = serde_json::to_string(result)?;
        let tenant_id = tenant.id().to_string();
        let now = UniversalTimestamp::now();

        let job = with_conn!(self.database, conn => {
            conn.transaction::<Job, StorageError, _>(|conn| {
                let job = load_job!(conn, &tenant_id, job_id);
                job.status
                    .check_transition(JobStatus::Completed, job_id.as_uuid())?;
                let updated = diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
                    .set((
                        jobs::status.eq(JobStatus::Completed),
                        jobs::result.eq(Some(&result_json)),
                        jobs::completed_at.eq(Some(now)),
                        jobs::retry_at.eq(None::<UniversalTimestamp>),
                        jobs::error_message.eq(None::<String>),
                        jobs::updated_at.eq(now),
                    ))
                    .get_result::<Job>(conn)?;
                Ok(updated)
            })
        })?;

        self.recompute_parent(tenant, &job).await?;
        Ok(job)
    }

    /// Records a failure. Retryable failures with budget left re-queue
    /// the Job (incrementing `retry_count` and scheduling `retry_at` at
    /// `now + retry_delay`); everything else lands in terminal `failed`.
    pub async fn fail(
        &self,
        tenant: &TenantContext,
        job_id: UniversalUuid,
        error: &str,
        retryable: bool,
        retry_delay: Option<Duration>,
    ) -> Result<Job, StorageError> {
        let tenant_id = tenant.id().to_string();
        let error = error.to_string();
        let now = UniversalTimestamp::now();
        let retry_at = retry_delay.map(|d| {
            UniversalTimestamp(
                now.0 + chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero()),
            )
        });

        let job = with_conn!(self.database, conn => {
            conn.transaction::<Job, StorageError, _>(|conn| {
                let job = load_job!(conn, &tenant_id, job_id);
                let will_retry = retryable && job.retry_count < job.max_retries;
                let next = if will_retry {
                    JobStatus::Pending
                } else {
                    JobStatus::Failed
                };
                job.status.check_transition(next, job_id.as_uuid())?;

                let updated = if will_retry {
                    diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
                        .set((
                            jobs::status.eq(JobStatus::Pending),
                            jobs::retry_count.eq(job.retry_count + 1),
                            jobs::retry_at.eq(retry_at),
                            jobs::started_at.eq(None::<UniversalTimestamp>),
                            jobs::error_message.eq(Some(&error)),
                            jobs::updated_at.eq(now),
                        ))
                        .get_result::<Job>(conn)?
                } else {
                    diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
                        .set((
                            jobs::status.eq(JobStatus::Failed),
                            jobs::completed_at.eq(Some(now)),
                            jobs::retry_at.eq(None::<UniversalTimestamp>),
                            jobs::error_message.eq(Some(&error)),
                            jobs::updated_at.eq(now),
                        ))
                        .get_result::<Job>(conn)?
                };
                Ok(updated)
            })
        })?;

        self.recompute_parent(tenant, &job).await?;
        Ok(job)
    }

    /// Pauses a pending or running Job. A paused Job is skipped by
    /// claiming until resumed.
    pub async fn pause(
        &self,
        tenant: &TenantContext,
        job_id: UniversalUuid,
    ) -> Result<Job, StorageError> {
        self.transition(tenant, job_id, JobStatus::Paused).await
    }

    /// Resumes a paused Job back into the claimable pool.
    pub async fn resume(
        &self,
        tenant: &TenantContext,
        job_id: UniversalUuid,
    ) -> Result<Job, StorageError> {
        self.transition(tenant, job_id, JobStatus::Pending).await
    }

    async fn transition(
        &self,
        tenant: &TenantContext,
        job_id: UniversalUuid,
        next: JobStatus,
    ) -> Result<Job, StorageError> {
        let tenant_id = tenant.id().to_string();
        let now = UniversalTimestamp::now();
        with_conn!(self.database, conn => {
            conn.transaction::<Job, StorageError, _>(|conn| {
                let job = load_job!(conn, &tenant_id, job_id);
                job.status.check_transition(next, job_id.as_uuid())?;
                let updated = diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
                    .set((jobs::status.eq(next), jobs::updated_at.eq(now)))
                    .get_result::<Job>(conn)?;
                Ok(updated)
            })
        })
    }

    /// Cancels a Job and cascades the cancellation to its unfinished
    /// Tasks in the same transaction.
    pub async fn cancel(
        &self,
        tenant: &TenantContext,
        job_id: UniversalUuid,
    ) -> Result<Job, StorageError> {
        let tenant_id = tenant.id().to_string();
        let now = UniversalTimestamp::now();

        let job = with_conn!(self.database, conn => {
            conn.transaction::<Job, StorageError, _>(|conn| {
                let job = load_job!(conn, &tenant_id, job_id);
                job.status
                    .check_transition(JobStatus::Cancelled, job_id.as_uuid())?;
                let updated = diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
                    .set((
                        jobs::status.eq(JobStatus::Cancelled),
                        jobs::completed_at.eq(Some(now)),
                        jobs::retry_at.eq(None::<UniversalTimestamp>),
                        jobs::updated_at.eq(now),
                    ))
                    .get_result::<Job>(conn)?;
                diesel::update(
                    tasks::table
                        .filter(tasks::job_id.eq(job_id))
                        .filter(tasks::status.eq_any([TaskStatus::Pending, TaskStatus::Running])),
                )
                .set((
                    tasks::status.eq(TaskStatus::Cancelled),
                    tasks::completed_at.eq(Some(now)),
                    tasks::updated_at.eq(now),
                ))
                .execute(conn)?;
                Ok(updated)
            })
        })?;

        self.recompute_parent(tenant, &job).await?;
        Ok(job)
    }

    /// Moves pending Jobs past their `expires_at` into terminal
    /// `expired`. Returns how many were expired.
    ///
    /// Paused Jobs are an explicit user hold and are left alone.
    pub async fn sweep_expired(&self, tenant: &TenantContext) -> Result<usize, StorageError> {
        let tenant_id = tenant.id().to_string();
        let now = UniversalTimestamp::now();

        let expired: Vec<Job> = with_conn!(self.database, conn => {
            conn.transaction::<Vec<Job>, StorageError, _>(|conn| {
                let victims: Vec<UniversalUuid> = jobs::table
                    .filter(jobs::tenant_id.eq(&tenant_id))
                    .filter(jobs::status.eq(JobStatus::Pending))
                    .filter(jobs::expires_at.le(now))
                    .select(jobs::id)
                    .load(conn)?;
                if victims.is_empty() {
                    return Ok(Vec::new());
                }
                let updated = diesel::update(
                    jobs::table.filter(jobs::id.eq_any(victims)),
                )
                .set((
                    jobs::status.eq(JobStatus::Expired),
                    jobs::completed_at.eq(Some(now)),
                    jobs::error_message.eq(Some("job expired before execution")),
                    jobs::updated_at.eq(now),
                ))
                .get_results::<Job>(conn)?;
                Ok(updated)
            })
        })?;

        let mut batch_ids: Vec<UniversalUuid> =
            expired.iter().filter_map(|j| j.batch_id).collect();
        batch_ids.sort();
        batch_ids.dedup();
        for batch_id in batch_ids {
            self.batches().recompute(tenant, batch_id).await?;
        }
        Ok(expired.len())
    }

    /// Re-queues Jobs stuck in `running` longer than `grace`, covering
    /// processors that crashed mid-execution. Returns the re-queued Jobs.
    pub async fn recover_stalled(
        &self,
        tenant: &TenantContext,
        grace: Duration,
    ) -> Result<Vec<Job>, StorageError> {
        let tenant_id = tenant.id().to_string();
        let now = UniversalTimestamp::now();
        let cutoff = UniversalTimestamp(
            now.0 - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero()),
        );

        let recovered = with_conn!(self.database, conn => {
            diesel::update(
                jobs::table
                    .filter(jobs::tenant_id.eq(&tenant_id))
                    .filter(jobs::status.eq(JobStatus::Running))
                    .filter(jobs::started_at.le(Some(cutoff))),
            )
            .set((
                jobs::status.eq(JobStatus::Pending),
                jobs::started_at.eq(None::<UniversalTimestamp>),
                jobs::updated_at.eq(now),
            ))
            .get_results::<Job>(conn)
            .map_err(StorageError::Database)
        })?;

        if !recovered.is_empty() {
            debug!(count = recovered.len(), "re-queued stalled jobs");
        }
        Ok(recovered)
    }

    /// Clones a terminal Job into a fresh pending one with a reset retry
    /// budget. The clone is detached from any Batch and carries no
    /// idempotency key, so it cannot disturb the source Batch's counts
    /// or collide with the original submission.
    ///
    /// Non-terminal sources are rejected: they are still in flight.
    pub async fn retry_clone(
        &self,
        tenant: &TenantContext,
        job_id: UniversalUuid,
        ttl: Duration,
    ) -> Result<Job, StorageError> {
        let tenant_id = tenant.id().to_string();
        let now = UniversalTimestamp::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());

        with_conn!(self.database, conn => {
            conn.transaction::<Job, StorageError, _>(|conn| {
                let source = load_job!(conn, &tenant_id, job_id);
                if !source.status.is_terminal() {
                    return Err(StorageError::IllegalTransition {
                        job_id: job_id.as_uuid(),
                        from: source.status,
                        attempted: JobStatus::Pending,
                    });
                }
                let clone = NewJob {
                    id: UniversalUuid::new_v4(),
                    tenant_id: tenant_id.clone(),
                    marketplace: source.marketplace,
                    action: source.action,
                    target_entity_id: source.target_entity_id.clone(),
                    batch_id: None,
                    status: JobStatus::Pending,
                    priority: source.priority,
                    retry_count: 0,
                    max_retries: source.max_retries,
                    expires_at: UniversalTimestamp(now.0 + ttl),
                    created_at: now,
                    input: source.input.clone(),
                    idempotency_key: None,
                    updated_at: now,
                };
                let job = diesel::insert_into(jobs::table)
                    .values(&clone)
                    .get_result::<Job>(conn)?;
                Ok(job)
            })
        })
    }

    /// Recomputes the parent Batch when the Job belongs to one and just
    /// reached a terminal status.
    async fn recompute_parent(
        &self,
        tenant: &TenantContext,
        job: &Job,
    ) -> Result<(), StorageError> {
        if let Some(batch_id) = job.batch_id {
            if job.status.is_terminal() {
                self.batches().recompute(tenant, batch_id).await?;
            }
        }
        Ok(())
    }
}

