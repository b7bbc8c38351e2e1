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

//! Task persistence.
//!
//! Tasks are created lazily by Handlers through `get_or_create`: the
//! (job_id, position) pair is the re-entry point of an interrupted Job,
//! and the unique index on it guarantees a position exists at most once
//! no matter how often the Job is retried.

use diesel::prelude::*;

use crate::database::schema::tasks;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::database::Database;
use crate::error::StorageError;
use crate::models::task::{NewTask, Task, TaskKind, TaskStatus};
use crate::tenant::TenantContext;

use super::with_conn;

/// Shape of a Task a Handler is about to run.
#[derive(Debug, Clone)]
pub struct NewTaskSpec {
    pub kind: TaskKind,
    pub description: String,
    pub position: i32,
    pub payload: serde_json::Value,
    pub method: Option<String>,
    pub path: Option<String>,
    pub carrier: Option<String>,
}

/// Task persistence operations, scoped to one tenant per call.
#[derive(Clone, Debug)]
pub struct TaskDAL {
    pub(super) database: Database,
}

impl TaskDAL {
    /// Returns the Task at `(job_id, position)`, creating it as
    /// `pending` when it does not exist yet. The second tuple element is
    /// true when the row was just created.
    ///
    /// This is what makes Job re-entry idempotent: a retried Handler
    /// finds the Task from the earlier attempt instead of a new one.
    pub async fn get_or_create(
        &self,
        tenant: &TenantContext,
        job_id: UniversalUuid,
        spec: NewTaskSpec,
    ) -> Result<(Task, bool), StorageError> {
        let tenant_id = tenant.id().to_string();
        let now = UniversalTimestamp::now();
        let payload_json = serde_json::to_string(&spec.payload)?;
        let new_task = NewTask {
            id: UniversalUuid::new_v4(),
            tenant_id: tenant_id.clone(),
            job_id,
            kind: spec.kind,
            description: spec.description,
            position: spec.position,
            status: TaskStatus::Pending,
            payload: payload_json,
            method: spec.method,
            path: spec.path,
            carrier: spec.carrier,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        let position = spec.position;

        with_conn!(self.database, conn => {
            conn.transaction::<(Task, bool), StorageError, _>(|conn| {
                let existing = tasks::table
                    .filter(tasks::tenant_id.eq(&tenant_id))
                    .filter(tasks::job_id.eq(job_id))
                    .filter(tasks::position.eq(position))
                    .first::<Task>(conn)
                    .optional()?;
                if let Some(task) = existing {
                    return Ok((task, false));
                }
                let task = diesel::insert_into(tasks::table)
                    .values(&new_task)
                    .get_result::<Task>(conn)?;
                Ok((task, true))
            })
        })
    }

    /// Lists a Job's Tasks in position order.
    pub async fn list_for_job(
        &self,
        tenant: &TenantContext,
        job_id: UniversalUuid,
    ) -> Result<Vec<Task>, StorageError> {
        let tenant_id = tenant.id().to_string();
        with_conn!(self.database, conn => {
            tasks::table
                .filter(tasks::tenant_id.eq(&tenant_id))
                .filter(tasks::job_id.eq(job_id))
                .order(tasks::position.asc())
                .load::<Task>(conn)
                .map_err(StorageError::Database)
        })
    }

    /// Stamps a Task `running` and records the attempt start.
    pub async fn mark_running(
        &self,
        tenant: &TenantContext,
        task_id: UniversalUuid,
    ) -> Result<Task, StorageError> {
        let tenant_id = tenant.id().to_string();
        let id_str = task_id.to_string();
        let now = UniversalTimestamp::now();
        with_conn!(self.database, conn => {
            diesel::update(
                tasks::table
                    .filter(tasks::tenant_id.eq(&tenant_id))
                    .filter(tasks::id.eq(task_id)),
            )
            .set((
                tasks::status.eq(TaskStatus::Running),
                tasks::started_at.eq(Some(now)),
                tasks::updated_at.eq(now),
            ))
            .get_result::<Task>(conn)
            .optional()
            .map_err(StorageError::Database)?
            .ok_or(StorageError::NotFound {
                entity: "task",
                id: id_str,
            })
        })
    }

    /// Stamps a Task `completed` with its result payload.
    pub async fn mark_completed(
        &self,
        tenant: &TenantContext,
        task_id: UniversalUuid,
        result: &serde_json::Value,
    ) -> Result<Task, StorageError> {
        let result_json = serde_json::to_string(result)?;
        self.finish(tenant, task_id, TaskStatus::Completed, Some(result_json), None)
            .await
    }

    /// Stamps a Task `failed` with the error that sank it.
    pub async fn mark_failed(
        &self,
        tenant: &TenantContext,
        task_id: UniversalUuid,
        error: &str,
    ) -> Result<Task, StorageError> {
        self.finish(
            tenant,
            task_id,
            TaskStatus::Failed,
            None,
            Some(error.to_string()),
        )
        .await
    }

    /// Stamps a Task `timeout`. Kept distinct from `failed` so timeout
    /// rates per marketplace are visible in the data.
    pub async fn mark_timeout(
        &self,
        tenant: &TenantContext,
        task_id: UniversalUuid,
        error: &str,
    ) -> Result<Task, StorageError> {
        self.finish(
            tenant,
            task_id,
            TaskStatus::Timeout,
            None,
            Some(error.to_string()),
        )
        .await
    }

    /// Stamps a Task `cancelled`.
    pub async fn mark_cancelled(
        &self,
        tenant: &TenantContext,
        task_id: UniversalUuid,
    ) -> Result<Task, StorageError> {
        self.finish(tenant, task_id, TaskStatus::Cancelled, None, None)
            .await
    }

    /// Bumps the attempt counter on a Task about to be re-run.
    pub async fn increment_retry(
        &self,
        tenant: &TenantContext,
        task_id: UniversalUuid,
    ) -> Result<Task, StorageError> {
        let tenant_id = tenant.id().to_string();
        let id_str = task_id.to_string();
        let now = UniversalTimestamp::now();
        with_conn!(self.database, conn => {
            diesel::update(
                tasks::table
                    .filter(tasks::tenant_id.eq(&tenant_id))
                    .filter(tasks::id.eq(task_id)),
            )
            .set((
                tasks::retry_count.eq(tasks::retry_count + 1),
                tasks::status.eq(TaskStatus::Pending),
                tasks::updated_at.eq(now),
            ))
            .get_result::<Task>(conn)
            .optional()
            .map_err(StorageError::Database)?
            .ok_or(StorageError::NotFound {
                entity: "task",
                id: id_str,
            })
        })
    }

    async fn finish(
        &self,
        tenant: &TenantContext,
        task_id: UniversalUuid,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<Task, StorageError> {
        let tenant_id = tenant.id().to_string();
        let id_str = task_id.to_string();
        let now = UniversalTimestamp::now();
        with_conn!(self.database, conn => {
            diesel::update(
                tasks::table
                    .filter(tasks::tenant_id.eq(&tenant_id))
                    .filter(tasks::id.eq(task_id)),
            )
            .set((
                tasks::status.eq(status),
                tasks::result.eq(result),
                tasks::error_message.eq(error),
                tasks::completed_at.eq(Some(now)),
                tasks::updated_at.eq(now),
            ))
            .get_result::<Task>(conn)
            .optional()
            .map_err(StorageError::Database)?
            .ok_or(StorageError::NotFound {
                entity: "task",
                id: id_str,
            })
        })
    }
}
