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

//! Job routes.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mercato::dal::{JobFilter, NewJobRequest};
use mercato::models::{JobInput, Marketplace, Task};
use mercato::{Job, JobStatus, UniversalUuid};

use crate::error::ApiError;
use crate::routes::Tenant;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateJobRequest {
    pub marketplace: Marketplace,
    pub input: JobInput,
    #[serde(default)]
    pub target_entity_id: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: Uuid,
    pub marketplace: Marketplace,
    pub action: mercato::ActionCode,
    pub status: JobStatus,
    pub target_entity_id: Option<String>,
    pub batch_id: Option<Uuid>,
    pub priority: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub input: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub idempotency_key: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let input = serde_json::from_str(&job.input).unwrap_or(serde_json::Value::Null);
        let result = job
            .result
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        Self {
            id: job.id.as_uuid(),
            marketplace: job.marketplace,
            action: job.action,
            status: job.status,
            target_entity_id: job.target_entity_id,
            batch_id: job.batch_id.map(|id| id.as_uuid()),
            priority: job.priority,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            input,
            result,
            error_message: job.error_message,
            idempotency_key: job.idempotency_key,
            expires_at: job.expires_at.into_inner(),
            retry_at: job.retry_at.map(|t| t.into_inner()),
            created_at: job.created_at.into_inner(),
            started_at: job.started_at.map(|t| t.into_inner()),
            completed_at: job.completed_at.map(|t| t.into_inner()),
            updated_at: job.updated_at.into_inner(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskView {
    pub id: Uuid,
    pub job_id: Uuid,
    pub kind: mercato::TaskKind,
    pub description: String,
    pub position: i32,
    pub status: mercato::TaskStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub carrier: Option<String>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        let payload = serde_json::from_str(&task.payload).unwrap_or(serde_json::Value::Null);
        let result = task
            .result
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        Self {
            id: task.id.as_uuid(),
            job_id: task.job_id.as_uuid(),
            kind: task.kind,
            description: task.description,
            position: task.position,
            status: task.status,
            payload,
            result,
            method: task.method,
            path: task.path,
            carrier: task.carrier,
            retry_count: task.retry_count,
            error_message: task.error_message,
            started_at: task.started_at.map(|t| t.into_inner()),
            completed_at: task.completed_at.map(|t| t.into_inner()),
            created_at: task.created_at.into_inner(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct JobListQuery {
    pub status: Option<JobStatus>,
    pub marketplace: Option<Marketplace>,
    pub batch_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `POST /api/jobs`. Resubmitting the same idempotency key returns the
/// original Job with `200` instead of creating a duplicate.
pub async fn create(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(body): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    let definition = state.registry.resolve(body.marketplace, body.input.action())?;
    let ttl = body
        .ttl_secs
        .map(Duration::from_secs)
        .unwrap_or(state.config.job_ttl);

    let request = NewJobRequest {
        marketplace: body.marketplace,
        input: body.input,
        target_entity_id: body.target_entity_id,
        batch_id: None,
        priority: body.priority.unwrap_or(definition.default_priority),
        max_retries: body.max_retries.unwrap_or(definition.default_max_retries),
        idempotency_key: body.idempotency_key,
        ttl,
    };

    let creation = state.dal.jobs().create(&tenant, request).await?;
    let status = if creation.cached {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(creation.job.into())))
}

/// `GET /api/jobs`.
pub async fn list(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Query(query): Query<JobListQuery>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let default = JobFilter::default();
    let filter = JobFilter {
        status: query.status,
        marketplace: query.marketplace,
        batch_id: query.batch_id.map(UniversalUuid::from),
        limit: query.limit.unwrap_or(default.limit),
        offset: query.offset.unwrap_or(default.offset),
    };
    let jobs = state.dal.jobs().list(&tenant, filter).await?;
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

/// `GET /api/jobs/{id}`.
pub async fn get(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.dal.jobs().get_by_id(&tenant, id.into()).await?;
    Ok(Json(job.into()))
}

/// `GET /api/jobs/{id}/tasks`. The Job's persisted step trail, in
/// execution order.
pub async fn tasks(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TaskView>>, ApiError> {
    // 404 for unknown Jobs rather than an empty list.
    state.dal.jobs().get_by_id(&tenant, id.into()).await?;
    let tasks = state.dal.tasks().list_for_job(&tenant, id.into()).await?;
    Ok(Json(tasks.into_iter().map(TaskView::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct TaskTrailQuery {
    pub job_id: Uuid,
}

/// `GET /api/tasks?job_id=`. Same trail as `/api/jobs/{id}/tasks`.
pub async fn task_trail(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Query(query): Query<TaskTrailQuery>,
) -> Result<Json<Vec<TaskView>>, ApiError> {
    tasks(State(state), Tenant(tenant), Path(query.job_id)).await
}

/// `POST /api/jobs/{id}/pause`.
pub async fn pause(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.dal.jobs().pause(&tenant, id.into()).await?;
    Ok(Json(job.into()))
}

/// `POST /api/jobs/{id}/resume`.
pub async fn resume(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.dal.jobs().resume(&tenant, id.into()).await?;
    Ok(Json(job.into()))
}

/// `POST /api/jobs/{id}/cancel`.
pub async fn cancel(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.dal.jobs().cancel(&tenant, id.into()).await?;
    Ok(Json(job.into()))
}

/// `POST /api/jobs/{id}/retry`. Clones a terminal Job into a fresh
/// Pending one; the source stays frozen.
pub async fn retry(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    let job = state
        .dal
        .jobs()
        .retry_clone(&tenant, id.into(), state.config.job_ttl)
        .await?;
    Ok((StatusCode::CREATED, Json(job.into())))
}
