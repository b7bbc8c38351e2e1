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

//! Batch routes.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mercato::dal::{BatchItem, BatchRequest};
use mercato::models::{JobInput, Marketplace};
use mercato::{ActionCode, Batch, BatchStatus};

use crate::error::ApiError;
use crate::routes::jobs::JobView;
use crate::routes::Tenant;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateBatchRequest {
    #[serde(default)]
    pub batch_key: Option<String>,
    pub marketplace: Marketplace,
    pub action: ActionCode,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    pub items: Vec<BatchItemRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchItemRequest {
    pub input: JobInput,
    #[serde(default)]
    pub target_entity_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchView {
    pub id: Uuid,
    pub batch_key: String,
    pub marketplace: Marketplace,
    pub action: ActionCode,
    pub status: BatchStatus,
    pub total_count: i32,
    pub completed_count: i32,
    pub failed_count: i32,
    pub cancelled_count: i32,
    pub priority: i32,
    pub progress_percent: f64,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Batch> for BatchView {
    fn from(batch: Batch) -> Self {
        let progress_percent = batch.progress_percent();
        Self {
            id: batch.id.as_uuid(),
            batch_key: batch.batch_key,
            marketplace: batch.marketplace,
            action: batch.action,
            status: batch.status,
            total_count: batch.total_count,
            completed_count: batch.completed_count,
            failed_count: batch.failed_count,
            cancelled_count: batch.cancelled_count,
            priority: batch.priority,
            progress_percent,
            cancelled_at: batch.cancelled_at.map(|t| t.into_inner()),
            created_at: batch.created_at.into_inner(),
            updated_at: batch.updated_at.into_inner(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchCreated {
    pub batch: BatchView,
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Deserialize, Default)]
pub struct BatchListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `POST /api/batches`. Creates the Batch and all of its child Jobs in
/// one transaction; a bad item rejects the whole request.
pub async fn create(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(body): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<BatchCreated>), ApiError> {
    let definition = state.registry.resolve(body.marketplace, body.action)?;
    let ttl = body
        .ttl_secs
        .map(Duration::from_secs)
        .unwrap_or(state.config.job_ttl);

    // Callers may name the batch; otherwise "{action}_{timestamp}_{uuid}".
    let batch_key = body.batch_key.unwrap_or_else(|| {
        format!(
            "{}_{}_{}",
            body.action,
            Utc::now().timestamp(),
            Uuid::new_v4()
        )
    });

    let request = BatchRequest {
        batch_key,
        marketplace: body.marketplace,
        action: body.action,
        priority: body.priority.unwrap_or(definition.default_priority),
        max_retries: body.max_retries.unwrap_or(definition.default_max_retries),
        ttl,
        items: body
            .items
            .into_iter()
            .map(|item| BatchItem {
                input: item.input,
                target_entity_id: item.target_entity_id,
                idempotency_key: item.idempotency_key,
            })
            .collect(),
    };

    let (batch, jobs) = state.dal.batches().create(&tenant, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(BatchCreated {
            batch: batch.into(),
            jobs: jobs.into_iter().map(JobView::from).collect(),
        }),
    ))
}

/// `GET /api/batches`.
pub async fn list(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Query(query): Query<BatchListQuery>,
) -> Result<Json<Vec<BatchView>>, ApiError> {
    let batches = state
        .dal
        .batches()
        .list(&tenant, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(batches.into_iter().map(BatchView::from).collect()))
}

/// `GET /api/batches/{id}`.
pub async fn get(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchView>, ApiError> {
    let batch = state.dal.batches().get_by_id(&tenant, id.into()).await?;
    Ok(Json(batch.into()))
}

/// `GET /api/batches/{id}/jobs`.
pub async fn jobs(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    state.dal.batches().get_by_id(&tenant, id.into()).await?;
    let jobs = state.dal.batches().list_jobs(&tenant, id.into()).await?;
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

/// `POST /api/batches/{id}/cancel`. Cancels every non-terminal child;
/// already-terminal children keep their outcomes.
pub async fn cancel(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchView>, ApiError> {
    let batch = state.dal.batches().cancel(&tenant, id.into()).await?;
    Ok(Json(batch.into()))
}
