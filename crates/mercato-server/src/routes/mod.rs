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

//! HTTP routes.
//!
//! Every data route requires an `X-Tenant-Id` header; the [`Tenant`]
//! extractor validates it and the routes pass the resulting
//! [`TenantContext`] down into the DAL, so no query can cross tenants.

pub mod batches;
pub mod jobs;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use mercato::TenantContext;

use crate::error::ApiError;
use crate::state::AppState;

/// Acting tenant, taken from the `X-Tenant-Id` request header.
pub struct Tenant(pub TenantContext);

impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("x-tenant-id")
            .ok_or_else(|| ApiError::bad_request("missing X-Tenant-Id header"))?;
        let id = header
            .to_str()
            .map_err(|_| ApiError::bad_request("X-Tenant-Id header is not valid UTF-8"))?;
        Ok(Tenant(TenantContext::new(id)?))
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", post(jobs::create).get(jobs::list))
        .route("/api/jobs/{id}", get(jobs::get))
        .route("/api/jobs/{id}/tasks", get(jobs::tasks))
        .route("/api/jobs/{id}/pause", post(jobs::pause))
        .route("/api/jobs/{id}/resume", post(jobs::resume))
        .route("/api/jobs/{id}/cancel", post(jobs::cancel))
        .route("/api/jobs/{id}/retry", post(jobs::retry))
        .route("/api/tasks", get(jobs::task_trail))
        .route("/api/batches", post(batches::create).get(batches::list))
        .route("/api/batches/{id}", get(batches::get))
        .route("/api/batches/{id}/jobs", get(batches::jobs))
        .route("/api/batches/{id}/cancel", post(batches::cancel))
        .with_state(state)
}
