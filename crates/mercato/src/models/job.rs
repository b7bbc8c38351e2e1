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

//! Job model and its state machine.
//!
//! A Job is one marketplace operation on one target entity. Once a Job
//! reaches a terminal status it never transitions again; the transition
//! table here is the single source of truth enforced by the DAL.

use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::universal_types::{text_enum_sql, UniversalTimestamp, UniversalUuid};
use crate::error::{StorageError, TerminalStateViolation};
use crate::models::action::{ActionCode, Marketplace};
use crate::models::payload::{JobInput, JobResult};

/// Lifecycle status of a Job.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    diesel::expression::AsExpression,
    diesel::deserialize::FromSqlRow,
)]
#[diesel(sql_type = diesel::sql_types::Text)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Expired => "expired",
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Expired
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn allows(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Pending, Paused) => true,
            (Pending, Cancelled) => true,
            (Pending, Expired) => true,
            (Running, Completed) => true,
            // handler failure with retries remaining re-queues the job
            (Running, Pending) => true,
            (Running, Failed) => true,
            (Running, Paused) => true,
            (Running, Cancelled) => true,
            (Paused, Pending) => true,
            (Paused, Cancelled) => true,
            _ => false,
        }
    }

    /// Validates a transition, distinguishing terminal violations (a bug
    /// or lost race, per the audit contract) from merely illegal moves.
    pub fn check_transition(
        &self,
        next: JobStatus,
        job_id: uuid::Uuid,
    ) -> Result<(), StorageError> {
        if self.is_terminal() {
            return Err(TerminalStateViolation {
                job_id,
                from: *self,
                attempted: next,
            }
            .into());
        }
        if !self.allows(next) {
            return Err(StorageError::IllegalTransition {
                job_id,
                from: *self,
                attempted: next,
            });
        }
        Ok(())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "expired" => Ok(JobStatus::Expired),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

text_enum_sql!(JobStatus);

/// One marketplace operation on one target entity.
#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::database::schema::jobs)]
pub struct Job {
    pub id: UniversalUuid,
    pub tenant_id: String,
    pub marketplace: Marketplace,
    pub action: ActionCode,
    pub target_entity_id: Option<String>,
    pub batch_id: Option<UniversalUuid>,
    pub status: JobStatus,
    pub priority: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub expires_at: UniversalTimestamp,
    pub retry_at: Option<UniversalTimestamp>,
    pub created_at: UniversalTimestamp,
    pub started_at: Option<UniversalTimestamp>,
    pub completed_at: Option<UniversalTimestamp>,
    pub input: String,
    pub result: Option<String>,
    pub idempotency_key: Option<String>,
    pub error_message: Option<String>,
    pub updated_at: UniversalTimestamp,
}

impl Job {
    /// Parses the stored input payload into its tagged-union form.
    pub fn parsed_input(&self) -> Result<JobInput, serde_json::Error> {
        serde_json::from_str(&self.input)
    }

    /// Parses the stored result payload, if any.
    pub fn parsed_result(&self) -> Result<Option<JobResult>, serde_json::Error> {
        self.result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
    }
}

/// A new Job row. Ids and timestamps are generated client-side so both
/// backends behave identically.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::jobs)]
pub struct NewJob {
    pub id: UniversalUuid,
    pub tenant_id: String,
    pub marketplace: Marketplace,
    pub action: ActionCode,
    pub target_entity_id: Option<String>,
    pub batch_id: Option<UniversalUuid>,
    pub status: JobStatus,
    pub priority: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub expires_at: UniversalTimestamp,
    pub created_at: UniversalTimestamp,
    pub input: String,
    pub idempotency_key: Option<String>,
    pub updated_at: UniversalTimestamp,
}
