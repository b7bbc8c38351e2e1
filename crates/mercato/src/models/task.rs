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

//! Task model: one atomic, ordered execution step within a Job.
//!
//! Tasks are append-only once created and never deleted, only
//! terminal-stamped. `position` is strictly increasing and gapless per
//! Job, which is what makes idempotent re-entry checkable.

use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::universal_types::{text_enum_sql, UniversalTimestamp, UniversalUuid};

/// What a Task physically does when executed.
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
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// HTTP call routed through the session-holding relay agent.
    RelayHttp,
    /// Outbound authenticated HTTP call made by the core itself.
    DirectHttp,
    /// Local storage write (e.g. persisting a listing mapping).
    StorageOp,
    /// Local file/media staging work.
    FileOp,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::RelayHttp => "relay-http",
            TaskKind::DirectHttp => "direct-http",
            TaskKind::StorageOp => "storage-op",
            TaskKind::FileOp => "file-op",
        }
    }

    /// Whether this kind is executed over a Transport.
    pub fn is_http(&self) -> bool {
        matches!(self, TaskKind::RelayHttp | TaskKind::DirectHttp)
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relay-http" => Ok(TaskKind::RelayHttp),
            "direct-http" => Ok(TaskKind::DirectHttp),
            "storage-op" => Ok(TaskKind::StorageOp),
            "file-op" => Ok(TaskKind::FileOp),
            other => Err(format!("unknown task kind '{}'", other)),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

text_enum_sql!(TaskKind);

/// Lifecycle status of a Task.
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
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// The transport deadline elapsed before a response arrived.
    Timeout,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Terminal-success: a retried Job must never re-execute such a Task.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "timeout" => Ok(TaskStatus::Timeout),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

text_enum_sql!(TaskStatus);

/// One atomic execution step belonging to a Job.
#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::database::schema::tasks)]
pub struct Task {
    pub id: UniversalUuid,
    pub tenant_id: String,
    pub job_id: UniversalUuid,
    pub kind: TaskKind,
    pub description: String,
    pub position: i32,
    pub status: TaskStatus,
    pub payload: String,
    pub result: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub carrier: Option<String>,
    pub retry_count: i32,
    pub started_at: Option<UniversalTimestamp>,
    pub completed_at: Option<UniversalTimestamp>,
    pub error_message: Option<String>,
    pub created_at: UniversalTimestamp,
    pub updated_at: UniversalTimestamp,
}

impl Task {
    /// Parses the stored result payload, if any.
    pub fn parsed_result(&self) -> Result<Option<serde_json::Value>, serde_json::Error> {
        self.result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
    }
}

/// A new Task row, created lazily by a Handler at the step it is about
/// to execute.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::tasks)]
pub struct NewTask {
    pub id: UniversalUuid,
    pub tenant_id: String,
    pub job_id: UniversalUuid,
    pub kind: TaskKind,
    pub description: String,
    pub position: i32,
    pub status: TaskStatus,
    pub payload: String,
    pub method: Option<String>,
    pub path: Option<String>,
    pub carrier: Option<String>,
    pub retry_count: i32,
    pub created_at: UniversalTimestamp,
    pub updated_at: UniversalTimestamp,
}
