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

//! Batch model: a group of Jobs created from one bulk user action.
//!
//! Batch status and counters are always derived from child Job rows,
//! never set ad hoc. The derivation itself is a pure function so every
//! combination of child states can be tested without a database.

use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::universal_types::{text_enum_sql, UniversalTimestamp, UniversalUuid};
use crate::models::action::{ActionCode, Marketplace};
use crate::models::job::JobStatus;

/// Aggregate status of a Batch, derived from its children.
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
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    PartiallyFailed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::PartiallyFailed => "partially_failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    /// Whether this status is final: no child change can reopen it.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::PartiallyFailed
                | BatchStatus::Cancelled
        )
    }

    /// Derives the aggregate status from child Job state counts.
    ///
    /// An explicit batch cancel (`user_cancelled`) settles the batch as
    /// `Cancelled` once every child is terminal, whatever mix of
    /// outcomes the children reached first. Expired children aggregate
    /// as failures: they terminally did not complete. An empty batch is
    /// trivially complete.
    pub fn derive(counts: &ChildCounts, user_cancelled: bool) -> BatchStatus {
        if counts.total == 0 {
            return BatchStatus::Completed;
        }
        if counts.running > 0 {
            return BatchStatus::Running;
        }
        if counts.non_terminal() > 0 {
            return BatchStatus::Pending;
        }
        // all children terminal from here on
        if user_cancelled {
            return BatchStatus::Cancelled;
        }
        if counts.completed == counts.total {
            BatchStatus::Completed
        } else if counts.completed == 0 && counts.cancelled == 0 {
            BatchStatus::Failed
        } else if counts.completed == 0 && counts.failed == 0 {
            BatchStatus::Cancelled
        } else {
            BatchStatus::PartiallyFailed
        }
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "running" => Ok(BatchStatus::Running),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            "partially_failed" => Ok(BatchStatus::PartiallyFailed),
            "cancelled" => Ok(BatchStatus::Cancelled),
            other => Err(format!("unknown batch status '{}'", other)),
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

text_enum_sql!(BatchStatus);

/// Child Job state counts a Batch recompute works from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildCounts {
    pub total: i32,
    pub completed: i32,
    /// Includes expired children.
    pub failed: i32,
    pub cancelled: i32,
    pub running: i32,
    /// Pending or paused children.
    pub waiting: i32,
}

impl ChildCounts {
    /// Tallies one child status into the counts.
    pub fn record(&mut self, status: JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed | JobStatus::Expired => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Pending | JobStatus::Paused => self.waiting += 1,
        }
    }

    pub fn non_terminal(&self) -> i32 {
        self.running + self.waiting
    }

    /// Progress across terminal children, clamped to [0, 100].
    /// Defined as 0 for an empty batch.
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let done = (self.completed + self.failed + self.cancelled) as f64;
        (done / self.total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// A group of Jobs created from one bulk user action.
#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::database::schema::batches)]
pub struct Batch {
    pub id: UniversalUuid,
    pub tenant_id: String,
    pub batch_key: String,
    pub marketplace: Marketplace,
    pub action: ActionCode,
    pub status: BatchStatus,
    pub total_count: i32,
    pub completed_count: i32,
    pub failed_count: i32,
    pub cancelled_count: i32,
    pub priority: i32,
    /// Set when the user cancels the batch; recompute then settles the
    /// batch as `Cancelled` instead of deriving from outcomes alone.
    pub cancelled_at: Option<UniversalTimestamp>,
    pub created_at: UniversalTimestamp,
    pub updated_at: UniversalTimestamp,
}

impl Batch {
    /// Progress across terminal children, clamped to [0, 100].
    pub fn progress_percent(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        let done = (self.completed_count + self.failed_count + self.cancelled_count) as f64;
        (done / self.total_count as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// A new Batch row.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::batches)]
pub struct NewBatch {
    pub id: UniversalUuid,
    pub tenant_id: String,
    pub batch_key: String,
    pub marketplace: Marketplace,
    pub action: ActionCode,
    pub status: BatchStatus,
    pub total_count: i32,
    pub priority: i32,
    pub created_at: UniversalTimestamp,
    pub updated_at: UniversalTimestamp,
}
