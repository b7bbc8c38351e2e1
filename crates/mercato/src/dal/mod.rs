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

//! Data access layer.
//!
//! All persistence goes through the `DAL`, which exposes per-entity
//! accessors. Every method takes the acting [`TenantContext`] and scopes
//! its queries to that tenant's rows; cross-tenant reads are impossible
//! by construction.
//!
//! Queries are written once against the unified schema. The `with_conn!`
//! macro expands the query body under each enabled backend's connection
//! type, so a method body type-checks for PostgreSQL and SQLite alike.
//! Methods whose behavior genuinely differs per backend (work claiming,
//! batch recomputation) are written out per backend instead.

pub mod batch;
pub mod job;
pub mod task;

pub use batch::{BatchDAL, BatchItem, BatchRequest};
pub use job::{JobCreation, JobDAL, JobFilter, NewJobRequest};
pub use task::{NewTaskSpec, TaskDAL};

use crate::database::Database;

/// Runs a query body on a pooled connection of whichever backend is
/// active. The body is expanded once per enabled backend, so it must
/// only use constructs valid for both.
macro_rules! with_conn {
    ($database:expr, $conn:ident => $body:expr) => {{
        match $database.pool() {
            #[cfg(feature = "postgres")]
            $crate::database::connection::AnyPool::Postgres(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| $crate::error::StorageError::ConnectionPool(e.to_string()))?;
                conn.interact(move |$conn| $body)
                    .await
                    .map_err(|e| $crate::error::StorageError::ConnectionPool(e.to_string()))?
            }
            #[cfg(feature = "sqlite")]
            $crate::database::connection::AnyPool::Sqlite(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| $crate::error::StorageError::ConnectionPool(e.to_string()))?;
                conn.interact(move |$conn| $body)
                    .await
                    .map_err(|e| $crate::error::StorageError::ConnectionPool(e.to_string()))?
            }
        }
    }};
}

pub(crate) use with_conn;

/// Entry point to all persistence operations.
#[derive(Clone, Debug)]
pub struct DAL {
    database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Job persistence operations.
    pub fn jobs(&self) -> JobDAL {
        JobDAL {
            database: self.database.clone(),
        }
    }

    /// Batch persistence operations.
    pub fn batches(&self) -> BatchDAL {
        BatchDAL {
            database: self.database.clone(),
        }
    }

    /// Task persistence operations.
    pub fn tasks(&self) -> TaskDAL {
        TaskDAL {
            database: self.database.clone(),
        }
    }
}
