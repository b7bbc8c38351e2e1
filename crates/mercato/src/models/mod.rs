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

//! Data models for the orchestration core.
//!
//! Each model maps to a table in the unified schema and carries its own
//! status state machine. Payload schemas (the tagged unions behind Job
//! `input`/`result`) live in [`payload`].

pub mod action;
pub mod batch;
pub mod job;
pub mod payload;
pub mod task;

pub use action::{ActionCode, ActionDefinition, Marketplace};
pub use batch::{Batch, BatchStatus, ChildCounts, NewBatch};
pub use job::{Job, JobStatus, NewJob};
pub use payload::{JobInput, JobResult, ListingChanges, ListingRef, ProductSnapshot};
pub use task::{NewTask, Task, TaskKind, TaskStatus};
