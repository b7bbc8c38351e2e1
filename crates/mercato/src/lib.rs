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

//! # Mercato
//!
//! Task orchestration core for bulk marketplace operations.
//!
//! Mercato turns bulk user actions ("publish these 200 products to
//! Vinted") into durable, retryable units of work:
//!
//! - a **Batch** groups the Jobs born from one bulk action and derives
//!   its status from theirs,
//! - a **Job** is one marketplace operation on one entity, with a
//!   strict state machine, retry budget and TTL,
//! - a **Task** is one atomic step of a Job (an HTTP call, a storage
//!   write, media staging), persisted so an interrupted Job resumes
//!   where it stopped instead of repeating remote side effects.
//!
//! Storage is PostgreSQL or SQLite behind one Diesel schema, selected
//! at runtime from the connection URL. Everything is multi-tenant:
//! every data access takes an explicit [`TenantContext`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use mercato::dal::{NewJobRequest, DAL};
//! use mercato::handler::InMemoryLinkStore;
//! use mercato::models::{JobInput, Marketplace, ProductSnapshot};
//! use mercato::registry::ActionRegistry;
//! use mercato::transport::{RelayTransport, TransportRegistry};
//! use mercato::{CoreConfig, Database, Processor, TenantContext};
//!
//! # async fn example(channel: Arc<dyn mercato::transport::RelayChannel>) -> Result<(), Box<dyn std::error::Error>> {
//! let database = Database::new("orchestrator.db", "", 1);
//! database.run_migrations().await?;
//! let dal = DAL::new(database);
//!
//! let config = CoreConfig::default();
//! let transports = TransportRegistry::new().with(
//!     Marketplace::Vinted,
//!     Arc::new(RelayTransport::new(channel, config.relay_timeout)),
//! );
//! let processor = Processor::new(
//!     dal.clone(),
//!     Arc::new(ActionRegistry::builtin().clone()),
//!     transports,
//!     Arc::new(InMemoryLinkStore::new()),
//!     config,
//! );
//!
//! let tenant = TenantContext::new("acme")?;
//! let definition = ActionRegistry::builtin().resolve(
//!     Marketplace::Vinted,
//!     mercato::models::ActionCode::Publish,
//! )?;
//! let input = JobInput::Publish {
//!     product: ProductSnapshot {
//!         product_id: "p-1".into(),
//!         title: "Wool coat".into(),
//!         description: "Navy, size M".into(),
//!         price_cents: 4500,
//!         currency: "EUR".into(),
//!         quantity: 1,
//!         category: None,
//!         media_urls: vec![],
//!         attributes: serde_json::json!({}),
//!     },
//! };
//! dal.jobs()
//!     .create(
//!         &tenant,
//!         NewJobRequest::from_definition(definition, input, Duration::from_secs(3600)),
//!     )
//!     .await?;
//!
//! processor.process_next(&tenant).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dal;
pub mod database;
pub mod error;
pub mod handler;
pub mod models;
pub mod processor;
pub mod registry;
pub mod tenant;
pub mod transport;

pub use config::CoreConfig;
pub use dal::DAL;
pub use database::connection::{BackendType, Database};
pub use database::universal_types::{UniversalTimestamp, UniversalUuid};
pub use error::{
    HandlerError, RegistryError, StorageError, TerminalStateViolation, TransportError,
};
pub use models::{
    ActionCode, ActionDefinition, Batch, BatchStatus, Job, JobInput, JobResult, JobStatus,
    Marketplace, Task, TaskKind, TaskStatus,
};
pub use processor::{MaintenanceReport, ProcessOutcome, ProcessReport, Processor};
pub use registry::ActionRegistry;
pub use tenant::{TenantContext, TenantError};
