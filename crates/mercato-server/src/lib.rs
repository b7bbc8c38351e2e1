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

//! HTTP API server for the Mercato orchestration core.
//!
//! Exposes Job and Batch management over REST, forwards session-bound
//! marketplace calls to a relay agent, and runs the background worker
//! that claims and executes Jobs.

pub mod config;
pub mod error;
pub mod relay;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::ApiError;
pub use relay::HttpRelayChannel;
pub use routes::router;
pub use state::AppState;
