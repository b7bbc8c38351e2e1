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

//! Error types for the orchestration core.
//!
//! Errors are split per concern: storage, registry lookup, transport and
//! handler execution. The transport split into retryable and non-retryable
//! failures is what drives the Processor's retry policy.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::models::action::{ActionCode, Marketplace};
use crate::models::job::JobStatus;

/// A state transition was attempted on a Job that is already terminal.
///
/// Terminal Jobs never transition again. Hitting this is either a caller
/// bug or a lost race (e.g. a Handler result arriving after a user
/// cancellation); it is logged and rejected, never silently applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("job {job_id} is terminal in status '{from}', refusing transition to '{attempted}'")]
pub struct TerminalStateViolation {
    /// The Job whose status was frozen.
    pub job_id: Uuid,
    /// The terminal status the Job is in.
    pub from: JobStatus,
    /// The status the caller tried to move to.
    pub attempted: JobStatus,
}

/// Errors raised by the data access layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to obtain or use a pooled connection.
    #[error("connection pool error: {0}")]
    ConnectionPool(String),

    /// An underlying database operation failed.
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// A stored payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested row does not exist in the acting tenant's partition.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Transition attempted from a terminal status.
    #[error(transparent)]
    TerminalState(#[from] TerminalStateViolation),

    /// Transition between two non-terminal statuses that the state machine
    /// does not permit (e.g. completing a paused Job).
    #[error("illegal transition for job {job_id}: '{from}' -> '{attempted}'")]
    IllegalTransition {
        job_id: Uuid,
        from: JobStatus,
        attempted: JobStatus,
    },

    /// An idempotency key collided with an existing row at insert time.
    #[error("idempotency key '{key}' already in use")]
    Conflict { key: String },

    /// Caller-supplied input was rejected before any row was written.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Errors raised when resolving an action against the catalog.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No ActionDefinition is registered for the marketplace/action pair.
    #[error("no action registered for {marketplace}/{action}")]
    UnknownAction {
        marketplace: Marketplace,
        action: ActionCode,
    },
}

/// Errors raised by a Transport while executing one HTTP-shaped Task.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The call did not return within the transport's deadline.
    #[error("transport timed out after {0:?}")]
    Timeout(Duration),

    /// The call never reached the remote side.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The remote side answered with a non-success status.
    #[error("remote returned status {status}")]
    Http { status: u16, body: String },

    /// The request or response could not be encoded/decoded.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl TransportError {
    /// Whether the Processor should re-queue the Job after this failure.
    ///
    /// Timeouts, connection failures and 5xx responses are retryable;
    /// 4xx responses and malformed payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout(_) | TransportError::Connection(_) => true,
            TransportError::Http { status, .. } => *status >= 500,
            TransportError::MalformedPayload(_) => false,
        }
    }

    /// Whether this failure should stamp the Task as `timeout` rather
    /// than `failed`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

/// Errors bubbling out of a Handler's `execute`.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The Job's input payload does not match the schema for its
    /// marketplace/action pair. The Job will never succeed as-is.
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),

    /// The remote answered 2xx but the body lacked a field the Handler
    /// needs (e.g. the created listing id).
    #[error("malformed remote response: {0}")]
    MalformedResponse(String),

    /// The external listing-link gateway failed; assumed transient.
    #[error("listing link gateway error: {0}")]
    Gateway(String),
}

impl HandlerError {
    /// Classification applied by the Processor: unclassified failures
    /// default to retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Transport(e) => e.is_retryable(),
            HandlerError::InvalidPayload(_) | HandlerError::MalformedResponse(_) => false,
            HandlerError::Storage(_) | HandlerError::Gateway(_) => true,
        }
    }
}
