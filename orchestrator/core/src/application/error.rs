// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Stage failure taxonomy.
//!
//! Every stage failure aborts the request: nothing is forwarded and nothing
//! is retried. [`ErrorKind`] is what callers branch on; the HTTP layer maps it
//! to a status code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::envelope::{EnvelopeError, MetadataError};
use crate::domain::gate::GateError;
use crate::domain::iteration::IterationError;
use crate::domain::mutation::MutationError;
use crate::domain::oracle::OracleError;
use crate::domain::release::PublishError;
use crate::domain::repository::RepositoryError;
use crate::domain::selection::SelectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedInput,
    InvalidMetadata,
    ProtocolViolation,
    IterationExhausted,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedInput => "malformed_input",
            Self::InvalidMetadata => "invalid_metadata",
            Self::ProtocolViolation => "protocol_violation",
            Self::IterationExhausted => "iteration_exhausted",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Iteration(#[from] IterationError),

    #[error("mutation failed: {0}")]
    Mutation(#[from] MutationError),

    #[error("selection failed: {0}")]
    Selection(#[from] SelectionError),

    #[error("risk evaluation failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("trajectory storage failed: {0}")]
    Repository(#[from] RepositoryError),

    #[error("release failed: {0}")]
    Publish(#[from] PublishError),

    #[error("stage '{stage}' does not accept origin '{origin}'")]
    UnexpectedOrigin { stage: &'static str, origin: String },

    #[error("no trajectories reported within the last {ttl_secs}s")]
    NoRecentTrajectories { ttl_secs: u64 },

    #[error("{0}")]
    Worker(String),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Envelope(EnvelopeError::ExpectedCandidates(_)) => ErrorKind::ProtocolViolation,
            Self::Envelope(_) => ErrorKind::MalformedInput,
            Self::Metadata(_) => ErrorKind::InvalidMetadata,
            Self::Gate(GateError::Validation(_)) => ErrorKind::InvalidMetadata,
            Self::Gate(GateError::Routing { .. }) => ErrorKind::ProtocolViolation,
            Self::Iteration(IterationError::LimitExceeded { .. }) => ErrorKind::IterationExhausted,
            Self::Iteration(IterationError::InvalidMutationState { .. }) => {
                ErrorKind::ProtocolViolation
            }
            Self::Mutation(MutationError::MissingCapabilityProfile { .. }) => {
                ErrorKind::MalformedInput
            }
            Self::Mutation(_) => ErrorKind::ProtocolViolation,
            Self::Selection(_) => ErrorKind::MalformedInput,
            Self::Oracle(OracleError::MissingPosition(_)) => ErrorKind::MalformedInput,
            Self::Oracle(_) => ErrorKind::Internal,
            Self::Repository(_) | Self::Publish(_) | Self::Worker(_) => ErrorKind::Internal,
            Self::UnexpectedOrigin { .. } => ErrorKind::ProtocolViolation,
            Self::NoRecentTrajectories { .. } => ErrorKind::ProtocolViolation,
        }
    }

    pub fn is_terminal_rejection(&self) -> bool {
        self.kind() == ErrorKind::IterationExhausted
    }
}
