// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod error;
pub mod negotiation;
pub mod stages;

// Re-export services for convenience
pub use error::{ErrorKind, StageError};
pub use negotiation::{
    NegotiationOutcome, NegotiationReport, NegotiationServices, NegotiationState,
    NegotiationWorkflow, StateTransition,
};
pub use stages::{StageHandlers, StageOutcome};
