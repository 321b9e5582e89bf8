// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Conflict Gate
//!
//! Classifies the oracle's risk against a fixed threshold and routes the
//! envelope based on its origin.
//!
//! ## Routing Table
//! | Risk status | Origin | Decision |
//! |-------------|--------|----------|
//! | safe | `self_report` | `Terminate` (nothing to do) |
//! | safe | `system` | `Release` |
//! | unsafe | any recognized | `Mutate` |
//! | any | unrecognized | `RoutingError` |
//!
//! The comparison is strict: `risk == threshold` is safe. The gate never
//! writes to the envelope; `RiskStatus` is derived on every call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::envelope::{Metadata, MetadataError, Origin};

pub const DEFAULT_RISK_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStatus {
    Safe,
    Unsafe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// Safe self-report: the negotiation ends without further action
    Terminate,
    Release,
    Mutate,
}

#[derive(Debug, Error, PartialEq)]
pub enum GateError {
    #[error("validation error: {0}")]
    Validation(#[from] MetadataError),
    #[error("routing error: {status:?} risk with origin '{origin}' has no route")]
    Routing { status: RiskStatus, origin: String },
}

#[derive(Debug, Clone, Copy)]
pub struct ConflictGate {
    threshold: f64,
}

impl ConflictGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn classify(&self, risk: f64) -> RiskStatus {
        if risk > self.threshold {
            RiskStatus::Unsafe
        } else {
            RiskStatus::Safe
        }
    }

    /// Validate `risk` and `origin`, then apply the routing table.
    ///
    /// Risk is validated before origin is looked at, so an out-of-range risk is
    /// always a validation failure regardless of origin.
    pub fn route(&self, meta: &Metadata) -> Result<(RiskStatus, GateDecision), GateError> {
        let risk = meta.risk()?;
        let origin = meta.origin()?;
        let status = self.classify(risk.value());

        let decision = match (status, origin) {
            (_, Origin::Unrecognized(other)) => {
                return Err(GateError::Routing {
                    status,
                    origin: other.clone(),
                })
            }
            (RiskStatus::Unsafe, _) => GateDecision::Mutate,
            (RiskStatus::Safe, Origin::SelfReport) => GateDecision::Terminate,
            (RiskStatus::Safe, Origin::System) => GateDecision::Release,
            (RiskStatus::Safe, Origin::Mutate) => {
                return Err(GateError::Routing {
                    status,
                    origin: origin.to_string(),
                })
            }
        };

        Ok((status, decision))
    }
}

impl Default for ConflictGate {
    fn default() -> Self {
        Self::new(DEFAULT_RISK_THRESHOLD)
    }
}
