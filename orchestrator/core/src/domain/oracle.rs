// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Conflict oracle contract.
//!
//! The oracle scores a trajectory set for predicted conflicts and names the
//! vehicles involved. Implementations live in `crate::infrastructure`; the
//! negotiation only ever sees this trait.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::envelope::RiskScore;
use crate::domain::trajectory::{TrajectorySet, UavId};

/// Projection parameters shared by every oracle implementation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationParams {
    /// Seconds between projected positions
    pub time_interval_s: f64,
    pub num_steps: u32,
    /// Minimum horizontal distance, metres
    pub horizontal_separation: f64,
    /// Minimum vertical distance, metres
    pub vertical_separation: f64,
}

impl Default for SeparationParams {
    fn default() -> Self {
        Self {
            time_interval_s: 1.0,
            num_steps: 10,
            horizontal_separation: 5.0,
            vertical_separation: 300.0,
        }
    }
}

impl SeparationParams {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.time_interval_s > 0.0) {
            return Err("separation.time_interval_s must be positive".to_string());
        }
        if self.num_steps == 0 {
            return Err("separation.num_steps must be greater than 0".to_string());
        }
        if !(self.horizontal_separation > 0.0) || !(self.vertical_separation > 0.0) {
            return Err("separation distances must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleReport {
    pub risk: RiskScore,
    /// Vehicles involved in at least one predicted conflict, ascending
    pub flagged: Vec<UavId>,
}

impl OracleReport {
    pub fn clear() -> Self {
        Self {
            risk: RiskScore::zero(),
            flagged: Vec::new(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum OracleError {
    #[error("uav {0} has no position to project from")]
    MissingPosition(UavId),
    #[error("oracle produced invalid risk {0}")]
    InvalidRisk(f64),
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

pub trait ConflictOracle: Send + Sync {
    fn evaluate(
        &self,
        set: &TrajectorySet,
        params: &SeparationParams,
    ) -> Result<OracleReport, OracleError>;
}
