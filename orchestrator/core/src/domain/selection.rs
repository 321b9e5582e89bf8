// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Candidate Selection
//!
//! Picks exactly one candidate set to re-enter risk evaluation. The policy is
//! a strategy object so deployments can trade latency (`first`) for quality
//! (`lowest-risk`) without touching the stages.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::oracle::{ConflictOracle, SeparationParams};
use crate::domain::trajectory::TrajectorySet;

#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("no candidate trajectory sets to select from")]
    EmptyCandidateSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicyKind {
    #[default]
    First,
    LowestRisk,
}

pub trait SelectionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, candidates: Vec<TrajectorySet>) -> Result<TrajectorySet, SelectionError>;
}

/// Reference policy: the first candidate wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstCandidateSelector;

impl SelectionPolicy for FirstCandidateSelector {
    fn name(&self) -> &'static str {
        "first"
    }

    fn select(&self, candidates: Vec<TrajectorySet>) -> Result<TrajectorySet, SelectionError> {
        candidates
            .into_iter()
            .next()
            .ok_or(SelectionError::EmptyCandidateSet)
    }
}

/// Re-scores every candidate and keeps the least risky one.
///
/// Ties keep the earliest candidate. A candidate the oracle cannot score is
/// skipped; if none can be scored the first candidate is returned.
pub struct LowestRiskSelector {
    oracle: Arc<dyn ConflictOracle>,
    params: SeparationParams,
}

impl LowestRiskSelector {
    pub fn new(oracle: Arc<dyn ConflictOracle>, params: SeparationParams) -> Self {
        Self { oracle, params }
    }
}

impl SelectionPolicy for LowestRiskSelector {
    fn name(&self) -> &'static str {
        "lowest-risk"
    }

    fn select(&self, candidates: Vec<TrajectorySet>) -> Result<TrajectorySet, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::EmptyCandidateSet);
        }

        let mut best: Option<(usize, f64)> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            match self.oracle.evaluate(candidate, &self.params) {
                Ok(report) => {
                    let risk = report.risk.value();
                    debug!(index, risk, "Scored candidate");
                    if best.is_none_or(|(_, lowest)| risk < lowest) {
                        best = Some((index, risk));
                    }
                }
                Err(e) => warn!(index, error = %e, "Could not score candidate, skipping"),
            }
        }

        let index = best.map(|(index, _)| index).unwrap_or(0);
        Ok(candidates.into_iter().nth(index).unwrap_or_default())
    }
}
