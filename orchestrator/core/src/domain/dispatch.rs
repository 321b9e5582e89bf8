// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Stage hand-off contract.
//!
//! Dispatch is one-way and at-most-once: the caller learns whether the next
//! stage acknowledged receipt and nothing else. Failures are reported in the
//! [`DispatchResult`], never retried here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::envelope::Envelope;

/// Request header asking the receiving stage to acknowledge before processing.
pub const ASYNC_HEADER: &str = "x-async";

/// Deduplication key header, `request_id:stage`.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageId {
    Update,
    Trigger,
    RiskEval,
    Threshold,
    Mutate,
    Selector,
    Release,
}

impl StageId {
    pub const ALL: [StageId; 7] = [
        Self::Update,
        Self::Trigger,
        Self::RiskEval,
        Self::Threshold,
        Self::Mutate,
        Self::Selector,
        Self::Release,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Trigger => "trigger",
            Self::RiskEval => "risk-eval",
            Self::Threshold => "threshold",
            Self::Mutate => "mutate",
            Self::Selector => "selector",
            Self::Release => "release",
        }
    }

    /// HTTP path the stage is served on.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Update => "/update",
            Self::Trigger => "/trigger",
            Self::RiskEval => "/riskeval",
            Self::Threshold => "/threshold",
            Self::Mutate => "/mutate",
            Self::Selector => "/selector",
            Self::Release => "/release",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|stage| stage.as_str() == s || stage.path().trim_start_matches('/') == s)
            .copied()
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub stage: StageId,
    pub failed: bool,
    /// Acknowledgment status, when the transport has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DispatchResult {
    pub fn accepted(stage: StageId, status: Option<u16>) -> Self {
        Self {
            stage,
            failed: false,
            status,
            detail: None,
        }
    }

    pub fn failed(stage: StageId, status: Option<u16>, detail: impl Into<String>) -> Self {
        Self {
            stage,
            failed: true,
            status,
            detail: Some(detail.into()),
        }
    }
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, stage: StageId, envelope: &Envelope) -> DispatchResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_and_paths() {
        assert_eq!(StageId::RiskEval.path(), "/riskeval");
        assert_eq!("risk-eval".parse::<StageId>(), Ok(StageId::RiskEval));
        assert_eq!("riskeval".parse::<StageId>(), Ok(StageId::RiskEval));
        assert_eq!("selector".parse::<StageId>(), Ok(StageId::Selector));
        assert!("magic".parse::<StageId>().is_err());
    }
}
