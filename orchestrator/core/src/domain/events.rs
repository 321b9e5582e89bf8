// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::dispatch::StageId;
use crate::domain::envelope::RequestId;
use crate::domain::gate::{GateDecision, RiskStatus};
use crate::domain::trajectory::UavId;

/// Negotiation progress events.
///
/// Diagnostic only: nothing in the negotiation reads them back, so a lost
/// event never changes an outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NegotiationEvent {
    RiskEvaluated {
        request_id: Option<RequestId>,
        risk: f64,
        flagged: Vec<UavId>,
        evaluated_at: DateTime<Utc>,
    },
    RouteDecided {
        request_id: Option<RequestId>,
        status: RiskStatus,
        decision: GateDecision,
        mutation_count: Option<u32>,
        decided_at: DateTime<Utc>,
    },
    MutationApplied {
        request_id: Option<RequestId>,
        mutation_count: u32,
        candidates: usize,
        applied_at: DateTime<Utc>,
    },
    CandidateSelected {
        request_id: Option<RequestId>,
        policy: String,
        candidates: usize,
        selected_at: DateTime<Utc>,
    },
    IterationLimitExceeded {
        request_id: Option<RequestId>,
        mutation_count: u32,
        max_mutations: u32,
        rejected_at: DateTime<Utc>,
    },
    Released {
        request_id: Option<RequestId>,
        topic: String,
        records: usize,
        mutation_count: Option<u32>,
        released_at: DateTime<Utc>,
    },
    DispatchFailed {
        request_id: Option<RequestId>,
        stage: StageId,
        status: Option<u16>,
        detail: String,
        failed_at: DateTime<Utc>,
    },
}

impl NegotiationEvent {
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::RiskEvaluated { request_id, .. }
            | Self::RouteDecided { request_id, .. }
            | Self::MutationApplied { request_id, .. }
            | Self::CandidateSelected { request_id, .. }
            | Self::IterationLimitExceeded { request_id, .. }
            | Self::Released { request_id, .. }
            | Self::DispatchFailed { request_id, .. } => request_id.as_ref(),
        }
    }
}
