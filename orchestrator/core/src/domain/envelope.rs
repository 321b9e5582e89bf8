// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Envelope Domain
//!
//! The envelope is the only state threaded between stages. Stages share no
//! memory, so everything the negotiation protocol needs to stay correct
//! (`origin`, `mutation_count`, `risk`, `request_id`) lives in [`Metadata`].
//!
//! ## Valid metadata states
//!
//! | origin | mutation_count | Meaning |
//! |--------|----------------|---------|
//! | `self_report` | absent | First contact, never mutated |
//! | `mutate` | present | Candidates in flight between mutate and selector |
//! | `system` | present | Selected candidate, re-entering risk evaluation |
//!
//! Every other combination is rejected by [`Metadata::check_state`]; nothing
//! is coerced.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::trajectory::{TrajectoryError, TrajectorySet};

// ============================================================================
// Value Objects
// ============================================================================

/// Provenance of an envelope (or, on records, of an individual trajectory).
///
/// Unknown strings are kept verbatim so that routing can reject them with a
/// precise message instead of failing at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Origin {
    SelfReport,
    System,
    Mutate,
    Unrecognized(String),
}

impl Origin {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SelfReport => "self_report",
            Self::System => "system",
            Self::Mutate => "mutate",
            Self::Unrecognized(other) => other,
        }
    }
}

impl From<String> for Origin {
    fn from(value: String) -> Self {
        match value.as_str() {
            "self_report" => Self::SelfReport,
            "system" => Self::System,
            "mutate" => Self::Mutate,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<Origin> for String {
    fn from(origin: Origin) -> Self {
        origin.as_str().to_string()
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque correlation id, assigned once per negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Risk value validated to lie in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct RiskScore(f64);

impl RiskScore {
    pub fn new(value: f64) -> Result<Self, MetadataError> {
        // NaN fails the range check as well
        if !(0.0..=1.0).contains(&value) {
            return Err(MetadataError::RiskOutOfRange(value));
        }
        Ok(Self(value))
    }

    pub fn zero() -> Self {
        Self(0.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

// ============================================================================
// Metadata
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum MetadataError {
    #[error("no origin key found in meta")]
    MissingOrigin,
    #[error("unrecognized origin '{0}'")]
    UnrecognizedOrigin(String),
    #[error("no risk key found in meta")]
    MissingRisk,
    #[error("risk value {0} is not between 0 and 1")]
    RiskOutOfRange(f64),
    #[error("invalid metadata state: origin '{origin}' with mutation_count {mutation_count:?}")]
    InvalidState {
        origin: String,
        mutation_count: Option<u32>,
    },
    #[error("request_id already assigned ({0})")]
    RequestIdAlreadyAssigned(RequestId),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,

    #[serde(default, alias = "mutations", skip_serializing_if = "Option::is_none")]
    pub mutation_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

impl Metadata {
    pub fn self_report() -> Self {
        Self {
            origin: Some(Origin::SelfReport),
            ..Self::default()
        }
    }

    pub fn origin(&self) -> Result<&Origin, MetadataError> {
        self.origin.as_ref().ok_or(MetadataError::MissingOrigin)
    }

    /// Validated risk; absent or out-of-range values are errors.
    pub fn risk(&self) -> Result<RiskScore, MetadataError> {
        let risk = self.risk.ok_or(MetadataError::MissingRisk)?;
        RiskScore::new(risk)
    }

    /// Check the (`origin`, `mutation_count`) pair against the protocol table.
    pub fn check_state(&self) -> Result<(), MetadataError> {
        let origin = self.origin()?;
        match (origin, self.mutation_count) {
            (Origin::SelfReport, None) => Ok(()),
            (Origin::System, Some(_)) | (Origin::Mutate, Some(_)) => Ok(()),
            (Origin::Unrecognized(other), _) => {
                Err(MetadataError::UnrecognizedOrigin(other.clone()))
            }
            (origin, mutation_count) => Err(MetadataError::InvalidState {
                origin: origin.to_string(),
                mutation_count,
            }),
        }
    }

    /// Assign a fresh request id if none is present, returning the effective id.
    pub fn ensure_request_id(&mut self) -> RequestId {
        self.request_id.get_or_insert_with(RequestId::new).clone()
    }

    /// Assign a specific request id; an id is never reassigned.
    pub fn assign_request_id(&mut self, id: RequestId) -> Result<(), MetadataError> {
        if let Some(existing) = &self.request_id {
            return Err(MetadataError::RequestIdAlreadyAssigned(existing.clone()));
        }
        self.request_id = Some(id);
        Ok(())
    }

    /// Copy of this metadata with a different origin.
    pub fn with_origin(&self, origin: Origin) -> Self {
        Self {
            origin: Some(origin),
            ..self.clone()
        }
    }

    /// Request id for log fields, `-` when unassigned.
    pub fn request_label(&self) -> &str {
        self.request_id.as_ref().map(RequestId::as_str).unwrap_or("-")
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Payload of an envelope: a single trajectory set or a list of candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeData {
    Set(TrajectorySet),
    Candidates(Vec<TrajectorySet>),
}

impl Default for EnvelopeData {
    fn default() -> Self {
        Self::Set(TrajectorySet::default())
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected a single trajectory set, found {0} candidates")]
    ExpectedSet(usize),
    #[error("expected a candidate list, found a trajectory set of {0} records")]
    ExpectedCandidates(usize),
    #[error(transparent)]
    Trajectory(#[from] TrajectoryError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub data: EnvelopeData,
    #[serde(default)]
    pub meta: Metadata,
}

impl Envelope {
    pub fn new(set: TrajectorySet, meta: Metadata) -> Self {
        Self {
            data: EnvelopeData::Set(set),
            meta,
        }
    }

    pub fn candidates(candidates: Vec<TrajectorySet>, meta: Metadata) -> Self {
        Self {
            data: EnvelopeData::Candidates(candidates),
            meta,
        }
    }

    pub fn from_json(input: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(input)?)
    }

    /// Borrow the single trajectory set, validating its invariants.
    ///
    /// A candidate list is never a set, whatever its length.
    pub fn trajectory_set(&self) -> Result<&TrajectorySet, EnvelopeError> {
        match &self.data {
            EnvelopeData::Set(set) => {
                set.validate()?;
                Ok(set)
            }
            EnvelopeData::Candidates(candidates) => Err(EnvelopeError::ExpectedSet(candidates.len())),
        }
    }

    /// Take the candidate list.
    ///
    /// `[]` decodes as an empty set, so it is read here as zero candidates.
    /// A non-empty set is not a candidate list.
    pub fn into_candidates(self) -> Result<Vec<TrajectorySet>, EnvelopeError> {
        match self.data {
            EnvelopeData::Candidates(candidates) => Ok(candidates),
            EnvelopeData::Set(set) if set.is_empty() => Ok(Vec::new()),
            EnvelopeData::Set(set) => Err(EnvelopeError::ExpectedCandidates(set.len())),
        }
    }
}
