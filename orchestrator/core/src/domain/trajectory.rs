// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Trajectory Domain
//!
//! Value objects describing what each vehicle reported (or what the system
//! proposes it should fly instead).
//!
//! | Type | Description |
//! |------|-------------|
//! | `UavId` | Integer vehicle key, unique within a `TrajectorySet` |
//! | `TrajectoryRecord` | Speed + heading of a single vehicle, plus transient conflict flag |
//! | `TrajectorySet` | Ordered records, one per participating vehicle |
//!
//! The `conflict` flag is written only by the conflict oracle and is consumed
//! (cleared) by the mutation cycle. It is never serialized when false and
//! records are never stored with it set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::domain::envelope::Origin;

/// Vehicle identifier. Ordering is meaningful: the default yield rule of the
/// targeted de-escalation strategy compares ids numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UavId(pub u64);

impl std::fmt::Display for UavId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position in a local metric frame (x east, y north).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub altitude: f64,
}

/// Identifies which mutation strategy touched a record.
///
/// Encoded on the wire as a three-digit binary flag string (`"001"`, `"010"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationCase {
    #[serde(rename = "001")]
    TargetedDeescalation,
    #[serde(rename = "010")]
    ExploratoryPerturbation,
}

impl MutationCase {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TargetedDeescalation => "001",
            Self::ExploratoryPerturbation => "010",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub uav_id: UavId,

    /// Selects the capability profile used for mutation bounds
    pub uav_type: String,

    pub speed: f64,

    /// Heading in degrees, `[0, 360)`
    pub direction: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,

    /// Oracle-set conflict marker
    #[serde(
        default,
        rename = "collision",
        alias = "conflict",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub conflict: bool,

    /// Provenance tag: `mutate` when a strategy changed this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_cases: Option<MutationCase>,
}

impl TrajectoryRecord {
    pub fn new(uav_id: u64, uav_type: impl Into<String>, speed: f64, direction: f64) -> Self {
        Self {
            uav_id: UavId(uav_id),
            uav_type: uav_type.into(),
            speed,
            direction,
            timestamp: None,
            position: None,
            conflict: false,
            origin: None,
            mutation_cases: None,
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn flagged(mut self) -> Self {
        self.conflict = true;
        self
    }

    /// Tag the record as changed by the given mutation case.
    pub fn mark_mutated(&mut self, case: MutationCase) {
        self.origin = Some(Origin::Mutate);
        self.mutation_cases = Some(case);
    }

    pub fn is_mutated(&self) -> bool {
        matches!(self.origin, Some(Origin::Mutate))
    }

    /// Drop the mutation tags; they only describe the negotiation in flight.
    pub fn clear_provenance(&mut self) {
        self.origin = None;
        self.mutation_cases = None;
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TrajectoryError {
    #[error("duplicate uav_id {0} in trajectory set")]
    DuplicateUavId(UavId),
    #[error("uav {uav_id}: direction {direction} is outside [0, 360)")]
    DirectionOutOfRange { uav_id: UavId, direction: f64 },
    #[error("uav {uav_id}: speed {speed} must be a finite non-negative number")]
    InvalidSpeed { uav_id: UavId, speed: f64 },
}

/// Ordered records, one per vehicle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrajectorySet(Vec<TrajectoryRecord>);

impl TrajectorySet {
    /// Build a set, enforcing id uniqueness and field ranges.
    pub fn new(records: Vec<TrajectoryRecord>) -> Result<Self, TrajectoryError> {
        let set = Self(records);
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<(), TrajectoryError> {
        let mut seen = HashSet::with_capacity(self.0.len());
        for record in &self.0 {
            if !seen.insert(record.uav_id) {
                return Err(TrajectoryError::DuplicateUavId(record.uav_id));
            }
            if !(0.0..360.0).contains(&record.direction) {
                return Err(TrajectoryError::DirectionOutOfRange {
                    uav_id: record.uav_id,
                    direction: record.direction,
                });
            }
            if !record.speed.is_finite() || record.speed < 0.0 {
                return Err(TrajectoryError::InvalidSpeed {
                    uav_id: record.uav_id,
                    speed: record.speed,
                });
            }
        }
        Ok(())
    }

    pub fn records(&self) -> &[TrajectoryRecord] {
        &self.0
    }

    pub fn records_mut(&mut self) -> &mut [TrajectoryRecord] {
        &mut self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> Vec<UavId> {
        self.0.iter().map(|r| r.uav_id).collect()
    }

    pub fn get(&self, uav_id: UavId) -> Option<&TrajectoryRecord> {
        self.0.iter().find(|r| r.uav_id == uav_id)
    }

    pub fn flagged(&self) -> impl Iterator<Item = &TrajectoryRecord> {
        self.0.iter().filter(|r| r.conflict)
    }

    pub fn has_conflicts(&self) -> bool {
        self.0.iter().any(|r| r.conflict)
    }

    /// Replace all conflict flags with the oracle's verdict.
    pub fn apply_conflicts(&mut self, flagged: &[UavId]) {
        for record in &mut self.0 {
            record.conflict = flagged.contains(&record.uav_id);
        }
    }

    pub fn clear_conflicts(&mut self) {
        for record in &mut self.0 {
            record.conflict = false;
        }
    }

    pub fn clear_provenance(&mut self) {
        for record in &mut self.0 {
            record.clear_provenance();
        }
    }

    /// Records tagged `origin: mutate`, in set order.
    pub fn mutated(&self) -> Vec<TrajectoryRecord> {
        self.0.iter().filter(|r| r.is_mutated()).cloned().collect()
    }
}

impl From<TrajectorySet> for Vec<TrajectoryRecord> {
    fn from(set: TrajectorySet) -> Self {
        set.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_duplicate_ids() {
        let result = TrajectorySet::new(vec![
            TrajectoryRecord::new(1, "quad", 10.0, 90.0),
            TrajectoryRecord::new(1, "quad", 12.0, 180.0),
        ]);
        assert_eq!(result.unwrap_err(), TrajectoryError::DuplicateUavId(UavId(1)));
    }

    #[test]
    fn test_rejects_direction_outside_range() {
        let result = TrajectorySet::new(vec![TrajectoryRecord::new(4, "quad", 10.0, 360.0)]);
        assert!(matches!(result, Err(TrajectoryError::DirectionOutOfRange { .. })));
    }

    #[test]
    fn test_conflict_flag_wire_names() {
        let record: TrajectoryRecord = serde_json::from_str(
            r#"{"uav_id": 3, "uav_type": "quad", "speed": 40, "direction": 10, "collision": true}"#,
        )
        .unwrap();
        assert!(record.conflict);

        let aliased: TrajectoryRecord = serde_json::from_str(
            r#"{"uav_id": 3, "uav_type": "quad", "speed": 40, "direction": 10, "conflict": true}"#,
        )
        .unwrap();
        assert!(aliased.conflict);

        let mut cleared = record.clone();
        cleared.conflict = false;
        let json = serde_json::to_value(&cleared).unwrap();
        assert!(json.get("collision").is_none());
    }

    #[test]
    fn test_mutation_tags_serialize_as_provenance_strings() {
        let mut record = TrajectoryRecord::new(7, "fixed-wing", 50.0, 0.0);
        record.mark_mutated(MutationCase::TargetedDeescalation);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["origin"], "mutate");
        assert_eq!(json["mutation_cases"], "001");
    }

    #[test]
    fn test_clear_provenance_untags_mutated_records() {
        let mut record = TrajectoryRecord::new(7, "fixed-wing", 50.0, 0.0);
        record.mark_mutated(MutationCase::ExploratoryPerturbation);
        let mut set = TrajectorySet::new(vec![record, TrajectoryRecord::new(8, "quad", 5.0, 0.0)])
            .unwrap();
        assert_eq!(set.mutated().len(), 1);

        set.clear_provenance();

        assert!(set.mutated().is_empty());
        let json = serde_json::to_value(&set).unwrap();
        assert!(json[0].get("origin").is_none());
        assert!(json[0].get("mutation_cases").is_none());
        assert_eq!(json[0]["speed"], 50.0);
    }

    #[test]
    fn test_apply_conflicts_replaces_previous_flags() {
        let mut set = TrajectorySet::new(vec![
            TrajectoryRecord::new(1, "quad", 10.0, 0.0).flagged(),
            TrajectoryRecord::new(2, "quad", 10.0, 0.0),
        ])
        .unwrap();

        set.apply_conflicts(&[UavId(2)]);

        assert!(!set.records()[0].conflict);
        assert!(set.records()[1].conflict);
    }
}
