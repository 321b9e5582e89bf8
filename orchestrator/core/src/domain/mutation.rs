// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Candidate Generation
//!
//! Mutation strategies turn a conflicting trajectory set into one or more
//! candidate sets. Strategies are independent and pluggable; the
//! [`CandidateGenerator`] runs every enabled strategy and pools the results.
//!
//! | Strategy | Case | Output |
//! |----------|------|--------|
//! | [`TargetedDeescalation`] | `001` | exactly one set: the yielding vehicle slows down |
//! | [`ExploratoryPerturbation`] | `010` | one set per record: leave-one-out random perturbation |
//!
//! Neither strategy attempts joint multi-vehicle optimization.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::trajectory::{MutationCase, TrajectoryRecord, TrajectorySet, UavId};

#[derive(Debug, Error, PartialEq)]
pub enum MutationError {
    #[error("not enough conflicting trajectories to determine lower priority UAV: {flagged} flagged")]
    InsufficientConflictData { flagged: usize },
    #[error("no capability profile for uav_type '{uav_type}' (uav {uav_id})")]
    MissingCapabilityProfile { uav_type: String, uav_id: UavId },
    #[error("no mutation strategy produced a candidate: {0}")]
    NoCandidates(String),
    #[error("cannot mutate an empty trajectory set")]
    EmptyInput,
}

// ============================================================================
// Capability Table
// ============================================================================

/// Per-`uav_type` mutation bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub min_speed: f64,
    pub max_speed: f64,
    /// Maximum heading change in degrees, applied symmetrically
    pub max_bearing: f64,
}

impl CapabilityProfile {
    pub const ZERO_WIDTH: Self = Self {
        min_speed: 0.0,
        max_speed: 0.0,
        max_bearing: 0.0,
    };

    pub fn validate(&self) -> Result<(), String> {
        let finite = [self.min_speed, self.max_speed, self.max_bearing]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err("bounds must be finite".to_string());
        }
        if self.min_speed < 0.0 || self.min_speed > self.max_speed {
            return Err(format!(
                "speed range [{}, {}] is invalid",
                self.min_speed, self.max_speed
            ));
        }
        if !(0.0..=180.0).contains(&self.max_bearing) {
            return Err(format!("max_bearing {} must be within [0, 180]", self.max_bearing));
        }
        Ok(())
    }
}

/// Read-only capability table, loaded once per process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityTable(HashMap<String, CapabilityProfile>);

impl CapabilityTable {
    pub fn new(profiles: HashMap<String, CapabilityProfile>) -> Self {
        Self(profiles)
    }

    pub fn get(&self, uav_type: &str) -> Option<&CapabilityProfile> {
        self.0.get(uav_type)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CapabilityProfile)> {
        self.0.iter()
    }

    pub fn validate(&self) -> Result<(), String> {
        for (uav_type, profile) in &self.0 {
            profile
                .validate()
                .map_err(|e| format!("capability profile '{}': {}", uav_type, e))?;
        }
        Ok(())
    }
}

impl FromIterator<(String, CapabilityProfile)> for CapabilityTable {
    fn from_iter<T: IntoIterator<Item = (String, CapabilityProfile)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What exploratory perturbation does with a `uav_type` missing from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingProfilePolicy {
    #[default]
    Reject,
    /// Degenerate fallback: speed collapses to 0, heading unchanged
    ZeroWidth,
}

// ============================================================================
// Strategy Contract
// ============================================================================

pub trait MutationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn case(&self) -> MutationCase;

    /// Produce candidate sets from `set`. The input is never modified.
    fn generate(&self, set: &TrajectorySet) -> Result<Vec<TrajectorySet>, MutationError>;
}

/// Decides which of the flagged vehicles gives way.
pub trait YieldRule: Send + Sync {
    fn select_yielding(&self, flagged: &[&TrajectoryRecord]) -> Option<UavId>;
}

/// Default yield rule: the numerically highest `uav_id` loses priority.
///
/// A deterministic placeholder, not a model of right-of-way.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighestIdYields;

impl YieldRule for HighestIdYields {
    fn select_yielding(&self, flagged: &[&TrajectoryRecord]) -> Option<UavId> {
        flagged.iter().map(|r| r.uav_id).max()
    }
}

// ============================================================================
// Strategy A: Targeted De-escalation
// ============================================================================

pub const DEFAULT_SPEED_REDUCTION: f64 = 0.25;

pub struct TargetedDeescalation {
    speed_reduction: f64,
    yield_rule: Arc<dyn YieldRule>,
}

impl TargetedDeescalation {
    pub fn new(speed_reduction: f64) -> Self {
        Self {
            speed_reduction,
            yield_rule: Arc::new(HighestIdYields),
        }
    }

    pub fn with_yield_rule(mut self, rule: Arc<dyn YieldRule>) -> Self {
        self.yield_rule = rule;
        self
    }
}

impl Default for TargetedDeescalation {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_REDUCTION)
    }
}

impl MutationStrategy for TargetedDeescalation {
    fn name(&self) -> &'static str {
        "targeted-deescalation"
    }

    fn case(&self) -> MutationCase {
        MutationCase::TargetedDeescalation
    }

    fn generate(&self, set: &TrajectorySet) -> Result<Vec<TrajectorySet>, MutationError> {
        let flagged: Vec<&TrajectoryRecord> = set.flagged().collect();
        if flagged.len() < 2 {
            return Err(MutationError::InsufficientConflictData {
                flagged: flagged.len(),
            });
        }

        let yielding = self
            .yield_rule
            .select_yielding(&flagged)
            .ok_or(MutationError::InsufficientConflictData {
                flagged: flagged.len(),
            })?;

        let mut mutated = set.clone();
        for record in mutated.records_mut() {
            if record.uav_id == yielding {
                let original_speed = record.speed;
                record.speed = original_speed * (1.0 - self.speed_reduction);
                record.mark_mutated(self.case());
                info!(
                    uav_id = %record.uav_id,
                    from = original_speed,
                    to = record.speed,
                    "Decreased speed of lower priority UAV"
                );
            }
        }
        mutated.clear_conflicts();

        Ok(vec![mutated])
    }
}

// ============================================================================
// Strategy B: Exploratory Perturbation
// ============================================================================

pub struct ExploratoryPerturbation {
    capabilities: Arc<CapabilityTable>,
    missing_profile: MissingProfilePolicy,
    rng: Mutex<StdRng>,
}

impl ExploratoryPerturbation {
    pub fn new(capabilities: Arc<CapabilityTable>, missing_profile: MissingProfilePolicy) -> Self {
        Self {
            capabilities,
            missing_profile,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Reproducible sampling, used by tests and seeded deployments.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    fn profile_for(&self, record: &TrajectoryRecord) -> Result<CapabilityProfile, MutationError> {
        match (self.capabilities.get(&record.uav_type), self.missing_profile) {
            (Some(profile), _) => Ok(*profile),
            (None, MissingProfilePolicy::ZeroWidth) => {
                warn!(
                    uav_id = %record.uav_id,
                    uav_type = %record.uav_type,
                    "No capability profile, falling back to zero-width bounds"
                );
                Ok(CapabilityProfile::ZERO_WIDTH)
            }
            (None, MissingProfilePolicy::Reject) => Err(MutationError::MissingCapabilityProfile {
                uav_type: record.uav_type.clone(),
                uav_id: record.uav_id,
            }),
        }
    }
}

/// Wrap a heading into `[0, 360)`.
pub fn wrap_bearing(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid rounds tiny negative inputs up to exactly 360.0
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

impl MutationStrategy for ExploratoryPerturbation {
    fn name(&self) -> &'static str {
        "exploratory-perturbation"
    }

    fn case(&self) -> MutationCase {
        MutationCase::ExploratoryPerturbation
    }

    fn generate(&self, set: &TrajectorySet) -> Result<Vec<TrajectorySet>, MutationError> {
        // Resolve every profile up front so a missing one fails the whole strategy
        let profiles = set
            .records()
            .iter()
            .map(|record| self.profile_for(record))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rng = self.rng.lock();
        let mut candidates = Vec::with_capacity(set.len());

        for (index, profile) in profiles.iter().enumerate() {
            let mut candidate = set.clone();
            let record = &mut candidate.records_mut()[index];

            record.speed = rng.random_range(profile.min_speed..=profile.max_speed);
            let bearing_change = rng.random_range(-profile.max_bearing..=profile.max_bearing);
            record.direction = wrap_bearing(record.direction + bearing_change);
            record.mark_mutated(self.case());

            debug!(
                uav_id = %record.uav_id,
                speed = record.speed,
                direction = record.direction,
                "Perturbed trajectory"
            );
            candidates.push(candidate);
        }

        Ok(candidates)
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Runs every enabled strategy and pools their candidates.
///
/// A failing strategy is logged and skipped; generation fails only when no
/// strategy produced anything. Transient conflict flags are cleared on every
/// emitted candidate since the mutation cycle consumes them.
#[derive(Clone)]
pub struct CandidateGenerator {
    strategies: Vec<Arc<dyn MutationStrategy>>,
}

impl CandidateGenerator {
    pub fn new(strategies: Vec<Arc<dyn MutationStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn generate(&self, set: &TrajectorySet) -> Result<Vec<TrajectorySet>, MutationError> {
        if set.is_empty() {
            return Err(MutationError::EmptyInput);
        }

        let mut candidates = Vec::new();
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            match strategy.generate(set) {
                Ok(mut produced) => {
                    debug!(
                        strategy = strategy.name(),
                        candidates = produced.len(),
                        "Strategy produced candidates"
                    );
                    candidates.append(&mut produced);
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Mutation strategy failed");
                    failures.push(e);
                }
            }
        }

        if candidates.is_empty() {
            return Err(match failures.len() {
                0 => MutationError::NoCandidates("no strategies enabled".to_string()),
                1 => failures.remove(0),
                _ => MutationError::NoCandidates(
                    failures
                        .iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<_>>()
                        .join("; "),
                ),
            });
        }

        for candidate in &mut candidates {
            candidate.clear_conflicts();
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::Origin;

    fn capabilities() -> Arc<CapabilityTable> {
        Arc::new(CapabilityTable::from_iter([
            (
                "quad".to_string(),
                CapabilityProfile {
                    min_speed: 5.0,
                    max_speed: 20.0,
                    max_bearing: 30.0,
                },
            ),
            (
                "fixed-wing".to_string(),
                CapabilityProfile {
                    min_speed: 25.0,
                    max_speed: 60.0,
                    max_bearing: 15.0,
                },
            ),
        ]))
    }

    fn conflicting_set() -> TrajectorySet {
        TrajectorySet::new(vec![
            TrajectoryRecord::new(3, "quad", 40.0, 90.0).flagged(),
            TrajectoryRecord::new(5, "quad", 12.0, 180.0),
            TrajectoryRecord::new(7, "fixed-wing", 50.0, 270.0).flagged(),
        ])
        .unwrap()
    }

    #[test]
    fn test_targeted_deescalation_slows_highest_id() {
        let input = conflicting_set();
        let candidates = TargetedDeescalation::default().generate(&input).unwrap();
        assert_eq!(candidates.len(), 1);

        let output = &candidates[0];
        let slowed = output.get(UavId(7)).unwrap();
        assert_eq!(slowed.speed, 37.5);
        assert!(!slowed.conflict);
        assert_eq!(slowed.origin, Some(Origin::Mutate));
        assert_eq!(slowed.mutation_cases, Some(MutationCase::TargetedDeescalation));

        let other = output.get(UavId(3)).unwrap();
        assert_eq!(other.speed, 40.0);
        assert!(!other.conflict);
        assert_eq!(other.origin, None);

        assert_eq!(output.get(UavId(5)), input.get(UavId(5)));
        // input untouched
        assert!(input.get(UavId(7)).unwrap().conflict);
    }

    #[test]
    fn test_targeted_deescalation_needs_two_flags() {
        let strategy = TargetedDeescalation::default();

        let none = TrajectorySet::new(vec![TrajectoryRecord::new(1, "quad", 10.0, 0.0)]).unwrap();
        assert_eq!(
            strategy.generate(&none),
            Err(MutationError::InsufficientConflictData { flagged: 0 })
        );

        let one = TrajectorySet::new(vec![
            TrajectoryRecord::new(1, "quad", 10.0, 0.0).flagged(),
            TrajectoryRecord::new(2, "quad", 10.0, 0.0),
        ])
        .unwrap();
        assert_eq!(
            strategy.generate(&one),
            Err(MutationError::InsufficientConflictData { flagged: 1 })
        );
    }

    struct LowestIdYields;

    impl YieldRule for LowestIdYields {
        fn select_yielding(&self, flagged: &[&TrajectoryRecord]) -> Option<UavId> {
            flagged.iter().map(|r| r.uav_id).min()
        }
    }

    #[test]
    fn test_yield_rule_is_overridable() {
        let strategy = TargetedDeescalation::default().with_yield_rule(Arc::new(LowestIdYields));
        let candidates = strategy.generate(&conflicting_set()).unwrap();
        assert_eq!(candidates[0].get(UavId(3)).unwrap().speed, 30.0);
        assert_eq!(candidates[0].get(UavId(7)).unwrap().speed, 50.0);
    }

    #[test]
    fn test_exploratory_perturbation_leave_one_out() {
        let input = TrajectorySet::new(vec![
            TrajectoryRecord::new(1, "quad", 10.0, 355.0),
            TrajectoryRecord::new(2, "quad", 15.0, 2.0),
            TrajectoryRecord::new(3, "fixed-wing", 40.0, 180.0),
        ])
        .unwrap();
        let strategy =
            ExploratoryPerturbation::new(capabilities(), MissingProfilePolicy::Reject).with_seed(7);

        for _ in 0..50 {
            let candidates = strategy.generate(&input).unwrap();
            assert_eq!(candidates.len(), 3);

            for (index, candidate) in candidates.iter().enumerate() {
                for (position, (original, mutated)) in
                    input.records().iter().zip(candidate.records()).enumerate()
                {
                    assert!((0.0..360.0).contains(&mutated.direction));
                    if position == index {
                        let profile = capabilities().get(&original.uav_type).copied().unwrap();
                        assert!(mutated.speed >= profile.min_speed && mutated.speed <= profile.max_speed);
                        assert_eq!(mutated.mutation_cases, Some(MutationCase::ExploratoryPerturbation));
                    } else {
                        assert_eq!(original, mutated);
                    }
                }
            }
        }
    }

    #[test]
    fn test_missing_profile_policies() {
        let input =
            TrajectorySet::new(vec![TrajectoryRecord::new(9, "balloon", 3.0, 45.0)]).unwrap();

        let strict = ExploratoryPerturbation::new(capabilities(), MissingProfilePolicy::Reject);
        assert_eq!(
            strict.generate(&input),
            Err(MutationError::MissingCapabilityProfile {
                uav_type: "balloon".to_string(),
                uav_id: UavId(9)
            })
        );

        let lenient = ExploratoryPerturbation::new(capabilities(), MissingProfilePolicy::ZeroWidth);
        let candidates = lenient.generate(&input).unwrap();
        assert_eq!(candidates[0].records()[0].speed, 0.0);
        assert_eq!(candidates[0].records()[0].direction, 45.0);
    }

    #[test]
    fn test_wrap_bearing() {
        assert_eq!(wrap_bearing(370.0), 10.0);
        assert_eq!(wrap_bearing(-10.0), 350.0);
        assert_eq!(wrap_bearing(360.0), 0.0);
        assert!(wrap_bearing(-1e-15) < 360.0);
    }

    #[test]
    fn test_generator_pools_and_clears_flags() {
        let generator = CandidateGenerator::new(vec![
            Arc::new(TargetedDeescalation::default()),
            Arc::new(
                ExploratoryPerturbation::new(capabilities(), MissingProfilePolicy::Reject)
                    .with_seed(1),
            ),
        ]);

        let candidates = generator.generate(&conflicting_set()).unwrap();
        assert_eq!(candidates.len(), 4);
        assert!(candidates.iter().all(|c| !c.has_conflicts()));
    }

    #[test]
    fn test_generator_survives_single_strategy_failure() {
        let generator = CandidateGenerator::new(vec![
            Arc::new(TargetedDeescalation::default()),
            Arc::new(ExploratoryPerturbation::new(capabilities(), MissingProfilePolicy::Reject)),
        ]);
        let unflagged =
            TrajectorySet::new(vec![TrajectoryRecord::new(1, "quad", 10.0, 0.0)]).unwrap();

        let candidates = generator.generate(&unflagged).unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_generator_reports_single_failure_verbatim() {
        let generator = CandidateGenerator::new(vec![Arc::new(TargetedDeescalation::default())]);
        let unflagged =
            TrajectorySet::new(vec![TrajectoryRecord::new(1, "quad", 10.0, 0.0)]).unwrap();
        assert_eq!(
            generator.generate(&unflagged),
            Err(MutationError::InsufficientConflictData { flagged: 0 })
        );
    }

    #[test]
    fn test_generator_rejects_empty_input() {
        let generator = CandidateGenerator::new(vec![
            Arc::new(TargetedDeescalation::default()),
            Arc::new(ExploratoryPerturbation::new(capabilities(), MissingProfilePolicy::Reject)),
        ]);
        assert_eq!(
            generator.generate(&TrajectorySet::default()),
            Err(MutationError::EmptyInput)
        );

        let disabled = CandidateGenerator::new(Vec::new());
        assert_eq!(
            disabled.generate(&TrajectorySet::default()),
            Err(MutationError::EmptyInput)
        );
    }

    #[test]
    fn test_capability_validation() {
        let bad = CapabilityProfile {
            min_speed: 10.0,
            max_speed: 5.0,
            max_bearing: 10.0,
        };
        assert!(bad.validate().is_err());
        assert!(capabilities().validate().is_ok());
    }
}
