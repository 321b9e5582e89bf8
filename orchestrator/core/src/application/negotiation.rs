// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Negotiation Application Service
//!
//! Implements the conflict-resolution cycle twice over the same services:
//! once as independent stage handlers (`crate::application::stages`), and
//! once as an in-process finite-state workflow ([`NegotiationWorkflow`]).
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Compose oracle, gate, guard, generator and selector
//! - **Dependencies:** Domain policies, Infrastructure (EventBus)
//!
//! # FSM
//!
//! ```text
//! RiskEvaluation -> Threshold -> { NoActionRequired | Released | Mutation }
//! Mutation -> Selection -> RiskEvaluation
//! Mutation -> Rejected            (iteration budget exhausted)
//! ```

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::error::StageError;
use crate::domain::config::{NegotiatorConfigManifest, StrategyKind};
use crate::domain::envelope::{Envelope, EnvelopeError, Metadata, Origin};
use crate::domain::events::NegotiationEvent;
use crate::domain::gate::{ConflictGate, GateDecision, RiskStatus};
use crate::domain::iteration::{IterationError, IterationGuard};
use crate::domain::mutation::{
    CandidateGenerator, ExploratoryPerturbation, MutationStrategy, TargetedDeescalation,
};
use crate::domain::oracle::{ConflictOracle, SeparationParams};
use crate::domain::selection::{
    FirstCandidateSelector, LowestRiskSelector, SelectionPolicy, SelectionPolicyKind,
};
use crate::domain::trajectory::TrajectorySet;
use crate::infrastructure::event_bus::EventBus;

// ============================================================================
// Application Service: NegotiationServices
// ============================================================================

/// The negotiation building blocks, shared by stages and the workflow.
pub struct NegotiationServices {
    oracle: Arc<dyn ConflictOracle>,
    separation: SeparationParams,
    gate: ConflictGate,
    guard: IterationGuard,
    generator: CandidateGenerator,
    selector: Arc<dyn SelectionPolicy>,
    event_bus: Arc<EventBus>,
}

impl NegotiationServices {
    pub fn new(
        oracle: Arc<dyn ConflictOracle>,
        generator: CandidateGenerator,
        selector: Arc<dyn SelectionPolicy>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            oracle,
            separation: SeparationParams::default(),
            gate: ConflictGate::default(),
            guard: IterationGuard::default(),
            generator,
            selector,
            event_bus,
        }
    }

    pub fn with_gate(mut self, gate: ConflictGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_guard(mut self, guard: IterationGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_separation(mut self, separation: SeparationParams) -> Self {
        self.separation = separation;
        self
    }

    /// Wire strategies, selection policy and bounds from configuration.
    pub fn from_config(
        config: &NegotiatorConfigManifest,
        oracle: Arc<dyn ConflictOracle>,
        event_bus: Arc<EventBus>,
    ) -> anyhow::Result<Self> {
        let spec = &config.spec;
        let capabilities = Arc::new(
            config
                .load_capabilities()
                .context("Failed to load capability table")?,
        );
        capabilities.validate().map_err(anyhow::Error::msg)?;

        let strategies = spec
            .mutation
            .strategies
            .iter()
            .map(|kind| -> Arc<dyn MutationStrategy> {
                match kind {
                    StrategyKind::TargetedDeescalation => {
                        Arc::new(TargetedDeescalation::new(spec.mutation.speed_reduction))
                    }
                    StrategyKind::ExploratoryPerturbation => {
                        let strategy = ExploratoryPerturbation::new(
                            capabilities.clone(),
                            spec.mutation.missing_profile,
                        );
                        match spec.mutation.seed {
                            Some(seed) => Arc::new(strategy.with_seed(seed)),
                            None => Arc::new(strategy),
                        }
                    }
                }
            })
            .collect();

        let selector: Arc<dyn SelectionPolicy> = match spec.selection.policy {
            SelectionPolicyKind::First => Arc::new(FirstCandidateSelector),
            SelectionPolicyKind::LowestRisk => {
                Arc::new(LowestRiskSelector::new(oracle.clone(), spec.separation))
            }
        };

        let generator = CandidateGenerator::new(strategies);

        info!(
            threshold = spec.negotiation.threshold,
            max_mutations = spec.negotiation.max_mutations,
            strategies = ?generator.strategy_names(),
            selection = selector.name(),
            capability_profiles = capabilities.len(),
            "Negotiation services configured"
        );

        Ok(Self::new(oracle, generator, selector, event_bus)
            .with_gate(ConflictGate::new(spec.negotiation.threshold))
            .with_guard(IterationGuard::new(spec.negotiation.max_mutations))
            .with_separation(spec.separation))
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Score the set and replace its conflict flags with the oracle's verdict.
    pub fn evaluate_risk(
        &self,
        mut set: TrajectorySet,
        meta: &Metadata,
    ) -> Result<(TrajectorySet, Metadata), StageError> {
        meta.check_state()?;

        let report = self.oracle.evaluate(&set, &self.separation)?;
        set.apply_conflicts(&report.flagged);

        let mut next = meta.clone();
        next.risk = Some(report.risk.value());

        info!(
            request_id = %meta.request_label(),
            risk = report.risk.value(),
            flagged = report.flagged.len(),
            mutation_count = ?meta.mutation_count,
            "Risk evaluated"
        );
        self.event_bus.publish(NegotiationEvent::RiskEvaluated {
            request_id: meta.request_id.clone(),
            risk: report.risk.value(),
            flagged: report.flagged,
            evaluated_at: Utc::now(),
        });

        Ok((set, next))
    }

    /// Apply the gate, then confirm the metadata state is coherent.
    pub fn decide(&self, meta: &Metadata) -> Result<(RiskStatus, GateDecision), StageError> {
        let (status, decision) = self.gate.route(meta)?;
        meta.check_state()?;

        info!(
            request_id = %meta.request_label(),
            risk = ?meta.risk,
            threshold = self.gate.threshold(),
            status = ?status,
            decision = ?decision,
            mutation_count = ?meta.mutation_count,
            "Route decided"
        );
        self.event_bus.publish(NegotiationEvent::RouteDecided {
            request_id: meta.request_id.clone(),
            status,
            decision,
            mutation_count: meta.mutation_count,
            decided_at: Utc::now(),
        });

        Ok((status, decision))
    }

    /// Pass the iteration guard and generate candidates.
    ///
    /// Candidates leave with `origin: mutate` and the advanced count.
    pub fn mutate(
        &self,
        set: &TrajectorySet,
        meta: &Metadata,
    ) -> Result<(Vec<TrajectorySet>, Metadata), StageError> {
        let advanced = match self.guard.advance(meta) {
            Ok(advanced) => advanced,
            Err(IterationError::LimitExceeded {
                mutation_count,
                max_mutations,
            }) => {
                warn!(
                    request_id = %meta.request_label(),
                    mutation_count,
                    max_mutations,
                    "Iteration limit exceeded, negotiation rejected"
                );
                self.event_bus.publish(NegotiationEvent::IterationLimitExceeded {
                    request_id: meta.request_id.clone(),
                    mutation_count,
                    max_mutations,
                    rejected_at: Utc::now(),
                });
                return Err(IterationError::LimitExceeded {
                    mutation_count,
                    max_mutations,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        let candidates = self.generator.generate(set)?;
        let mutation_count = advanced.mutation_count.unwrap_or_default();

        info!(
            request_id = %meta.request_label(),
            mutation_count,
            candidates = candidates.len(),
            "Mutation applied"
        );
        self.event_bus.publish(NegotiationEvent::MutationApplied {
            request_id: meta.request_id.clone(),
            mutation_count,
            candidates: candidates.len(),
            applied_at: Utc::now(),
        });

        Ok((candidates, advanced.with_origin(Origin::Mutate)))
    }

    /// Choose one candidate and hand it back to risk evaluation as `system`.
    pub fn select(
        &self,
        candidates: Vec<TrajectorySet>,
        meta: &Metadata,
    ) -> Result<(TrajectorySet, Metadata), StageError> {
        meta.check_state()?;
        let origin = meta.origin()?;
        if *origin != Origin::Mutate {
            return Err(StageError::UnexpectedOrigin {
                stage: "selector",
                origin: origin.to_string(),
            });
        }

        let count = candidates.len();
        let chosen = self.selector.select(candidates)?;
        chosen.validate().map_err(EnvelopeError::from)?;

        let mut next = meta.with_origin(Origin::System);
        // a stale risk must never reach the gate
        next.risk = None;

        debug!(
            request_id = %meta.request_label(),
            policy = self.selector.name(),
            candidates = count,
            "Candidate selected"
        );
        self.event_bus.publish(NegotiationEvent::CandidateSelected {
            request_id: meta.request_id.clone(),
            policy: self.selector.name().to_string(),
            candidates: count,
            selected_at: Utc::now(),
        });

        Ok((chosen, next))
    }
}

// ============================================================================
// In-process FSM: NegotiationWorkflow
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    RiskEvaluation,
    Threshold,
    Mutation,
    Selection,
    Released,
    NoActionRequired,
    Rejected,
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::NoActionRequired | Self::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: NegotiationState,
    pub to: NegotiationState,
    pub mutation_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NegotiationOutcome {
    /// Safe after at least one mutation; ready for release
    Released { set: TrajectorySet, meta: Metadata },
    /// Safe as reported
    NoActionRequired { meta: Metadata },
    /// Iteration budget exhausted
    Rejected { meta: Metadata, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct NegotiationReport {
    #[serde(flatten)]
    pub outcome: NegotiationOutcome,
    pub transitions: Vec<StateTransition>,
}

impl NegotiationReport {
    pub fn meta(&self) -> &Metadata {
        match &self.outcome {
            NegotiationOutcome::Released { meta, .. }
            | NegotiationOutcome::NoActionRequired { meta }
            | NegotiationOutcome::Rejected { meta, .. } => meta,
        }
    }

    pub fn mutation_count(&self) -> Option<u32> {
        self.meta().mutation_count
    }
}

/// Runs the whole cycle in process, with the same services the stages use.
pub struct NegotiationWorkflow {
    services: Arc<NegotiationServices>,
}

impl NegotiationWorkflow {
    pub fn new(services: Arc<NegotiationServices>) -> Self {
        Self { services }
    }

    /// Drive an envelope from risk evaluation to a terminal state.
    ///
    /// Exhausting the iteration budget is a normal `Rejected` outcome; every
    /// other failure aborts the run.
    pub fn run(&self, envelope: Envelope) -> Result<NegotiationReport, StageError> {
        let mut set = envelope.trajectory_set()?.clone();
        let mut meta = envelope.meta;
        meta.ensure_request_id();
        meta.check_state()?;

        let mut candidates = Vec::new();
        let mut rejection = None;
        let mut transitions = Vec::new();
        let mut state = NegotiationState::RiskEvaluation;

        while !state.is_terminal() {
            let next = match state {
                NegotiationState::RiskEvaluation => {
                    let (evaluated, evaluated_meta) = self.services.evaluate_risk(set, &meta)?;
                    set = evaluated;
                    meta = evaluated_meta;
                    NegotiationState::Threshold
                }
                NegotiationState::Threshold => match self.services.decide(&meta)?.1 {
                    GateDecision::Terminate => NegotiationState::NoActionRequired,
                    GateDecision::Release => NegotiationState::Released,
                    GateDecision::Mutate => NegotiationState::Mutation,
                },
                NegotiationState::Mutation => match self.services.mutate(&set, &meta) {
                    Ok((generated, mutated_meta)) => {
                        candidates = generated;
                        meta = mutated_meta;
                        NegotiationState::Selection
                    }
                    Err(e) if e.is_terminal_rejection() => {
                        rejection = Some(e.to_string());
                        NegotiationState::Rejected
                    }
                    Err(e) => return Err(e),
                },
                NegotiationState::Selection => {
                    let (chosen, selected_meta) =
                        self.services.select(std::mem::take(&mut candidates), &meta)?;
                    set = chosen;
                    meta = selected_meta;
                    NegotiationState::RiskEvaluation
                }
                NegotiationState::Released
                | NegotiationState::NoActionRequired
                | NegotiationState::Rejected => break,
            };

            debug!(
                request_id = %meta.request_label(),
                from = ?state,
                to = ?next,
                "State transition"
            );
            transitions.push(StateTransition {
                from: state,
                to: next,
                mutation_count: meta.mutation_count,
            });
            state = next;
        }

        let outcome = match state {
            NegotiationState::Released => {
                set.clear_conflicts();
                NegotiationOutcome::Released { set, meta }
            }
            NegotiationState::Rejected => NegotiationOutcome::Rejected {
                meta,
                reason: rejection.unwrap_or_else(|| "rejected".to_string()),
            },
            _ => NegotiationOutcome::NoActionRequired { meta },
        };

        Ok(NegotiationReport {
            outcome,
            transitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::RiskScore;
    use crate::domain::oracle::{OracleError, OracleReport};
    use crate::domain::trajectory::{TrajectoryRecord, UavId};

    /// Any vehicle above the speed limit conflicts with every other one.
    struct SpeedLimitOracle {
        limit: f64,
    }

    impl ConflictOracle for SpeedLimitOracle {
        fn evaluate(
            &self,
            set: &TrajectorySet,
            _params: &SeparationParams,
        ) -> Result<OracleReport, OracleError> {
            if set.records().iter().any(|r| r.speed > self.limit) {
                Ok(OracleReport {
                    risk: RiskScore::new(0.9).map_err(|_| OracleError::InvalidRisk(0.9))?,
                    flagged: set.ids(),
                })
            } else {
                Ok(OracleReport::clear())
            }
        }
    }

    fn services(limit: f64, max_mutations: u32) -> Arc<NegotiationServices> {
        Arc::new(
            NegotiationServices::new(
                Arc::new(SpeedLimitOracle { limit }),
                CandidateGenerator::new(vec![Arc::new(TargetedDeescalation::default())]),
                Arc::new(FirstCandidateSelector),
                Arc::new(EventBus::new(64)),
            )
            .with_guard(IterationGuard::new(max_mutations)),
        )
    }

    fn report(speeds: &[f64]) -> Envelope {
        let records = speeds
            .iter()
            .enumerate()
            .map(|(i, speed)| TrajectoryRecord::new(i as u64 + 1, "quad", *speed, 90.0))
            .collect();
        Envelope::new(TrajectorySet::new(records).unwrap(), Metadata::self_report())
    }

    #[test]
    fn test_safe_self_report_needs_no_action() {
        let workflow = NegotiationWorkflow::new(services(50.0, 10));
        let report = workflow.run(report(&[10.0, 20.0])).unwrap();

        assert!(matches!(report.outcome, NegotiationOutcome::NoActionRequired { .. }));
        assert_eq!(report.mutation_count(), None);
        assert!(report.meta().request_id.is_some());
        assert_eq!(report.transitions.len(), 2);
    }

    #[test]
    fn test_single_mutation_resolves_conflict() {
        let workflow = NegotiationWorkflow::new(services(50.0, 10));
        let report = workflow.run(report(&[40.0, 60.0])).unwrap();

        let NegotiationOutcome::Released { set, meta } = &report.outcome else {
            panic!("expected release, got {:?}", report.outcome);
        };
        assert_eq!(meta.mutation_count, Some(1));
        assert_eq!(meta.origin, Some(Origin::System));
        assert_eq!(set.get(UavId(2)).unwrap().speed, 45.0);
        assert!(!set.has_conflicts());

        let path: Vec<_> = report.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                NegotiationState::Threshold,
                NegotiationState::Mutation,
                NegotiationState::Selection,
                NegotiationState::RiskEvaluation,
                NegotiationState::Threshold,
                NegotiationState::Released,
            ]
        );
    }

    #[test]
    fn test_budget_exhaustion_is_rejected() {
        let bus_services = services(1.0, 3);
        let mut events = bus_services.event_bus().subscribe();
        let workflow = NegotiationWorkflow::new(bus_services);

        let report = workflow.run(report(&[40.0, 60.0])).unwrap();
        let NegotiationOutcome::Rejected { meta, reason } = &report.outcome else {
            panic!("expected rejection, got {:?}", report.outcome);
        };
        assert_eq!(meta.mutation_count, Some(3));
        assert!(reason.contains("limit of 3"));

        let mut saw_limit = false;
        while let Ok(event) = events.try_recv() {
            saw_limit |= matches!(event, NegotiationEvent::IterationLimitExceeded { .. });
        }
        assert!(saw_limit);
    }

    #[test]
    fn test_select_rejects_wrong_origin() {
        let services = services(50.0, 10);
        let candidates = vec![report(&[1.0]).trajectory_set().unwrap().clone()];

        let mut meta = Metadata::self_report().with_origin(Origin::System);
        meta.mutation_count = Some(1);
        assert!(matches!(
            services.select(candidates.clone(), &meta),
            Err(StageError::UnexpectedOrigin { .. })
        ));

        let mut in_flight = meta.with_origin(Origin::Mutate);
        in_flight.risk = Some(0.9);
        let (_, next) = services.select(candidates, &in_flight).unwrap();
        assert_eq!(next.origin, Some(Origin::System));
        assert_eq!(next.risk, None);
    }
}
