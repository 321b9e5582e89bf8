// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Stage Handlers
//!
//! The seven independently invocable stages of the negotiation cycle. Each
//! handler is stateless apart from the collaborators it was built with: it
//! validates the incoming envelope, does its one job, and hands the result to
//! the next stage through the [`Dispatcher`].
//!
//! | Stage | Accepts | Forwards to |
//! |-------|---------|-------------|
//! | update | records | trigger (`self_report` only) |
//! | trigger | `self_report` meta | risk-eval with recent records |
//! | risk-eval | set | threshold |
//! | threshold | set + risk | release, mutate or nothing |
//! | mutate | set | selector with candidates |
//! | selector | candidates | risk-eval |
//! | release | set (`system`) | topic barrier, then update with the released records |
//!
//! A failed hand-off is logged and reported in the [`StageOutcome`]; it never
//! turns into a stage error.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::application::error::StageError;
use crate::application::negotiation::NegotiationServices;
use crate::domain::dispatch::{DispatchResult, Dispatcher, StageId};
use crate::domain::envelope::{Envelope, EnvelopeError, Metadata, Origin};
use crate::domain::events::NegotiationEvent;
use crate::domain::gate::GateDecision;
use crate::domain::release::{DeliveryReport, ReleasePublisher};
use crate::domain::repository::TrajectoryRepository;
use crate::domain::trajectory::TrajectorySet;

/// What a stage did with an envelope.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub stage: StageId,
    /// Stage the envelope was handed to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<StageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryReport>,
    /// Envelope as forwarded (or as it ended, for terminal stages)
    pub envelope: Envelope,
    pub message: String,
}

impl StageOutcome {
    fn finished(stage: StageId, envelope: Envelope, message: impl Into<String>) -> Self {
        Self {
            stage,
            next: None,
            dispatch: None,
            delivery: None,
            envelope,
            message: message.into(),
        }
    }

    pub fn dispatch_failed(&self) -> bool {
        self.dispatch.as_ref().is_some_and(|d| d.failed)
    }
}

pub struct StageHandlers {
    services: Arc<NegotiationServices>,
    dispatcher: Arc<dyn Dispatcher>,
    repository: Arc<dyn TrajectoryRepository>,
    publisher: Arc<dyn ReleasePublisher>,
    release_topic: String,
    recent_ttl: Duration,
}

impl StageHandlers {
    pub fn new(
        services: Arc<NegotiationServices>,
        dispatcher: Arc<dyn Dispatcher>,
        repository: Arc<dyn TrajectoryRepository>,
        publisher: Arc<dyn ReleasePublisher>,
        release_topic: impl Into<String>,
        recent_ttl: Duration,
    ) -> Self {
        Self {
            services,
            dispatcher,
            repository,
            publisher,
            release_topic: release_topic.into(),
            recent_ttl,
        }
    }

    pub fn services(&self) -> &Arc<NegotiationServices> {
        &self.services
    }

    pub async fn handle(&self, stage: StageId, envelope: Envelope) -> Result<StageOutcome, StageError> {
        let request_id = envelope.meta.request_label().to_string();
        let result = match stage {
            StageId::Update => self.update(envelope).await,
            StageId::Trigger => self.trigger(envelope).await,
            StageId::RiskEval => self.risk_eval(envelope).await,
            StageId::Threshold => self.threshold(envelope).await,
            StageId::Mutate => self.mutate(envelope).await,
            StageId::Selector => self.selector(envelope).await,
            StageId::Release => self.release(envelope).await,
        };

        if let Err(e) = &result {
            error!(
                stage = %stage,
                request_id = %request_id,
                kind = %e.kind(),
                error = %e,
                "Stage failed, nothing forwarded"
            );
        }
        result
    }

    /// Store reported or released records; self-reports start a negotiation.
    ///
    /// Records are stored untagged: conflict flags and mutation provenance
    /// belong to the negotiation that produced them.
    #[instrument(skip_all, fields(request_id = %envelope.meta.request_label()))]
    pub async fn update(&self, envelope: Envelope) -> Result<StageOutcome, StageError> {
        let mut set = envelope.trajectory_set()?.clone();
        let meta = envelope.meta;
        meta.check_state()?;
        let origin = meta.origin()?.clone();
        if origin == Origin::Mutate {
            return Err(StageError::UnexpectedOrigin {
                stage: "update",
                origin: origin.to_string(),
            });
        }

        set.clear_conflicts();
        set.clear_provenance();
        self.repository.store(set.records()).await?;
        info!(records = set.len(), origin = %origin, "Trajectories stored");

        match origin {
            Origin::SelfReport => {
                let forwarded = Envelope::new(TrajectorySet::default(), meta);
                Ok(self
                    .forward(StageId::Update, StageId::Trigger, forwarded, "stored, negotiation triggered")
                    .await)
            }
            _ => Ok(StageOutcome::finished(
                StageId::Update,
                Envelope::new(set, meta),
                "stored",
            )),
        }
    }

    /// Start a negotiation over every recently reported trajectory.
    pub async fn trigger(&self, envelope: Envelope) -> Result<StageOutcome, StageError> {
        let mut meta = envelope.meta;
        meta.check_state()?;
        let origin = meta.origin()?;
        if *origin != Origin::SelfReport {
            return Err(StageError::UnexpectedOrigin {
                stage: "trigger",
                origin: origin.to_string(),
            });
        }

        let request_id = meta.ensure_request_id();
        let recent = self.repository.recent(self.recent_ttl).await?;
        if recent.is_empty() {
            return Err(StageError::NoRecentTrajectories {
                ttl_secs: self.recent_ttl.as_secs(),
            });
        }
        let set = TrajectorySet::new(recent).map_err(EnvelopeError::from)?;

        info!(request_id = %request_id, records = set.len(), "Negotiation triggered");
        Ok(self
            .forward(StageId::Trigger, StageId::RiskEval, Envelope::new(set, meta), "triggered")
            .await)
    }

    pub async fn risk_eval(&self, envelope: Envelope) -> Result<StageOutcome, StageError> {
        let set = envelope.trajectory_set()?.clone();
        let (evaluated, meta) = self.services.evaluate_risk(set, &envelope.meta)?;
        Ok(self
            .forward(
                StageId::RiskEval,
                StageId::Threshold,
                Envelope::new(evaluated, meta),
                "risk evaluated",
            )
            .await)
    }

    pub async fn threshold(&self, envelope: Envelope) -> Result<StageOutcome, StageError> {
        let set = envelope.trajectory_set()?.clone();
        let (status, decision) = self.services.decide(&envelope.meta)?;
        let forwarded = Envelope::new(set, envelope.meta);

        let outcome = match decision {
            GateDecision::Terminate => {
                StageOutcome::finished(StageId::Threshold, forwarded, "safe as reported, no action required")
            }
            GateDecision::Release => {
                self.forward(StageId::Threshold, StageId::Release, forwarded, "safe, releasing")
                    .await
            }
            GateDecision::Mutate => {
                self.forward(StageId::Threshold, StageId::Mutate, forwarded, "unsafe, mutating")
                    .await
            }
        };
        info!(status = ?status, decision = ?decision, "Threshold applied");
        Ok(outcome)
    }

    pub async fn mutate(&self, envelope: Envelope) -> Result<StageOutcome, StageError> {
        let set = envelope.trajectory_set()?.clone();
        let (candidates, meta) = self.services.mutate(&set, &envelope.meta)?;
        Ok(self
            .forward(
                StageId::Mutate,
                StageId::Selector,
                Envelope::candidates(candidates, meta),
                "candidates generated",
            )
            .await)
    }

    pub async fn selector(&self, envelope: Envelope) -> Result<StageOutcome, StageError> {
        let meta = envelope.meta.clone();
        let candidates = envelope.into_candidates()?;
        let (chosen, meta) = self.services.select(candidates, &meta)?;
        Ok(self
            .forward(
                StageId::Selector,
                StageId::RiskEval,
                Envelope::new(chosen, meta),
                "candidate selected",
            )
            .await)
    }

    /// Publish mutated records and wait for the topic before notifying update.
    pub async fn release(&self, envelope: Envelope) -> Result<StageOutcome, StageError> {
        let mut set = envelope.trajectory_set()?.clone();
        let meta = envelope.meta;
        meta.check_state()?;
        let origin = meta.origin()?;
        if *origin != Origin::System {
            return Err(StageError::UnexpectedOrigin {
                stage: "release",
                origin: origin.to_string(),
            });
        }

        set.clear_conflicts();
        let mutated = set.mutated();
        let delivery = self.publisher.publish(&self.release_topic, &mutated).await?;

        info!(
            request_id = %meta.request_label(),
            topic = %delivery.topic,
            offset = delivery.offset,
            records = delivery.records,
            mutation_count = ?meta.mutation_count,
            "Released resolved trajectories"
        );
        self.services.event_bus().publish(NegotiationEvent::Released {
            request_id: meta.request_id.clone(),
            topic: delivery.topic.clone(),
            records: delivery.records,
            mutation_count: meta.mutation_count,
            released_at: Utc::now(),
        });

        // only the released records go back to storage, so unchanged
        // vehicles keep their own report time
        let released = TrajectorySet::new(mutated).map_err(EnvelopeError::from)?;
        let mut outcome = self
            .forward(StageId::Release, StageId::Update, Envelope::new(released, meta), "released")
            .await;
        outcome.delivery = Some(delivery);
        Ok(outcome)
    }

    async fn forward(
        &self,
        from: StageId,
        to: StageId,
        envelope: Envelope,
        message: &str,
    ) -> StageOutcome {
        let result = self.dispatcher.dispatch(to, &envelope).await;
        if result.failed {
            self.report_dispatch_failure(&envelope.meta, &result);
        }

        StageOutcome {
            stage: from,
            next: Some(to),
            dispatch: Some(result),
            delivery: None,
            envelope,
            message: message.to_string(),
        }
    }

    fn report_dispatch_failure(&self, meta: &Metadata, result: &DispatchResult) {
        let detail = result.detail.clone().unwrap_or_default();
        error!(
            request_id = %meta.request_label(),
            stage = %result.stage,
            status = ?result.status,
            detail = %detail,
            "Dispatch failed, not retrying"
        );
        self.services.event_bus().publish(NegotiationEvent::DispatchFailed {
            request_id: meta.request_id.clone(),
            stage: result.stage,
            status: result.status,
            detail,
            failed_at: Utc::now(),
        });
    }
}
