// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the stage pipeline
//!
//! Each stage is invoked by hand with whatever the previous stage dispatched,
//! so the full cycle runs without a network:
//! update -> trigger -> risk-eval -> threshold -> mutate -> selector ->
//! risk-eval -> threshold -> release -> update

use deconflict_core::application::{
    ErrorKind, NegotiationServices, StageError, StageHandlers, StageOutcome,
};
use deconflict_core::domain::config::NegotiatorConfigManifest;
use deconflict_core::domain::dispatch::StageId;
use deconflict_core::domain::envelope::{Envelope, EnvelopeData, Metadata, Origin};
use deconflict_core::domain::events::NegotiationEvent;
use deconflict_core::domain::mutation::MutationError;
use deconflict_core::domain::repository::TrajectoryRepository;
use deconflict_core::domain::selection::SelectionError;
use deconflict_core::domain::trajectory::{Position, TrajectoryRecord, TrajectorySet, UavId};
use deconflict_core::infrastructure::event_bus::EventBus;
use deconflict_core::infrastructure::{
    InMemoryTrajectoryRepository, InProcessReleaseLog, ProjectionOracle, RecordingDispatcher,
};
use std::sync::Arc;
use std::time::Duration;

struct Pipeline {
    handlers: StageHandlers,
    dispatcher: Arc<RecordingDispatcher>,
    repository: Arc<InMemoryTrajectoryRepository>,
    release_log: InProcessReleaseLog,
    event_bus: Arc<EventBus>,
}

fn pipeline() -> Pipeline {
    let config = NegotiatorConfigManifest::default();
    let event_bus = Arc::new(EventBus::with_default_capacity());
    let services = NegotiationServices::from_config(
        &config,
        Arc::new(ProjectionOracle::new()),
        event_bus.clone(),
    )
    .expect("Failed to build services");

    let dispatcher = Arc::new(RecordingDispatcher::new());
    let repository = Arc::new(InMemoryTrajectoryRepository::new());
    let release_log = InProcessReleaseLog::new(Duration::from_secs(2));

    let handlers = StageHandlers::new(
        Arc::new(services),
        dispatcher.clone(),
        repository.clone(),
        Arc::new(release_log.clone()),
        "releases",
        Duration::from_secs(100),
    );

    Pipeline {
        handlers,
        dispatcher,
        repository,
        release_log,
        event_bus,
    }
}

fn crossing_report() -> Envelope {
    let records = vec![
        TrajectoryRecord::new(1, "quad", 10.0, 90.0).with_position(Position {
            x: 0.0,
            y: 0.0,
            altitude: 100.0,
        }),
        TrajectoryRecord::new(2, "quad", 10.0, 0.0).with_position(Position {
            x: 50.0,
            y: -50.0,
            altitude: 100.0,
        }),
    ];
    Envelope::new(TrajectorySet::new(records).unwrap(), Metadata::self_report())
}

impl Pipeline {
    /// Run `stage` and return what it dispatched, checking the destination.
    async fn step(&self, stage: StageId, envelope: Envelope, expected_next: StageId) -> Envelope {
        let outcome = self.handlers.handle(stage, envelope).await.unwrap();
        assert_eq!(outcome.stage, stage);
        assert_eq!(outcome.next, Some(expected_next), "after {}", stage);
        assert!(!outcome.dispatch_failed());

        let (sent_to, sent) = self.dispatcher.last().unwrap();
        assert_eq!(sent_to, expected_next);
        assert_eq!(sent, outcome.envelope);
        sent
    }
}

impl Pipeline {
    /// Trigger over the stored records and drive a one-mutation negotiation
    /// through to release. Returns the release outcome.
    async fn negotiate_once(&self) -> StageOutcome {
        let start = Envelope::new(TrajectorySet::default(), Metadata::self_report());
        let envelope = self.step(StageId::Trigger, start, StageId::RiskEval).await;
        let envelope = self.step(StageId::RiskEval, envelope, StageId::Threshold).await;
        let envelope = self.step(StageId::Threshold, envelope, StageId::Mutate).await;
        let envelope = self.step(StageId::Mutate, envelope, StageId::Selector).await;
        let envelope = self.step(StageId::Selector, envelope, StageId::RiskEval).await;
        let envelope = self.step(StageId::RiskEval, envelope, StageId::Threshold).await;
        let envelope = self.step(StageId::Threshold, envelope, StageId::Release).await;
        let released = self.step(StageId::Release, envelope, StageId::Update).await;

        let outcome = self.handlers.handle(StageId::Update, released).await.unwrap();
        assert_eq!(outcome.next, None);
        outcome
    }
}

fn released_ids(message: &serde_json::Value) -> Vec<u64> {
    message
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["uav_id"].as_u64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_full_cycle_through_stages() {
    let p = pipeline();

    // update stores and triggers with an empty payload
    let envelope = p.step(StageId::Update, crossing_report(), StageId::Trigger).await;
    assert!(envelope.trajectory_set().unwrap().is_empty());
    assert_eq!(p.repository.count().await.unwrap(), 2);

    // trigger assigns the request id and loads recent records
    let envelope = p.step(StageId::Trigger, envelope, StageId::RiskEval).await;
    let request_id = envelope.meta.request_id.clone().unwrap();
    assert_eq!(envelope.trajectory_set().unwrap().len(), 2);

    let envelope = p.step(StageId::RiskEval, envelope, StageId::Threshold).await;
    assert_eq!(envelope.meta.risk, Some(1.0));
    assert_eq!(envelope.trajectory_set().unwrap().flagged().count(), 2);

    let envelope = p.step(StageId::Threshold, envelope, StageId::Mutate).await;

    let envelope = p.step(StageId::Mutate, envelope, StageId::Selector).await;
    assert_eq!(envelope.meta.origin, Some(Origin::Mutate));
    assert_eq!(envelope.meta.mutation_count, Some(1));
    assert!(matches!(envelope.data, EnvelopeData::Candidates(ref c) if c.len() == 1));

    let envelope = p.step(StageId::Selector, envelope, StageId::RiskEval).await;
    assert_eq!(envelope.meta.origin, Some(Origin::System));
    assert_eq!(envelope.meta.risk, None);

    let envelope = p.step(StageId::RiskEval, envelope, StageId::Threshold).await;
    assert_eq!(envelope.meta.risk, Some(0.0));

    let envelope = p.step(StageId::Threshold, envelope, StageId::Release).await;

    let outcome = p.handlers.handle(StageId::Release, envelope).await.unwrap();
    assert_eq!(outcome.next, Some(StageId::Update));
    let delivery = outcome.delivery.clone().unwrap();
    assert_eq!(delivery.topic, "releases");
    assert_eq!(delivery.offset, 0);
    assert_eq!(delivery.records, 1);

    // only the mutated record is released
    let released = p.release_log.read("releases");
    assert_eq!(released.len(), 1);
    let payload = released[0].payload.as_array().unwrap();
    assert_eq!(payload.len(), 1);
    assert_eq!(payload[0]["uav_id"], 2);
    assert_eq!(payload[0]["speed"], 7.5);
    assert_eq!(payload[0]["mutation_cases"], "001");

    // update closes the loop without triggering again
    let dispatched = p.dispatcher.sent().len();
    let outcome = p
        .handlers
        .handle(StageId::Update, outcome.envelope)
        .await
        .unwrap();
    assert_eq!(outcome.next, None);
    assert_eq!(p.dispatcher.sent().len(), dispatched);

    let stored = p.repository.recent(Duration::from_secs(100)).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].uav_id, UavId(2));
    assert_eq!(stored[1].speed, 7.5);
    assert!(stored.iter().all(|r| !r.conflict));
    assert!(stored.iter().all(|r| r.origin.is_none() && r.mutation_cases.is_none()));

    assert_eq!(outcome.envelope.meta.request_id, Some(request_id));
}

#[tokio::test]
async fn test_safe_report_terminates_at_threshold() {
    let p = pipeline();
    let records = vec![
        TrajectoryRecord::new(1, "quad", 10.0, 0.0).with_position(Position {
            x: 0.0,
            y: 0.0,
            altitude: 100.0,
        }),
        TrajectoryRecord::new(2, "quad", 10.0, 0.0).with_position(Position {
            x: 500.0,
            y: 0.0,
            altitude: 100.0,
        }),
    ];
    let envelope = Envelope::new(TrajectorySet::new(records).unwrap(), Metadata::self_report());

    let envelope = p.step(StageId::RiskEval, envelope, StageId::Threshold).await;
    let outcome = p.handlers.handle(StageId::Threshold, envelope).await.unwrap();

    assert_eq!(outcome.next, None);
    assert!(outcome.dispatch.is_none());
    assert!(p.release_log.topics().is_empty());
}

#[tokio::test]
async fn test_dispatch_failure_is_reported_not_raised() {
    let p = pipeline();
    p.dispatcher.fail_stage(StageId::Trigger);
    let mut events = p.event_bus.subscribe();

    let outcome = p
        .handlers
        .handle(StageId::Update, crossing_report())
        .await
        .unwrap();

    assert!(outcome.dispatch_failed());
    assert_eq!(outcome.dispatch.as_ref().unwrap().status, Some(503));
    // the records were stored before the hand-off
    assert_eq!(p.repository.count().await.unwrap(), 2);

    let event = events.try_recv().unwrap();
    assert!(matches!(
        event,
        NegotiationEvent::DispatchFailed {
            stage: StageId::Trigger,
            ..
        }
    ));
}

#[tokio::test]
async fn test_trigger_without_recent_records_is_rejected() {
    let p = pipeline();
    let envelope = Envelope::new(TrajectorySet::default(), Metadata::self_report());

    let err = p.handlers.handle(StageId::Trigger, envelope).await.unwrap_err();
    assert!(matches!(err, StageError::NoRecentTrajectories { ttl_secs: 100 }));
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert!(p.dispatcher.sent().is_empty());
}

#[tokio::test]
async fn test_protocol_violations_forward_nothing() {
    let p = pipeline();

    // candidates in flight never go back to storage
    let mut meta = Metadata::self_report().with_origin(Origin::Mutate);
    meta.mutation_count = Some(1);
    let err = p
        .handlers
        .handle(StageId::Update, Envelope::new(TrajectorySet::default(), meta))
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::UnexpectedOrigin { stage: "update", .. }));

    // a self-report cannot be released
    let err = p
        .handlers
        .handle(StageId::Release, crossing_report())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

    // system origin without a mutation count is an invalid state
    let meta = Metadata::self_report().with_origin(Origin::System);
    let err = p
        .handlers
        .handle(StageId::RiskEval, Envelope::new(TrajectorySet::default(), meta))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMetadata);

    assert!(p.dispatcher.sent().is_empty());
    assert!(p.release_log.topics().is_empty());
}

#[tokio::test]
async fn test_threshold_without_risk_is_invalid() {
    let p = pipeline();
    let err = p
        .handlers
        .handle(StageId::Threshold, crossing_report())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMetadata);
}

#[tokio::test]
async fn test_later_negotiation_releases_only_its_own_mutations() {
    let p = pipeline();

    p.step(StageId::Update, crossing_report(), StageId::Trigger).await;
    p.negotiate_once().await;

    // a third vehicle crosses the path of vehicle 1 further east
    let late = TrajectoryRecord::new(3, "quad", 10.0, 180.0).with_position(Position {
        x: 80.0,
        y: 80.0,
        altitude: 100.0,
    });
    let report = Envelope::new(TrajectorySet::new(vec![late]).unwrap(), Metadata::self_report());
    p.handlers.handle(StageId::Update, report).await.unwrap();
    p.negotiate_once().await;

    let released = p.release_log.read("releases");
    assert_eq!(released.len(), 2);
    assert_eq!(released_ids(&released[0].payload), vec![2]);
    assert_eq!(released_ids(&released[1].payload), vec![3]);
    assert_eq!(released[1].payload[0]["speed"], 7.5);
}

#[tokio::test]
async fn test_release_does_not_refresh_unchanged_vehicles() {
    let p = pipeline();
    let records: Vec<TrajectoryRecord> = crossing_report().trajectory_set().unwrap().clone().into();
    p.repository
        .store_at(&records, chrono::Utc::now() - chrono::Duration::seconds(90))
        .unwrap();

    let outcome = p.negotiate_once().await;
    assert_eq!(outcome.envelope.trajectory_set().unwrap().ids(), vec![UavId(2)]);

    // vehicle 1 was never mutated, so it keeps its 90s old report time
    let fresh = p.repository.recent(Duration::from_secs(60)).await.unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].uav_id, UavId(2));
    assert_eq!(fresh[0].speed, 7.5);
    assert_eq!(p.repository.recent(Duration::from_secs(100)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_selector_rejects_empty_candidate_list() {
    let p = pipeline();
    let envelope =
        Envelope::from_json(br#"{"data": [], "meta": {"origin": "mutate", "mutation_count": 1}}"#)
            .unwrap();

    let err = p.handlers.handle(StageId::Selector, envelope).await.unwrap_err();
    assert!(matches!(
        err,
        StageError::Selection(SelectionError::EmptyCandidateSet)
    ));
    assert!(p.dispatcher.sent().is_empty());
}

#[tokio::test]
async fn test_selector_rejects_plain_set() {
    let p = pipeline();
    let mut meta = Metadata::self_report().with_origin(Origin::Mutate);
    meta.mutation_count = Some(1);
    let set = crossing_report().trajectory_set().unwrap().clone();

    let err = p
        .handlers
        .handle(StageId::Selector, Envelope::new(set, meta))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert!(p.dispatcher.sent().is_empty());
}

#[tokio::test]
async fn test_mutate_rejects_empty_set() {
    let p = pipeline();
    let mut meta = Metadata::self_report();
    meta.risk = Some(0.9);

    let err = p
        .handlers
        .handle(StageId::Mutate, Envelope::new(TrajectorySet::default(), meta))
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::Mutation(MutationError::EmptyInput)));
    assert!(p.dispatcher.sent().is_empty());
}
