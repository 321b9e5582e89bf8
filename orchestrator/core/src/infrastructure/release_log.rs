// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! In-process Release Topic
//!
//! Named append-only topics held in memory. A single writer task owns the
//! appends; publishers hand it a message and wait for its acknowledgment, or
//! give up after the flush timeout. Readers get a snapshot of a topic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::domain::release::{DeliveryReport, PublishError, ReleasePublisher};
use crate::domain::trajectory::TrajectoryRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseMessage {
    pub offset: u64,
    /// JSON list of released records
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

struct PublishRequest {
    topic: String,
    payload: serde_json::Value,
    records: usize,
    ack: oneshot::Sender<DeliveryReport>,
}

type TopicLog = Arc<RwLock<HashMap<String, Vec<ReleaseMessage>>>>;

#[derive(Clone)]
pub struct InProcessReleaseLog {
    sender: mpsc::Sender<PublishRequest>,
    topics: TopicLog,
    flush_timeout: Duration,
}

impl InProcessReleaseLog {
    /// Create the log and spawn its writer task on the current runtime.
    pub fn new(flush_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(256);
        let topics: TopicLog = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(Self::run_writer(receiver, topics.clone()));
        Self {
            sender,
            topics,
            flush_timeout,
        }
    }

    async fn run_writer(mut receiver: mpsc::Receiver<PublishRequest>, topics: TopicLog) {
        while let Some(request) = receiver.recv().await {
            let report = {
                let mut topics = topics.write();
                let log = topics.entry(request.topic.clone()).or_default();
                let offset = log.len() as u64;
                let published_at = Utc::now();
                log.push(ReleaseMessage {
                    offset,
                    payload: request.payload,
                    published_at,
                });
                DeliveryReport {
                    topic: request.topic,
                    offset,
                    records: request.records,
                    delivered_at: published_at,
                }
            };
            debug!(topic = %report.topic, offset = report.offset, "Release appended");
            // the publisher may have timed out already
            let _ = request.ack.send(report);
        }
        debug!("Release log writer stopped");
    }

    /// Snapshot of a topic, oldest first.
    pub fn read(&self, topic: &str) -> Vec<ReleaseMessage> {
        self.topics.read().get(topic).cloned().unwrap_or_default()
    }

    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ReleasePublisher for InProcessReleaseLog {
    async fn publish(
        &self,
        topic: &str,
        records: &[TrajectoryRecord],
    ) -> Result<DeliveryReport, PublishError> {
        let payload = serde_json::to_value(records)?;
        let (ack, delivered) = oneshot::channel();

        self.sender
            .send(PublishRequest {
                topic: topic.to_string(),
                payload,
                records: records.len(),
                ack,
            })
            .await
            .map_err(|_| PublishError::Closed(topic.to_string()))?;

        match tokio::time::timeout(self.flush_timeout, delivered).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(_)) => Err(PublishError::Closed(topic.to_string())),
            Err(_) => {
                warn!(topic, timeout = ?self.flush_timeout, "Release not confirmed before flush timeout");
                Err(PublishError::FlushTimeout {
                    topic: topic.to_string(),
                    timeout: self.flush_timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trajectory::MutationCase;

    #[tokio::test]
    async fn test_publish_waits_for_delivery() {
        let log = InProcessReleaseLog::new(Duration::from_secs(1));
        let mut record = TrajectoryRecord::new(7, "quad", 37.5, 10.0);
        record.mark_mutated(MutationCase::TargetedDeescalation);

        let first = log.publish("releases", &[record.clone()]).await.unwrap();
        let second = log.publish("releases", &[]).await.unwrap();

        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(first.records, 1);

        let messages = log.read("releases");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload[0]["uav_id"], 7);
        assert_eq!(messages[0].payload[0]["origin"], "mutate");
        assert!(log.read("other").is_empty());
        assert_eq!(log.topics(), vec!["releases".to_string()]);
    }

    #[tokio::test]
    async fn test_flush_timeout_without_writer() {
        // A writer that never drains its queue
        let (sender, _stalled) = mpsc::channel(4);
        let log = InProcessReleaseLog {
            sender,
            topics: Arc::new(RwLock::new(HashMap::new())),
            flush_timeout: Duration::from_millis(20),
        };

        let result = log.publish("releases", &[]).await;
        assert!(matches!(result, Err(PublishError::FlushTimeout { .. })));
    }

    #[tokio::test]
    async fn test_closed_topic() {
        let (sender, receiver) = mpsc::channel(4);
        drop(receiver);
        let log = InProcessReleaseLog {
            sender,
            topics: Arc::new(RwLock::new(HashMap::new())),
            flush_timeout: Duration::from_millis(20),
        };

        assert!(matches!(
            log.publish("releases", &[]).await,
            Err(PublishError::Closed(_))
        ));
    }
}
