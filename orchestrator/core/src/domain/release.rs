// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Release broadcast contract.
//!
//! Releasing a resolved set publishes its mutated records to a named topic.
//! `publish` returns only once the topic confirmed delivery or the flush
//! timeout elapsed, which is what makes release a barrier for the next stage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::trajectory::TrajectoryRecord;

pub const DEFAULT_RELEASE_TOPIC: &str = "releases";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub topic: String,
    /// Position of the message in the topic log
    pub offset: u64,
    pub records: usize,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("topic '{topic}' did not confirm delivery within {timeout:?}")]
    FlushTimeout { topic: String, timeout: Duration },
    #[error("topic '{0}' is closed")]
    Closed(String),
    #[error("failed to encode release payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait ReleasePublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        records: &[TrajectoryRecord],
    ) -> Result<DeliveryReport, PublishError>;
}
