// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts, defined in the domain layer and implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Stores | Implementations |
//! |-------|--------|-----------------|
//! | `TrajectoryRepository` | latest `TrajectoryRecord` per `uav_id` | `InMemoryTrajectoryRepository` |
//!
//! Persistence is last-write-wins per vehicle. No stronger guarantee is made.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::trajectory::TrajectoryRecord;

#[async_trait]
pub trait TrajectoryRepository: Send + Sync {
    /// Store records, replacing any previous record for the same `uav_id`.
    ///
    /// Records must arrive with their conflict flag cleared.
    async fn store(&self, records: &[TrajectoryRecord]) -> Result<(), RepositoryError>;

    /// Records written within `ttl`, ordered by `uav_id`.
    async fn recent(&self, ttl: Duration) -> Result<Vec<TrajectoryRecord>, RepositoryError>;

    async fn count(&self) -> Result<usize, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Refusing to store flagged trajectory for uav {0}")]
    FlaggedRecord(u64),

    #[error("Storage error: {0}")]
    Storage(String),
}
