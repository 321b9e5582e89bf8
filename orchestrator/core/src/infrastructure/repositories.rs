// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! In-memory implementation of [`TrajectoryRepository`]: one slot per
//! `uav_id`, last write wins, entries older than the requested window are
//! ignored on read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::repository::{RepositoryError, TrajectoryRepository};
use crate::domain::trajectory::{TrajectoryRecord, UavId};

#[derive(Debug, Clone)]
struct StoredTrajectory {
    record: TrajectoryRecord,
    stored_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct InMemoryTrajectoryRepository {
    trajectories: Arc<RwLock<HashMap<UavId, StoredTrajectory>>>,
}

impl InMemoryTrajectoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with an explicit write time, as when replaying older reports.
    pub fn store_at(
        &self,
        records: &[TrajectoryRecord],
        stored_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if let Some(flagged) = records.iter().find(|r| r.conflict) {
            return Err(RepositoryError::FlaggedRecord(flagged.uav_id.0));
        }

        let mut trajectories = self.trajectories.write();
        for record in records {
            trajectories.insert(
                record.uav_id,
                StoredTrajectory {
                    record: record.clone(),
                    stored_at,
                },
            );
        }
        Ok(())
    }
}

#[async_trait]
impl TrajectoryRepository for InMemoryTrajectoryRepository {
    async fn store(&self, records: &[TrajectoryRecord]) -> Result<(), RepositoryError> {
        self.store_at(records, Utc::now())
    }

    async fn recent(&self, ttl: Duration) -> Result<Vec<TrajectoryRecord>, RepositoryError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| RepositoryError::Storage(format!("invalid ttl: {}", e)))?;
        let cutoff = Utc::now() - ttl;

        let trajectories = self.trajectories.read();
        let mut recent: Vec<TrajectoryRecord> = trajectories
            .values()
            .filter(|stored| stored.stored_at >= cutoff)
            .map(|stored| stored.record.clone())
            .collect();
        recent.sort_by_key(|r| r.uav_id);
        Ok(recent)
    }

    async fn count(&self) -> Result<usize, RepositoryError> {
        Ok(self.trajectories.read().len())
    }
}
