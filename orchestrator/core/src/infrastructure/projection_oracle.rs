// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Straight-line Projection Oracle
//!
//! Reference [`ConflictOracle`]: every vehicle keeps its speed and heading for
//! `num_steps` intervals. For each pair within vertical separation the closest
//! horizontal approach `d_min` gives a score `1 - d_min / (2 * horizontal)`
//! clamped to `[0, 1]`, so a breach of horizontal separation scores strictly
//! above 0.5. Risk is the highest pair score; both vehicles of a breaching
//! pair are flagged.
//!
//! Headings are compass degrees: 0 north, 90 east.

use std::collections::BTreeSet;
use tracing::trace;

use crate::domain::envelope::RiskScore;
use crate::domain::oracle::{ConflictOracle, OracleError, OracleReport, SeparationParams};
use crate::domain::trajectory::{Position, TrajectoryRecord, TrajectorySet, UavId};

#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectionOracle;

impl ProjectionOracle {
    pub fn new() -> Self {
        Self
    }

    fn project(record: &TrajectoryRecord, origin: Position, t: f64) -> (f64, f64) {
        let heading = record.direction.to_radians();
        let distance = record.speed * t;
        (
            origin.x + distance * heading.sin(),
            origin.y + distance * heading.cos(),
        )
    }

    /// Closest horizontal approach of two vehicles over the projection window.
    fn min_distance(
        a: (&TrajectoryRecord, Position),
        b: (&TrajectoryRecord, Position),
        params: &SeparationParams,
    ) -> f64 {
        (0..=params.num_steps)
            .map(|step| {
                let t = step as f64 * params.time_interval_s;
                let (ax, ay) = Self::project(a.0, a.1, t);
                let (bx, by) = Self::project(b.0, b.1, t);
                (ax - bx).hypot(ay - by)
            })
            .fold(f64::INFINITY, f64::min)
    }

    pub fn pair_score(d_min: f64, params: &SeparationParams) -> f64 {
        (1.0 - d_min / (2.0 * params.horizontal_separation)).clamp(0.0, 1.0)
    }
}

impl ConflictOracle for ProjectionOracle {
    fn evaluate(
        &self,
        set: &TrajectorySet,
        params: &SeparationParams,
    ) -> Result<OracleReport, OracleError> {
        let positioned = set
            .records()
            .iter()
            .map(|record| {
                record
                    .position
                    .map(|position| (record, position))
                    .ok_or(OracleError::MissingPosition(record.uav_id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut risk: f64 = 0.0;
        let mut flagged: BTreeSet<UavId> = BTreeSet::new();

        for (i, a) in positioned.iter().enumerate() {
            for b in &positioned[i + 1..] {
                if (a.1.altitude - b.1.altitude).abs() >= params.vertical_separation {
                    continue;
                }
                let d_min = Self::min_distance(*a, *b, params);
                let score = Self::pair_score(d_min, params);
                trace!(a = %a.0.uav_id, b = %b.0.uav_id, d_min, score, "Pair projected");

                risk = risk.max(score);
                if d_min < params.horizontal_separation {
                    flagged.insert(a.0.uav_id);
                    flagged.insert(b.0.uav_id);
                }
            }
        }

        Ok(OracleReport {
            risk: RiskScore::new(risk).map_err(|_| OracleError::InvalidRisk(risk))?,
            flagged: flagged.into_iter().collect(),
        })
    }
}
