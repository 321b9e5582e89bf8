// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Iteration Guard
//!
//! Bounded-retry policy for the negotiation loop. Every mutation cycle must
//! pass through [`IterationGuard::advance`], which is the only place
//! `mutation_count` is written. Because the count travels inside the envelope,
//! the bound holds no matter which process handles which cycle.
//!
//! ## Decision Table
//! | origin | mutation_count | Result |
//! |--------|----------------|--------|
//! | `self_report` | absent | count = 1 |
//! | `system` | n < max | count = n + 1 |
//! | `system` | n >= max | `LimitExceeded` (terminal) |
//! | anything else | | `InvalidMutationState` |

use thiserror::Error;

use crate::domain::envelope::{Metadata, Origin};

pub const DEFAULT_MAX_MUTATIONS: u32 = 100;

#[derive(Debug, Error, PartialEq)]
pub enum IterationError {
    #[error("trajectory mutated {mutation_count} times; limit of {max_mutations} reached, negotiation abandoned")]
    LimitExceeded {
        mutation_count: u32,
        max_mutations: u32,
    },
    #[error("invalid mutation state: origin '{origin}' with mutation_count {mutation_count:?}")]
    InvalidMutationState {
        origin: String,
        mutation_count: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct IterationGuard {
    max_mutations: u32,
}

impl IterationGuard {
    pub fn new(max_mutations: u32) -> Self {
        Self { max_mutations }
    }

    pub fn max_mutations(&self) -> u32 {
        self.max_mutations
    }

    /// Return the metadata for the next mutation cycle.
    ///
    /// The input is left untouched; callers replace their copy only when the
    /// cycle is allowed to proceed.
    pub fn advance(&self, meta: &Metadata) -> Result<Metadata, IterationError> {
        let next_count = match (meta.origin.as_ref(), meta.mutation_count) {
            (Some(Origin::System), Some(count)) => {
                if count >= self.max_mutations {
                    return Err(IterationError::LimitExceeded {
                        mutation_count: count,
                        max_mutations: self.max_mutations,
                    });
                }
                count + 1
            }
            (Some(Origin::SelfReport), None) => 1,
            (origin, mutation_count) => {
                return Err(IterationError::InvalidMutationState {
                    origin: origin.map(|o| o.to_string()).unwrap_or_else(|| "<missing>".to_string()),
                    mutation_count,
                })
            }
        };

        let mut next = meta.clone();
        next.mutation_count = Some(next_count);
        Ok(next)
    }

    /// Cycles still allowed for this metadata.
    pub fn remaining(&self, meta: &Metadata) -> u32 {
        self.max_mutations
            .saturating_sub(meta.mutation_count.unwrap_or(0))
    }
}

impl Default for IterationGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MUTATIONS)
    }
}
