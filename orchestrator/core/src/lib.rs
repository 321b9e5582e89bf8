// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Deconflict core: negotiation of conflict-free UAV trajectories.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, negotiation services, reference adapters and
//!   the HTTP stage surface

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
