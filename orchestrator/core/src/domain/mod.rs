// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: negotiation value objects, policies and the contracts of
//! external collaborators.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Envelope model, gate, iteration guard, mutation and
//!   selection policies; oracle, dispatch, storage and release interfaces

pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod events;
pub mod gate;
pub mod iteration;
pub mod mutation;
pub mod oracle;
pub mod release;
pub mod repository;
pub mod selection;
pub mod trajectory;
