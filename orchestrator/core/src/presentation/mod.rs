// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`deconflict-core`)
//!
//! HTTP surface that translates requests into stage handler calls. No
//! negotiation logic lives here; all real work is delegated to
//! `crate::application`.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | Stage endpoints, in-process negotiation, release log, health |

pub mod api;
