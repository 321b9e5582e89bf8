// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Deconflict CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Command implementations and process wiring

pub mod commands;
