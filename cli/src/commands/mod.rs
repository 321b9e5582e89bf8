// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Deconflict CLI

pub mod config;
pub mod negotiate;
pub mod serve;
pub mod submit;

pub use self::config::ConfigCommand;
