// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod http_dispatcher;
pub mod projection_oracle;
pub mod release_log;
pub mod repositories;

pub use event_bus::EventBus;
pub use http_dispatcher::{HttpDispatcher, RecordingDispatcher};
pub use projection_oracle::ProjectionOracle;
pub use release_log::{InProcessReleaseLog, ReleaseMessage};
pub use repositories::InMemoryTrajectoryRepository;
