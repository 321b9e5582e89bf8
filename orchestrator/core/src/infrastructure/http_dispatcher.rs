// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP Stage Dispatcher
//!
//! Posts envelopes to `{base_url}{stage path}`. Only the acknowledgment is
//! inspected: a 2xx status means the next stage accepted the envelope,
//! anything else (including transport errors) is a failed dispatch. There is
//! no retry.
//!
//! # Headers
//!
//! - `x-async: true` - ask the stage to answer `202 Accepted` before processing
//! - `idempotency-key: {request_id}:{stage}` - lets a receiver drop duplicates

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::config::DispatchConfig;
use crate::domain::dispatch::{
    DispatchResult, Dispatcher, StageId, ASYNC_HEADER, IDEMPOTENCY_HEADER,
};
use crate::domain::envelope::Envelope;

pub struct HttpDispatcher {
    client: Client,
    base_url: String,
    async_header: bool,
}

impl HttpDispatcher {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        async_header: bool,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            async_header,
        })
    }

    pub fn from_config(config: &DispatchConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.base_url.clone(), config.timeout, config.async_header)
    }

    fn build_url(&self, stage: StageId) -> String {
        format!("{}{}", self.base_url, stage.path())
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, stage: StageId, envelope: &Envelope) -> DispatchResult {
        let url = self.build_url(stage);
        let mut request = self.client.post(&url).json(envelope);
        if self.async_header {
            request = request.header(ASYNC_HEADER, "true");
        }
        if let Some(request_id) = &envelope.meta.request_id {
            request = request.header(IDEMPOTENCY_HEADER, format!("{}:{}", request_id, stage));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(stage = %stage, status = response.status().as_u16(), "Envelope dispatched");
                DispatchResult::accepted(stage, Some(response.status().as_u16()))
            }
            Ok(response) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("HTTP {}", status));
                warn!(stage = %stage, status = status.as_u16(), url = %url, "Stage rejected envelope");
                DispatchResult::failed(stage, Some(status.as_u16()), body)
            }
            Err(e) => {
                warn!(stage = %stage, url = %url, error = %e, "Could not reach stage");
                DispatchResult::failed(stage, None, e.to_string())
            }
        }
    }
}

/// Keeps every dispatched envelope in memory instead of sending it.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<(StageId, Envelope)>>,
    failing: Mutex<HashSet<StageId>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report dispatches to `stage` as failed (they are still recorded).
    pub fn fail_stage(&self, stage: StageId) {
        self.failing.lock().insert(stage);
    }

    pub fn sent(&self) -> Vec<(StageId, Envelope)> {
        self.sent.lock().clone()
    }

    pub fn last(&self) -> Option<(StageId, Envelope)> {
        self.sent.lock().last().cloned()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, stage: StageId, envelope: &Envelope) -> DispatchResult {
        self.sent.lock().push((stage, envelope.clone()));
        if self.failing.lock().contains(&stage) {
            DispatchResult::failed(stage, Some(503), "stage unavailable")
        } else {
            DispatchResult::accepted(stage, None)
        }
    }
}
