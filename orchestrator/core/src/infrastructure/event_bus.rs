// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Event Bus Implementation - Pub/Sub for Negotiation Events
//!
//! In-memory event streaming using tokio broadcast channels. Events are lost
//! on restart and when a slow receiver lags; negotiation correctness never
//! depends on them.

use crate::domain::envelope::RequestId;
use crate::domain::events::NegotiationEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to negotiation events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<NegotiationEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: NegotiationEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is subscribed
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all negotiation events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for a single negotiation
    pub fn subscribe_request(&self, request_id: RequestId) -> RequestEventReceiver {
        RequestEventReceiver {
            receiver: self.sender.subscribe(),
            request_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all negotiation events
pub struct EventReceiver {
    receiver: broadcast::Receiver<NegotiationEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<NegotiationEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<NegotiationEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for a single request's events (filtered)
pub struct RequestEventReceiver {
    receiver: broadcast::Receiver<NegotiationEvent>,
    request_id: RequestId,
}

impl RequestEventReceiver {
    /// Receive the next event carrying this receiver's request id
    pub async fn recv(&mut self) -> Result<NegotiationEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.request_id() == Some(&self.request_id) {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dispatch::StageId;
    use chrono::Utc;

    fn dispatch_failed(request_id: &str) -> NegotiationEvent {
        NegotiationEvent::DispatchFailed {
            request_id: Some(RequestId::from(request_id)),
            stage: StageId::Trigger,
            status: Some(503),
            detail: "unavailable".to_string(),
            failed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(dispatch_failed("req-1"));

        match receiver.recv().await.unwrap() {
            NegotiationEvent::DispatchFailed { stage, status, .. } => {
                assert_eq!(stage, StageId::Trigger);
                assert_eq!(status, Some(503));
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_event_filtering() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_request(RequestId::from("ours"));

        event_bus.publish(dispatch_failed("theirs"));
        event_bus.publish(dispatch_failed("ours"));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.request_id(), Some(&RequestId::from("ours")));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let event_bus = EventBus::default();
        event_bus.publish(dispatch_failed("nobody"));
        assert_eq!(event_bus.subscriber_count(), 0);

        let mut receiver = event_bus.subscribe();
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }
}
