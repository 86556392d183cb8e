//! Typed device events and their subscribers.
//!
//! Each subscription owns an unbounded queue, so publishing never waits on a
//! slow consumer. Unsubscribing or closing the bus ends the subscriber's
//! stream after it drains what was already queued.

use crate::service::{DeviceState, Severity, Tilt};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use r10link_protocol::MessageClass;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Events raised by a device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    ReadinessChanged {
        ready: bool,
    },
    StateChanged {
        state: DeviceState,
    },
    Error {
        severity: Severity,
        message: String,
    },
    ShotMetrics {
        metrics: Bytes,
        received_at: DateTime<Utc>,
    },
    BatteryUpdated {
        percent: u8,
    },
    TiltUpdated {
        tilt: Tilt,
    },
    MessageSent {
        class: MessageClass,
        counter: Option<u16>,
        len: usize,
    },
    MessageReceived {
        class: MessageClass,
        counter: Option<u16>,
        len: usize,
    },
    TransportFailed {
        reason: String,
    },
}

impl DeviceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceEvent::ReadinessChanged { .. } => "readiness_changed",
            DeviceEvent::StateChanged { .. } => "state_changed",
            DeviceEvent::Error { .. } => "error",
            DeviceEvent::ShotMetrics { .. } => "shot_metrics",
            DeviceEvent::BatteryUpdated { .. } => "battery_updated",
            DeviceEvent::TiltUpdated { .. } => "tilt_updated",
            DeviceEvent::MessageSent { .. } => "message_sent",
            DeviceEvent::MessageReceived { .. } => "message_received",
            DeviceEvent::TransportFailed { .. } => "transport_failed",
        }
    }
}

/// Receiving end of one subscription.
pub struct EventSubscription {
    pub id: String,
    receiver: mpsc::UnboundedReceiver<DeviceEvent>,
}

impl EventSubscription {
    /// Waits for the next event. Returns `None` once unsubscribed or closed.
    pub async fn recv(&mut self) -> Option<DeviceEvent> {
        self.receiver.recv().await
    }
}

/// Fan-out of device events to subscribers.
pub struct EventBus {
    subscribers: DashMap<String, mpsc::UnboundedSender<DeviceEvent>>,
    closed: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Adds a subscriber. Returns `None` once the bus is closed.
    pub fn subscribe(&self) -> Option<EventSubscription> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }

        let id = format!("sub-{}", uuid::Uuid::new_v4());
        let (tx, receiver) = mpsc::unbounded_channel();
        self.subscribers.insert(id.clone(), tx);
        Some(EventSubscription { id, receiver })
    }

    /// Removes a subscriber.
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.subscribers.remove(id).is_some()
    }

    /// Delivers an event to every subscriber and returns how many got it.
    pub fn publish(&self, event: DeviceEvent) -> usize {
        if self.closed.load(Ordering::SeqCst) {
            return 0;
        }

        let mut delivered = 0;
        // Subscribers that dropped their receiver are pruned here.
        self.subscribers.retain(|_, tx| {
            let alive = tx.send(event.clone()).is_ok();
            delivered += alive as usize;
            alive
        });
        delivered
    }

    /// Drops every subscriber and refuses new ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback interface for event consumers.
pub trait EventObserver: Send + Sync + 'static {
    fn on_event(&self, event: &DeviceEvent);
}

/// Runs `observer` on its own task for every event published on `bus`.
///
/// Returns the subscription id, which unsubscribes the observer, and the
/// task handle. Returns `None` if the bus is closed.
pub fn spawn_observer<O: EventObserver>(
    bus: &EventBus,
    observer: O,
) -> Option<(String, JoinHandle<()>)> {
    let mut subscription = bus.subscribe()?;
    let id = subscription.id.clone();
    let handle = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            observer.on_event(&event);
        }
    });
    Some((id, handle))
}
