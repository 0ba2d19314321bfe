//! Fan-out notification channel between operations and external observers.
//!
//! Best effort: only subscribers attached at publish time see an event, a slow
//! subscriber loses old events instead of blocking the publisher or its peers.

use crate::domain::{Event, Topic};
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

/// Default number of events buffered per subscriber before it starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

pub struct EventBus {
    tx: broadcast::Sender<Event>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Stamp and deliver an event. Never fails; returns how many subscribers it reached.
    pub fn publish(&self, topic: Topic, payload: Value) -> usize {
        let event = Event {
            topic,
            payload,
            timestamp: Utc::now(),
        };
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                debug!(%topic, "event published with no subscribers");
                0
            }
        }
    }

    /// Attach a subscriber. `filter == None` receives every topic.
    pub fn subscribe(&self, filter: Option<Topic>) -> Subscription {
        Subscription {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            filter,
            rx: self.tx.subscribe(),
        }
    }

    /// Detach a subscriber. Dropping the subscription has the same effect.
    pub fn unsubscribe(&self, subscription: Subscription) {
        debug!(subscription = subscription.id, "subscriber detached");
        drop(subscription);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live subscription. Yields events published after it was created.
pub struct Subscription {
    id: u64,
    filter: Option<Topic>,
    rx: broadcast::Receiver<Event>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn filter(&self) -> Option<Topic> {
        self.filter
    }

    fn wants(&self, event: &Event) -> bool {
        self.filter.is_none_or(|t| t == event.topic)
    }

    /// Next matching event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(subscription = self.id, skipped, "subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(subscription = self.id, skipped, "subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Raw receiver for stream adapters (SSE). Topic filtering is up to the caller.
    pub fn into_receiver(self) -> broadcast::Receiver<Event> {
        self.rx
    }
}
