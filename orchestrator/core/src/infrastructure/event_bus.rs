// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for attack lifecycle events
//
// In-memory fan-out over a tokio broadcast channel. Feeds the SSE endpoint
// and any in-process observer. Events are not persisted.

use crate::domain::attack::AttackId;
use crate::domain::events::AttackEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AttackEvent>>,
}

impl EventBus {
    /// Capacity is how many events a slow subscriber may fall behind before
    /// it starts losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, event: AttackEvent) {
        debug!(event = event.name(), attack_id = %event.attack_id(), "Publishing event");
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of a single attack.
    pub fn subscribe_attack(&self, attack_id: AttackId) -> AttackEventReceiver {
        AttackEventReceiver {
            receiver: self.sender.subscribe(),
            attack_id,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
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

pub struct EventReceiver {
    receiver: broadcast::Receiver<AttackEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<AttackEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }
}

pub struct AttackEventReceiver {
    receiver: broadcast::Receiver<AttackEvent>,
    attack_id: AttackId,
}

impl AttackEventReceiver {
    /// Next event for this attack; events of other attacks are skipped.
    pub async fn recv(&mut self) -> Result<AttackEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.attack_id() == self.attack_id {
                return Ok(event);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
