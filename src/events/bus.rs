//! Real-time fan-out sink (§4.1 sink (a), §5).
//!
//! Grounded on the teacher's own use of `tokio::sync::broadcast` for
//! real-time WebSocket fan-out in `main.rs`. `broadcast` already gives us
//! exactly the semantics §5 asks for: "non-blocking hand-off queues per
//! subscriber (bounded; full queues drop the oldest buffered event for
//! that subscriber, which must tolerate at-least-once with possible
//! coalescing)" — a slow `Receiver` that falls behind gets
//! `RecvError::Lagged(n)` instead of blocking the publisher, which is
//! precisely "drop the oldest buffered event(s) and carry on".

use crate::events::event::Event;
use crate::ids::AgentId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishers never block on a slow subscriber; `send` only fails when
    /// there are zero receivers, which is not an error for a fan-out sink.
    pub fn publish(&self, event: Arc<Event>) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe_agent(&self, agent_id: AgentId) -> AgentSubscription {
        AgentSubscription {
            agent_id,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscribe_scope(&self, scope_key: impl Into<String>) -> ScopeSubscription {
        ScopeSubscription {
            scope_key: scope_key.into(),
            receiver: self.sender.subscribe(),
        }
    }
}

/// Per-agent real-time subscription (§4.1 `Subscribe`). Delivery is
/// at-least-once; within one `(agent_id, type)` pair, order follows
/// publish order because `broadcast` preserves FIFO order per receiver
/// modulo lag-induced drops.
pub struct AgentSubscription {
    agent_id: AgentId,
    receiver: broadcast::Receiver<Arc<Event>>,
}

impl AgentSubscription {
    /// Waits for the next event addressed to this agent, silently
    /// coalescing past a lag gap rather than surfacing it as an error.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.agent_audience.contains(&self.agent_id) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(agent_id = %self.agent_id, skipped, "subscriber lagged, coalescing");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub struct ScopeSubscription {
    scope_key: String,
    receiver: broadcast::Receiver<Arc<Event>>,
}

impl ScopeSubscription {
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.scope.as_deref() == Some(self.scope_key.as_str()) => {
                    return Some(event)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(scope = %self.scope_key, skipped, "scope subscriber lagged, coalescing");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn delivers_only_to_addressed_agent() {
        let bus = EventBus::new(16);
        let alice = AgentId::new();
        let bob = AgentId::new();
        let mut alice_sub = bus.subscribe_agent(alice);
        let mut bob_sub = bus.subscribe_agent(bob);

        let event = Arc::new(Event::new(
            "order.placed",
            serde_json::json!({"agent_id": alice.to_string()}),
            Utc::now(),
        ));
        bus.publish(event.clone());

        let received = alice_sub.recv().await.unwrap();
        assert_eq!(received.id, event.id);

        // bob never receives it; prove by publishing a second event bob
        // *is* addressed to and checking that's the first thing he sees.
        let bob_event = Arc::new(Event::new(
            "order.placed",
            serde_json::json!({"agent_id": bob.to_string()}),
            Utc::now(),
        ));
        bus.publish(bob_event.clone());
        let received = bob_sub.recv().await.unwrap();
        assert_eq!(received.id, bob_event.id);
    }

    #[tokio::test]
    async fn scope_subscription_matches_scope_key() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe_scope("product:abc");
        let event = Arc::new(Event::scoped(
            "product:abc",
            "order.placed",
            serde_json::json!({}),
            Utc::now(),
        ));
        bus.publish(event.clone());
        let received = sub.recv().await.unwrap();
        assert_eq!(received.id, event.id);
    }
}
