//! Event Fabric (§4.1): durable event log + in-memory topic bus + HMAC
//! webhook dispatcher with retry. Every core writes through here; external
//! consumers subscribe through here. Fan-out failures to one sink never
//! affect the others (§4.1 "Failure semantics"), and persistence failures
//! never block the caller of `Publish`.

pub mod bus;
pub mod event;
pub mod webhook;

pub use bus::{AgentSubscription, EventBus, ScopeSubscription};
pub use event::{extract_audience, Event};
pub use webhook::{sign_body, verify_signature, WebhookSubscription};

use crate::adapters::Persistence;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;
use crate::ids::{AgentId, EventId, WebhookId};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, warn};
use webhook::{apply_outcome, WebhookDispatcher};

#[derive(Clone)]
pub struct EventFabric {
    persistence: Arc<dyn Persistence>,
    bus: EventBus,
    dispatcher: Arc<WebhookDispatcher>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl EventFabric {
    pub fn new(persistence: Arc<dyn Persistence>, clock: Arc<dyn Clock>, config: Arc<Config>) -> Self {
        let dispatcher = Arc::new(WebhookDispatcher::new(
            config.webhook_timeout(),
            config.webhook_max_retries,
            std::time::Duration::from_secs(config.webhook_backoff_base_secs),
        ));
        Self {
            persistence,
            bus: EventBus::new(config.event_bus_capacity),
            dispatcher,
            clock,
            config,
        }
    }

    /// §4.1 `Publish`: assigns id/created_at if absent (here: always
    /// assigned by the caller supplying only type+payload), persists
    /// against every agent in the audience, writes the durable log, then
    /// fans out. Re-publishing a previously seen event id (SPEC_FULL.md §5
    /// idempotency) is observable as a no-op — the event is neither
    /// re-logged nor re-delivered.
    pub async fn publish(&self, event_type: impl Into<String>, payload: Value) -> Result<Event> {
        let event = Event::new(event_type, payload, self.clock.now());
        self.publish_event(event).await
    }

    pub async fn publish_with_id(&self, id: EventId, event_type: impl Into<String>, payload: Value) -> Result<Event> {
        let mut event = Event::new(event_type, payload, self.clock.now());
        event.id = id;
        self.publish_event(event).await
    }

    async fn publish_event(&self, event: Event) -> Result<Event> {
        if self.persistence.event_seen(event.id).await.unwrap_or(false) {
            return Ok(event);
        }

        // §4.1: "Event persistence failures do not block the caller of
        // Publish; the implementation logs and proceeds with fan-out."
        if let Err(err) = self.persistence.append_event(event.clone()).await {
            warn!(event_id = %event.id, error = %err, "event persistence failed, continuing with fan-out");
        }

        let shared = Arc::new(event.clone());
        self.bus.publish(shared.clone());
        self.dispatch_webhooks(shared).await;

        Ok(event)
    }

    /// §4.1 `BroadcastScope`: publishes without a specific audience, for
    /// topic subscribers (e.g. all watchers of one product's order book).
    pub async fn broadcast_scope(&self, scope_key: impl Into<String>, event_type: impl Into<String>, payload: Value) -> Result<Event> {
        let event = Event::scoped(scope_key, event_type, payload, self.clock.now());
        if let Err(err) = self.persistence.append_event(event.clone()).await {
            warn!(event_id = %event.id, error = %err, "scoped event persistence failed, continuing with fan-out");
        }
        self.bus.publish(Arc::new(event.clone()));
        Ok(event)
    }

    pub fn subscribe(&self, agent_id: AgentId) -> AgentSubscription {
        self.bus.subscribe_agent(agent_id)
    }

    pub fn subscribe_scope(&self, scope_key: impl Into<String>) -> ScopeSubscription {
        self.bus.subscribe_scope(scope_key)
    }

    pub async fn activity_log(&self, agent_id: AgentId) -> Result<Vec<Event>> {
        self.persistence.activity_log(agent_id).await
    }

    pub async fn register_webhook(
        &self,
        agent_id: AgentId,
        url: String,
        secret: String,
        event_type_filter: BTreeSet<String>,
    ) -> Result<WebhookSubscription> {
        let webhook = WebhookSubscription::new(agent_id, url, secret, event_type_filter);
        self.persistence.save_webhook(webhook.clone()).await?;
        Ok(webhook)
    }

    pub async fn delete_webhook(&self, id: WebhookId) -> Result<()> {
        self.persistence.delete_webhook(id).await
    }

    pub async fn set_webhook_active(&self, id: WebhookId, active: bool) -> Result<()> {
        if let Some(mut webhook) = self.persistence.get_webhook(id).await? {
            webhook.is_active = active;
            self.persistence.save_webhook(webhook).await?;
        }
        Ok(())
    }

    /// Fans out to every active webhook subscribed to this event's type,
    /// running each delivery (with its own retry loop) concurrently and
    /// independently — one webhook's failure never affects another's
    /// (§4.1).
    async fn dispatch_webhooks(&self, event: Arc<Event>) {
        let webhooks = match self.persistence.webhooks_for_event_type(&event.event_type).await {
            Ok(list) => list,
            Err(err) => {
                error!(error = %err, "failed to list webhooks for event type");
                return;
            }
        };

        for mut webhook in webhooks {
            let dispatcher = self.dispatcher.clone();
            let persistence = self.persistence.clone();
            let event = event.clone();
            let now = self.clock.now();
            let threshold = self.config.webhook_auto_deactivate_threshold;
            tokio::spawn(async move {
                let outcome = dispatcher.deliver(&webhook, &event).await;
                match outcome {
                    Ok(outcome) => {
                        apply_outcome(&mut webhook, &outcome, now, threshold);
                    }
                    Err(err) => {
                        error!(webhook_id = %webhook.id, error = %err, "webhook dispatch internal error");
                        webhook.failure_count += 1;
                    }
                }
                if let Err(err) = persistence.save_webhook(webhook).await {
                    error!(error = %err, "failed to persist webhook delivery outcome");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryPersistence;
    use crate::clock::SystemClock;

    fn fabric() -> EventFabric {
        EventFabric::new(InMemoryPersistence::new(), Arc::new(SystemClock), Arc::new(Config::default()))
    }

    #[tokio::test]
    async fn publish_extracts_audience_and_persists_activity() {
        let fabric = fabric();
        let buyer = AgentId::new();
        let event = fabric
            .publish("order.placed", serde_json::json!({"agent_id": buyer.to_string()}))
            .await
            .unwrap();
        assert_eq!(event.agent_audience, vec![buyer]);

        let activity = fabric.activity_log(buyer).await.unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].id, event.id);
    }

    #[tokio::test]
    async fn republishing_same_id_is_a_noop() {
        let fabric = fabric();
        let buyer = AgentId::new();
        let id = EventId::new();
        fabric
            .publish_with_id(id, "order.placed", serde_json::json!({"agent_id": buyer.to_string()}))
            .await
            .unwrap();
        fabric
            .publish_with_id(id, "order.placed", serde_json::json!({"agent_id": buyer.to_string()}))
            .await
            .unwrap();

        let activity = fabric.activity_log(buyer).await.unwrap();
        assert_eq!(activity.len(), 1);
    }
}
