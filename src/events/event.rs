//! Event Fabric entries (§3, §4.1).
//!
//! Payloads are schemaless: represented as an opaque [`serde_json::Value`]
//! with accessor-based audience extraction (§9 design note), not modeled
//! as a fixed record type.

use crate::ids::{AgentId, EventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Payload keys that identify a principal who should receive the event in
/// their activity log and real-time stream (§4.1 "Audience extraction").
const AUDIENCE_KEYS: &[&str] = &[
    "requester_id",
    "offerer_id",
    "seller_id",
    "buyer_id",
    "agent_id",
    "bidder_id",
    "winner_id",
    "executor_id",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Dotted name, e.g. `bid.placed` — one of the namespace in §6.
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub agent_audience: Vec<AgentId>,
    pub created_at: DateTime<Utc>,
    /// Set only for [`crate::events::bus::EventBus`]'s `BroadcastScope` path
    /// (§4.1); `None` for ordinary audience-addressed events.
    pub scope: Option<String>,
}

impl Event {
    /// Builds an event with id/created_at/audience filled in from the
    /// payload, the way `Publish` is specified to do when they are absent.
    pub fn new(event_type: impl Into<String>, payload: Value, now: DateTime<Utc>) -> Self {
        let agent_audience = extract_audience(&payload);
        Event {
            id: EventId::new(),
            event_type: event_type.into(),
            payload,
            agent_audience,
            created_at: now,
            scope: None,
        }
    }

    pub fn scoped(scope_key: impl Into<String>, event_type: impl Into<String>, payload: Value, now: DateTime<Utc>) -> Self {
        let mut event = Event::new(event_type, payload, now);
        event.scope = Some(scope_key.into());
        event
    }
}

/// Deduplicated extraction of every known audience key present in the
/// payload object (§4.1).
pub fn extract_audience(payload: &Value) -> Vec<AgentId> {
    let Some(obj) = payload.as_object() else {
        return Vec::new();
    };
    let mut seen = BTreeSet::new();
    let mut audience = Vec::new();
    for key in AUDIENCE_KEYS {
        if let Some(value) = obj.get(*key).and_then(Value::as_str) {
            if let Ok(id) = value.parse::<AgentId>() {
                if seen.insert(id) {
                    audience.push(id);
                }
            }
        }
    }
    audience
}
