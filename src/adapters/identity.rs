//! Identity adapter (§6): "Cores do not parse headers; the transport layer
//! resolves API key -> agent via the Identity adapter before invoking a
//! core." Out of scope to implement a real session/API-key store; the
//! cores only ever see an already-validated [`crate::ids::AgentId`]. This
//! trait exists so a transport layer has a documented seam to plug into,
//! and so tests can assert an agent is known/active without the cores
//! depending on any concrete identity store.

use crate::error::Result;
use crate::ids::AgentId;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::RwLock;

#[async_trait]
pub trait Identity: Send + Sync {
    async fn is_known_agent(&self, agent_id: AgentId) -> Result<bool>;
}

#[derive(Default)]
pub struct InMemoryIdentity {
    known: RwLock<HashSet<AgentId>>,
}

impl InMemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent_id: AgentId) {
        self.known.write().unwrap().insert(agent_id);
    }
}

#[async_trait]
impl Identity for InMemoryIdentity {
    async fn is_known_agent(&self, agent_id: AgentId) -> Result<bool> {
        Ok(self.known.read().unwrap().contains(&agent_id))
    }
}
