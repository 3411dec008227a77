//! Notifier adapter (§6): an external collaborator for out-of-band
//! notifications (e.g. push/email) that sits alongside the Event Fabric's
//! own webhook/real-time sinks. Contract only; the in-memory impl just
//! records what it was asked to send, for test assertions.

use crate::error::Result;
use crate::ids::AgentId;
use async_trait::async_trait;
use parking_lot::Mutex;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, agent_id: AgentId, message: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<(AgentId, String)>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(AgentId, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, agent_id: AgentId, message: &str) -> Result<()> {
        self.sent.lock().push((agent_id, message.to_string()));
        Ok(())
    }
}
