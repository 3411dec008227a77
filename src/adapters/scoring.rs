//! Scoring adapter (§4.4, non-goals): reputation scoring is explicitly an
//! opaque collaborator — "the spec does not prescribe ... the exact
//! numeric formula of trust/reputation scoring." This trait is the seam;
//! the in-memory impl is a placeholder running average, not a reputation
//! algorithm.

use crate::ids::AgentId;
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;

#[async_trait]
pub trait Scoring: Send + Sync {
    async fn record_rating(&self, agent_id: AgentId, score: u8);
    async fn record_completion(&self, agent_id: AgentId, success: bool);
    /// Read model supplementing §4.4's rating feature: the simple mean of
    /// every score recorded for `agent_id`, or `None` if it has none yet.
    async fn average_rating(&self, agent_id: AgentId) -> Option<Decimal>;
}

#[derive(Default)]
pub struct InMemoryScoring {
    ratings: DashMap<AgentId, Vec<u8>>,
}

impl InMemoryScoring {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Scoring for InMemoryScoring {
    async fn record_rating(&self, agent_id: AgentId, score: u8) {
        self.ratings.entry(agent_id).or_default().push(score);
    }

    async fn record_completion(&self, _agent_id: AgentId, _success: bool) {}

    async fn average_rating(&self, agent_id: AgentId) -> Option<Decimal> {
        let scores = self.ratings.get(&agent_id)?;
        if scores.is_empty() {
            return None;
        }
        let sum: u32 = scores.iter().map(|&s| s as u32).sum();
        Some(Decimal::from(sum) / Decimal::from(scores.len()))
    }
}
