//! Capability adapter (§4.5, §6, glossary): "A declared, schema-validated
//! unit of work an executor can perform." The registration and discovery
//! of capabilities is out of scope (agent registration primitives); this
//! module only specifies what the Task Coordinator needs to read from one.

use crate::error::Result;
use crate::ids::{AgentId, CapabilityId};
use crate::money::Money;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone)]
pub struct CapabilityRecord {
    pub id: CapabilityId,
    pub agent_id: AgentId,
    pub status: CapabilityStatus,
    pub accepting_tasks: bool,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
    /// If set, `progress` events must carry one of these names (§4.5).
    pub status_events: Option<Vec<String>>,
    pub base_fee: Money,
}

/// SPEC_FULL.md §5: the coordinator computes price through an explicit
/// pricing hook rather than hard-coding `base_fee`, so alternative pricing
/// (e.g. tiered, metered) can be layered in without touching the
/// coordinator. The only implementation shipped here is the fixed-fee
/// default the spec names.
pub trait PricingStrategy: Send + Sync {
    fn price_for(&self, capability: &CapabilityRecord) -> Money;
}

pub struct FixedFeePricing;

impl PricingStrategy for FixedFeePricing {
    fn price_for(&self, capability: &CapabilityRecord) -> Money {
        capability.base_fee
    }
}

#[async_trait]
pub trait CapabilityLookup: Send + Sync {
    async fn get(&self, id: CapabilityId) -> Result<Option<CapabilityRecord>>;
    /// §4.5 transition table: "update capability stats with success/failure".
    /// The actual reputation math is delegated to the Scoring adapter; this
    /// just records which outcome to feed it.
    async fn record_outcome(&self, id: CapabilityId, success: bool) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryCapabilities {
    records: RwLock<HashMap<CapabilityId, CapabilityRecord>>,
    outcomes: RwLock<HashMap<CapabilityId, (u64, u64)>>,
}

impl InMemoryCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, record: CapabilityRecord) {
        self.records.write().insert(record.id, record);
    }

    pub fn outcomes_for(&self, id: CapabilityId) -> (u64, u64) {
        self.outcomes.read().get(&id).copied().unwrap_or((0, 0))
    }
}

#[async_trait]
impl CapabilityLookup for InMemoryCapabilities {
    async fn get(&self, id: CapabilityId) -> Result<Option<CapabilityRecord>> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn record_outcome(&self, id: CapabilityId, success: bool) -> Result<()> {
        let mut outcomes = self.outcomes.write();
        let entry = outcomes.entry(id).or_insert((0, 0));
        if success {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
        Ok(())
    }
}
