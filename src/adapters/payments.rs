//! Payments adapter (§6, §4.4): two-phase hold/capture/refund. Out of
//! scope to implement a real gateway integration — this is a contract plus
//! an in-memory reference good for tests.

use crate::error::Result;
use crate::ids::AgentId;
use crate::money::Money;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Opaque reference to a held authorization, returned by `hold` and
/// consumed by `capture`/`release`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HoldRef(pub String);

#[async_trait]
pub trait Payments: Send + Sync {
    /// Two-phase authorization: hold funds without capturing them.
    async fn hold(&self, buyer_id: AgentId, amount: Money) -> Result<HoldRef>;
    /// Capture a previously held amount, crediting the seller (minus the
    /// platform fee, withheld separately by the caller before routing).
    async fn capture(&self, hold: &HoldRef, seller_id: AgentId, amount: Money) -> Result<()>;
    /// Release a hold without capturing (refund path).
    async fn release(&self, hold: &HoldRef) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryPayments {
    holds: Mutex<HashMap<String, (AgentId, Money, bool)>>,
    next_id: Mutex<u64>,
}

impl InMemoryPayments {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Payments for InMemoryPayments {
    async fn hold(&self, buyer_id: AgentId, amount: Money) -> Result<HoldRef> {
        let mut next_id = self.next_id.lock();
        *next_id += 1;
        let id = format!("hold_{}", *next_id);
        self.holds.lock().insert(id.clone(), (buyer_id, amount, false));
        Ok(HoldRef(id))
    }

    async fn capture(&self, hold: &HoldRef, _seller_id: AgentId, _amount: Money) -> Result<()> {
        let mut holds = self.holds.lock();
        if let Some(entry) = holds.get_mut(&hold.0) {
            entry.2 = true;
        }
        Ok(())
    }

    async fn release(&self, hold: &HoldRef) -> Result<()> {
        self.holds.lock().remove(&hold.0);
        Ok(())
    }
}
