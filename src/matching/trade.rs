//! Trade model (§3).

use crate::ids::{AgentId, OrderId, ProductId, TradeId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub product_id: ProductId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_id: AgentId,
    pub seller_id: AgentId,
    pub price: Decimal,
    pub quantity: Decimal,
    pub executed_at: DateTime<Utc>,
    /// Per-product sequence number (§5: "Trades emitted within one
    /// critical section are totally ordered and carry increasing sequence
    /// numbers per product").
    pub sequence: u64,
}
