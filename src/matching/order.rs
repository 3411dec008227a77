//! Order model (§3).

use crate::ids::{AgentId, OrderId, ProductId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub agent_id: AgentId,
    pub product_id: ProductId,
    pub side: Side,
    pub order_type: OrderType,
    /// Required for limit orders, absent for market orders (§3).
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    /// Monotone per-product sequence assigned at acceptance, breaking ties
    /// when two orders share a `created_at` (§4.2 "Tie-breaking").
    pub sequence: u64,
}

impl Order {
    pub fn new(
        agent_id: AgentId,
        product_id: ProductId,
        side: Side,
        order_type: OrderType,
        price: Option<Decimal>,
        quantity: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Order {
            id: OrderId::new(),
            agent_id,
            product_id,
            side,
            order_type,
            price,
            quantity,
            filled_quantity: Decimal::ZERO,
            status: OrderStatus::Open,
            created_at,
            sequence: 0,
        }
    }

    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn is_resting(&self) -> bool {
        matches!(self.status, OrderStatus::Open | OrderStatus::Partial)
    }

    /// Applies a fill, updating `filled_quantity` and `status` per the
    /// invariant: `status = filled <=> filled_quantity = quantity`.
    pub fn apply_fill(&mut self, qty: Decimal) {
        self.filled_quantity += qty;
        if self.filled_quantity >= self.quantity {
            self.status = OrderStatus::Filled;
        } else if self.filled_quantity > Decimal::ZERO {
            self.status = OrderStatus::Partial;
        }
    }
}
