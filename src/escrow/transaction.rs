//! Transaction (escrow) model (§3, §4.4).

use crate::ids::{AgentId, TransactionId};
use crate::money::Currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionSource {
    ListingPurchase,
    OfferAcceptance,
    AuctionWin,
    TaskAssignment,
    OrderbookTrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    EscrowFunded,
    Delivered,
    Completed,
    Disputed,
    Refunded,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Refunded | TransactionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub buyer_id: AgentId,
    pub seller_id: AgentId,
    pub amount: Decimal,
    pub currency: Currency,
    pub source: TransactionSource,
    pub source_id: String,
    pub status: TransactionStatus,
    pub external_payment_ref: Option<String>,
    pub delivery_proof: Option<String>,
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
