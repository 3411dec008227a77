//! Auction model (§3).

use crate::ids::{AgentId, AuctionId, BidId};
use crate::money::Currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionType {
    English,
    Dutch,
    Sealed,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionStatus {
    Scheduled,
    Active,
    Ended,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub id: AuctionId,
    pub seller_id: AgentId,
    pub auction_type: AuctionType,
    pub title: String,
    pub starting_price: Decimal,
    pub current_price: Decimal,
    pub reserve_price: Option<Decimal>,
    pub buy_now_price: Option<Decimal>,
    pub currency: Currency,
    pub min_increment: Option<Decimal>,
    pub price_decrement: Option<Decimal>,
    pub decrement_interval_seconds: Option<i64>,
    pub status: AuctionStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub extension_seconds: i64,
    pub winning_bid_id: Option<BidId>,
    pub winner_id: Option<AgentId>,
    pub bid_count: u32,
    pub metadata: Value,
}

impl Auction {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, AuctionStatus::Ended | AuctionStatus::Cancelled)
    }
}
