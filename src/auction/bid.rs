//! Bid model (§3).

use crate::ids::{AgentId, AuctionId, BidId};
use crate::money::Currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BidStatus {
    Active,
    Outbid,
    Winning,
    Won,
    Lost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub auction_id: AuctionId,
    pub bidder_id: AgentId,
    pub amount: Decimal,
    pub currency: Currency,
    pub is_sealed: bool,
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
}

impl Bid {
    /// §4.3 sealed: "Bid amounts MUST be hidden from queries by
    /// non-bidders until auction ended." Returns a copy with the amount
    /// zeroed out when the viewer has no right to see it yet.
    pub fn redacted_for(&self, viewer: AgentId, auction_ended: bool) -> Bid {
        let mut visible = self.clone();
        if self.is_sealed && !auction_ended && viewer != self.bidder_id {
            visible.amount = Decimal::ZERO;
        }
        visible
    }
}
