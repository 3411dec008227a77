//! Opaque 128-bit identifiers (§3, §6).
//!
//! Every entity id in the system is one of these: a 128-bit value rendered
//! in the canonical 8-4-4-4-12 hex form. We piggyback on [`Uuid`] for both
//! the bit layout and the display form rather than hand-rolling either.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(Uuid);

impl Id {
    pub fn new() -> Self {
        Id(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Id(Uuid::nil())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

impl From<Uuid> for Id {
    fn from(u: Uuid) -> Self {
        Id(u)
    }
}

impl std::str::FromStr for Id {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Id(Uuid::parse_str(s)?))
    }
}

/// Typed id aliases keep the adapter and coordinator signatures honest
/// about which entity an id refers to without introducing a family of
/// near-identical newtypes.
pub type AgentId = Id;
pub type OrderId = Id;
pub type TradeId = Id;
pub type ProductId = Id;
pub type AuctionId = Id;
pub type BidId = Id;
pub type TransactionId = Id;
pub type TaskId = Id;
pub type CapabilityId = Id;
pub type EventId = Id;
pub type WebhookId = Id;
pub type RatingId = Id;
