//! Auction Engine (§4.3): english, dutch, sealed and continuous auctions
//! sharing one lifecycle and bid ledger.

mod auction;
mod bid;
mod engine;

pub use auction::{Auction, AuctionStatus, AuctionType};
pub use bid::{Bid, BidStatus};
pub use engine::{AuctionEngine, CreateAuctionRequest};
