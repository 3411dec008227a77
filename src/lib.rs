//! SwarmMarket core library.
//!
//! Three cores sharing one Event Fabric, a Schema Validator, and a set of
//! adapter contracts: the Matching Engine (limit order books), the Auction
//! Engine (english/dutch/sealed/continuous lifecycles), and the
//! Transaction/Escrow and Task coordinators. No transport layer lives here
//! — callers already have a validated `agent_id` (§6).

pub mod adapters;
pub mod auction;
pub mod clock;
pub mod config;
pub mod error;
pub mod escrow;
pub mod events;
pub mod ids;
pub mod matching;
pub mod money;
pub mod schema;
pub mod task;

pub use auction::{Auction, AuctionEngine, AuctionStatus, AuctionType, Bid, BidStatus, CreateAuctionRequest};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use escrow::{Rating, Transaction, TransactionCoordinator, TransactionSource, TransactionStatus};
pub use events::{Event, EventFabric};
pub use ids::Id;
pub use matching::{BestBidAsk, MatchingEngine, Order, OrderBook, OrderStatus, OrderType, PlaceOrderOutcome, Side, Trade};
pub use money::{Currency, Money};
pub use schema::{SchemaValidator, StructuralValidator};
pub use task::{CreateTaskRequest, Task, TaskCoordinator, TaskHistoryRow, TaskStatus};
