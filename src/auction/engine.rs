//! Auction Engine (§4.3): lifecycle and bid ledger for the four auction
//! types. One critical section per auction id covers `PlaceBid` and
//! `EndAuction` (§5); since auction state lives behind the [`Persistence`]
//! adapter rather than in memory, the critical section is realized as a
//! per-id `tokio::sync::Mutex` held across the read-check-write step,
//! mirroring the `parking_lot` per-product locks in the matching engine but
//! async because persistence calls may suspend.

use crate::adapters::Persistence;
use crate::auction::auction::{Auction, AuctionStatus, AuctionType};
use crate::auction::bid::{Bid, BidStatus};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::EventFabric;
use crate::ids::{AgentId, AuctionId, BidId};
use crate::money::Currency;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct AuctionEngine {
    persistence: Arc<dyn Persistence>,
    events: EventFabric,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    locks: DashMap<AuctionId, Arc<Mutex<()>>>,
}

pub struct CreateAuctionRequest {
    pub seller_id: AgentId,
    pub auction_type: AuctionType,
    pub title: String,
    pub starting_price: Decimal,
    pub reserve_price: Option<Decimal>,
    pub buy_now_price: Option<Decimal>,
    pub currency: Currency,
    pub min_increment: Option<Decimal>,
    pub price_decrement: Option<Decimal>,
    pub decrement_interval_seconds: Option<i64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: DateTime<Utc>,
    pub extension_seconds: Option<i64>,
    pub metadata: Value,
}

impl AuctionEngine {
    pub fn new(persistence: Arc<dyn Persistence>, events: EventFabric, clock: Arc<dyn Clock>, config: Arc<Config>) -> Self {
        Self {
            persistence,
            events,
            clock,
            config,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, id: AuctionId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// §4.3 "Creation".
    pub async fn create_auction(&self, req: CreateAuctionRequest) -> Result<Auction> {
        if req.starting_price <= Decimal::ZERO {
            return Err(Error::invalid_input("/starting_price", "must be positive"));
        }
        let now = self.clock.now();
        if req.ends_at <= now {
            return Err(Error::invalid_input("/ends_at", "must be in the future"));
        }
        if req.auction_type == AuctionType::Dutch
            && (req.price_decrement.is_none() || req.decrement_interval_seconds.is_none())
        {
            return Err(Error::invalid_input(
                "/price_decrement",
                "dutch auctions require price_decrement and decrement_interval_seconds",
            ));
        }

        let starts_at = req.starts_at.unwrap_or(now);
        let status = if starts_at > now {
            AuctionStatus::Scheduled
        } else {
            AuctionStatus::Active
        };

        let auction = Auction {
            id: AuctionId::new(),
            seller_id: req.seller_id,
            auction_type: req.auction_type,
            title: req.title,
            starting_price: req.starting_price,
            current_price: req.starting_price,
            reserve_price: req.reserve_price,
            buy_now_price: req.buy_now_price,
            currency: req.currency,
            min_increment: req.min_increment,
            price_decrement: req.price_decrement,
            decrement_interval_seconds: req.decrement_interval_seconds,
            status,
            starts_at,
            ends_at: req.ends_at,
            extension_seconds: req.extension_seconds.unwrap_or(self.config.auction_default_extension_secs),
            winning_bid_id: None,
            winner_id: None,
            bid_count: 0,
            metadata: req.metadata,
        };

        self.persistence.save_auction(auction.clone()).await?;
        if auction.status == AuctionStatus::Active {
            self.events
                .publish(
                    "auction.started",
                    json!({"auction_id": auction.id.to_string(), "seller_id": auction.seller_id.to_string()}),
                )
                .await?;
        }
        Ok(auction)
    }

    /// Clock-triggered activation: an external scheduler calls this once
    /// `starts_at` has elapsed, mirroring [`AuctionEngine::end_auction_if_elapsed`]
    /// (§3 "status transitions are monotone except scheduled→active is
    /// time-triggered"). A no-op if the auction is not scheduled or has not
    /// yet reached `starts_at`.
    pub async fn activate_if_due(&self, auction_id: AuctionId) -> Result<Option<Auction>> {
        let lock = self.lock_for(auction_id);
        let _guard = lock.lock().await;

        let mut auction = self.persistence.get_auction(auction_id).await?.ok_or(Error::NotFound)?;
        if auction.status != AuctionStatus::Scheduled || self.clock.now() < auction.starts_at {
            return Ok(None);
        }

        auction.status = AuctionStatus::Active;
        self.persistence.save_auction(auction.clone()).await?;
        self.events
            .publish(
                "auction.started",
                json!({"auction_id": auction.id.to_string(), "seller_id": auction.seller_id.to_string()}),
            )
            .await?;
        Ok(Some(auction))
    }

    /// §4.3 `PlaceBid`.
    pub async fn place_bid(&self, auction_id: AuctionId, bidder_id: AgentId, amount: Decimal, currency: Currency) -> Result<Bid> {
        let lock = self.lock_for(auction_id);
        let _guard = lock.lock().await;

        let mut auction = self
            .persistence
            .get_auction(auction_id)
            .await?
            .ok_or(Error::NotFound)?;

        if auction.status != AuctionStatus::Active {
            return Err(Error::invalid_state(format!("{:?}", auction.status), "place_bid"));
        }
        let now = self.clock.now();
        if now >= auction.ends_at {
            return Err(Error::invalid_state("active", "place_bid (ended)"));
        }
        if bidder_id == auction.seller_id {
            return Err(Error::NotAuthorized);
        }
        if amount <= Decimal::ZERO {
            return Err(Error::invalid_input("/amount", "must be positive"));
        }
        if currency != auction.currency {
            return Err(Error::invalid_input("/currency", "does not match auction currency"));
        }

        let active_bids = self.active_bids(auction_id).await?;
        let highest_active = active_bids
            .iter()
            .max_by(|a, b| a.amount.cmp(&b.amount).then(b.created_at.cmp(&a.created_at)))
            .cloned();

        match auction.auction_type {
            AuctionType::English => {
                let minimum = match &highest_active {
                    None => auction.starting_price,
                    Some(top) => top.amount + auction.min_increment.unwrap_or(Decimal::ONE),
                };
                if amount < minimum {
                    return Err(Error::invalid_input("/amount", format!("must be at least {minimum}")));
                }
                self.outbid_all(&active_bids).await?;

                let bid = self.record_bid(&auction, bidder_id, amount, currency, false, BidStatus::Active).await?;
                auction.current_price = amount;
                auction.bid_count += 1;
                let extended = auction.ends_at - now < chrono::Duration::seconds(auction.extension_seconds);
                if extended {
                    auction.ends_at = now + chrono::Duration::seconds(auction.extension_seconds);
                }
                self.persistence.save_auction(auction.clone()).await?;

                self.events
                    .publish(
                        "bid.placed",
                        json!({"auction_id": auction.id.to_string(), "bidder_id": bidder_id.to_string(), "amount": amount.to_string()}),
                    )
                    .await?;
                if extended {
                    self.events
                        .publish(
                            "auction.ending_soon",
                            json!({
                                "auction_id": auction.id.to_string(),
                                "seller_id": auction.seller_id.to_string(),
                                "ends_at": auction.ends_at.to_rfc3339(),
                            }),
                        )
                        .await?;
                }
                if let Some(previous) = highest_active {
                    self.events
                        .publish(
                            "bid.outbid",
                            json!({"auction_id": auction.id.to_string(), "agent_id": previous.bidder_id.to_string()}),
                        )
                        .await?;
                }
                Ok(bid)
            }
            AuctionType::Continuous => {
                let minimum = match &highest_active {
                    None => auction.starting_price,
                    Some(top) => top.amount,
                };
                if highest_active.is_some() && amount <= minimum {
                    return Err(Error::invalid_input("/amount", format!("must strictly exceed {minimum}")));
                }
                self.outbid_all(&active_bids).await?;

                let bid = self.record_bid(&auction, bidder_id, amount, currency, false, BidStatus::Active).await?;
                auction.current_price = amount;
                auction.bid_count += 1;
                self.persistence.save_auction(auction.clone()).await?;

                self.events
                    .publish(
                        "bid.placed",
                        json!({"auction_id": auction.id.to_string(), "bidder_id": bidder_id.to_string(), "amount": amount.to_string()}),
                    )
                    .await?;
                Ok(bid)
            }
            AuctionType::Sealed => {
                let bid = self.record_bid(&auction, bidder_id, amount, currency, true, BidStatus::Active).await?;
                auction.bid_count += 1;
                self.persistence.save_auction(auction.clone()).await?;
                self.events
                    .publish(
                        "bid.placed",
                        json!({"auction_id": auction.id.to_string(), "bidder_id": bidder_id.to_string()}),
                    )
                    .await?;
                Ok(bid)
            }
            AuctionType::Dutch => {
                let current = dutch_current_price(&auction, now);
                if amount < current {
                    return Err(Error::invalid_input("/amount", format!("must be at least the current descending price {current}")));
                }
                let bid = self.record_bid(&auction, bidder_id, amount, currency, false, BidStatus::Won).await?;
                auction.current_price = current;
                auction.bid_count += 1;
                auction.status = AuctionStatus::Ended;
                auction.winning_bid_id = Some(bid.id);
                auction.winner_id = Some(bidder_id);
                self.persistence.save_auction(auction.clone()).await?;

                self.events
                    .publish(
                        "auction.ended",
                        json!({
                            "auction_id": auction.id.to_string(),
                            "winner_id": bidder_id.to_string(),
                            "final_price": current.to_string(),
                        }),
                    )
                    .await?;
                Ok(bid)
            }
        }
    }

    /// §4.3 "Ending an auction", caller-invoked path (seller calls
    /// `EndAuction`); the clock-triggered path uses the same body via
    /// [`AuctionEngine::end_auction_if_elapsed`].
    pub async fn end_auction(&self, auction_id: AuctionId, caller_id: AgentId) -> Result<Auction> {
        let lock = self.lock_for(auction_id);
        let _guard = lock.lock().await;

        let auction = self.persistence.get_auction(auction_id).await?.ok_or(Error::NotFound)?;
        if auction.status != AuctionStatus::Active {
            return Err(Error::invalid_state(format!("{:?}", auction.status), "end_auction"));
        }
        if caller_id != auction.seller_id {
            return Err(Error::NotAuthorized);
        }
        self.settle(auction).await
    }

    /// Clock-triggered ending: an external scheduler calls this once
    /// `ends_at` has elapsed (§4.3, §6 "an optional scheduler"). A no-op if
    /// the auction is not active or has not yet reached `ends_at`.
    pub async fn end_auction_if_elapsed(&self, auction_id: AuctionId) -> Result<Option<Auction>> {
        let lock = self.lock_for(auction_id);
        let _guard = lock.lock().await;

        let auction = self.persistence.get_auction(auction_id).await?.ok_or(Error::NotFound)?;
        if auction.status != AuctionStatus::Active || self.clock.now() < auction.ends_at {
            return Ok(None);
        }
        Ok(Some(self.settle(auction).await?))
    }

    async fn settle(&self, mut auction: Auction) -> Result<Auction> {
        let active_bids = self.active_bids(auction.id).await?;
        let winner = active_bids
            .iter()
            .max_by(|a, b| a.amount.cmp(&b.amount).then(b.created_at.cmp(&a.created_at)))
            .cloned();

        auction.status = AuctionStatus::Ended;

        match winner {
            Some(bid) if auction.reserve_price.map(|r| bid.amount >= r).unwrap_or(true) => {
                auction.winning_bid_id = Some(bid.id);
                auction.winner_id = Some(bid.bidder_id);
                auction.current_price = bid.amount;

                let mut won_bid = bid.clone();
                won_bid.status = BidStatus::Won;
                self.persistence.save_bid(won_bid).await?;

                for other in active_bids.into_iter().filter(|b| b.id != bid.id) {
                    let mut lost = other;
                    lost.status = BidStatus::Lost;
                    self.persistence.save_bid(lost).await?;
                }

                self.persistence.save_auction(auction.clone()).await?;
                self.events
                    .publish(
                        "auction.ended",
                        json!({
                            "auction_id": auction.id.to_string(),
                            "winner_id": bid.bidder_id.to_string(),
                            "final_price": bid.amount.to_string(),
                            "met_reserve": true,
                        }),
                    )
                    .await?;
            }
            _ => {
                for other in active_bids {
                    let mut lost = other;
                    lost.status = BidStatus::Lost;
                    self.persistence.save_bid(lost).await?;
                }
                self.persistence.save_auction(auction.clone()).await?;
                self.events
                    .publish(
                        "auction.ended",
                        json!({"auction_id": auction.id.to_string(), "met_reserve": false}),
                    )
                    .await?;
            }
        }

        Ok(auction)
    }

    /// §4.3 sealed bids: amounts are hidden from non-bidders until the
    /// auction has ended.
    pub async fn list_bids(&self, auction_id: AuctionId, viewer: AgentId) -> Result<Vec<Bid>> {
        let auction = self.persistence.get_auction(auction_id).await?.ok_or(Error::NotFound)?;
        let ended = auction.is_terminal();
        let bids = self.persistence.bids_for_auction(auction_id).await?;
        Ok(bids.into_iter().map(|b| b.redacted_for(viewer, ended)).collect())
    }

    async fn active_bids(&self, auction_id: AuctionId) -> Result<Vec<Bid>> {
        Ok(self
            .persistence
            .bids_for_auction(auction_id)
            .await?
            .into_iter()
            .filter(|b| b.status == BidStatus::Active)
            .collect())
    }

    async fn outbid_all(&self, bids: &[Bid]) -> Result<()> {
        for bid in bids {
            let mut outbid = bid.clone();
            outbid.status = BidStatus::Outbid;
            self.persistence.save_bid(outbid).await?;
        }
        Ok(())
    }

    async fn record_bid(
        &self,
        auction: &Auction,
        bidder_id: AgentId,
        amount: Decimal,
        currency: Currency,
        is_sealed: bool,
        status: BidStatus,
    ) -> Result<Bid> {
        let bid = Bid {
            id: BidId::new(),
            auction_id: auction.id,
            bidder_id,
            amount,
            currency,
            is_sealed,
            status,
            created_at: self.clock.now(),
        };
        self.persistence.save_bid(bid.clone()).await?;
        Ok(bid)
    }
}

/// §4.3 dutch: "Current descending price at now (computed lazily from
/// starting_price − floor((now−starts_at)/interval)·decrement, floored at
/// 0)". Open question (DESIGN.md): no background ticker recomputes this;
/// it is derived on read and persisted back only on `PlaceBid`/`EndAuction`.
fn dutch_current_price(auction: &Auction, now: DateTime<Utc>) -> Decimal {
    let interval = auction.decrement_interval_seconds.unwrap_or(1).max(1);
    let decrement = auction.price_decrement.unwrap_or(Decimal::ZERO);
    let elapsed = (now - auction.starts_at).num_seconds().max(0);
    let steps = Decimal::from(elapsed / interval);
    (auction.starting_price - steps * decrement).max(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryPersistence;
    use crate::clock::FakeClock;
    use rust_decimal_macros::dec;

    fn harness() -> (AuctionEngine, Arc<FakeClock>, AgentId) {
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let config = Arc::new(Config::default());
        let persistence = InMemoryPersistence::new();
        let events = EventFabric::new(persistence.clone(), clock.clone(), config.clone());
        let engine = AuctionEngine::new(persistence, events, clock.clone(), config);
        (engine, clock, AgentId::new())
    }

    fn req(seller: AgentId, auction_type: AuctionType, ends_in_secs: i64, now: DateTime<Utc>) -> CreateAuctionRequest {
        CreateAuctionRequest {
            seller_id: seller,
            auction_type,
            title: "widget".into(),
            starting_price: dec!(10),
            reserve_price: None,
            buy_now_price: None,
            currency: Currency::usd(),
            min_increment: None,
            price_decrement: Some(dec!(1)),
            decrement_interval_seconds: Some(60),
            starts_at: None,
            ends_at: now + chrono::Duration::seconds(ends_in_secs),
            extension_seconds: None,
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn english_auction_tracks_highest_bid_and_outbids_previous() {
        let (engine, clock, seller) = harness();
        let auction = engine.create_auction(req(seller, AuctionType::English, 120, clock.now())).await.unwrap();

        let alice = AgentId::new();
        let bob = AgentId::new();
        engine.place_bid(auction.id, alice, dec!(10), Currency::usd()).await.unwrap();
        let bob_bid = engine.place_bid(auction.id, bob, dec!(11), Currency::usd()).await.unwrap();

        let bids = engine.list_bids(auction.id, seller).await.unwrap();
        let alice_bid = bids.iter().find(|b| b.bidder_id == alice).unwrap();
        assert_eq!(alice_bid.status, BidStatus::Outbid);
        assert_eq!(bob_bid.status, BidStatus::Active);
    }

    #[tokio::test]
    async fn english_bid_extends_ends_at_near_close() {
        let (engine, clock, seller) = harness();
        let auction = engine.create_auction(req(seller, AuctionType::English, 30, clock.now())).await.unwrap();
        let original_end = auction.ends_at;

        let bidder = AgentId::new();
        engine.place_bid(auction.id, bidder, dec!(10), Currency::usd()).await.unwrap();

        let reloaded = engine.persistence.get_auction(auction.id).await.unwrap().unwrap();
        assert!(reloaded.ends_at > original_end);
    }

    #[tokio::test]
    async fn dutch_first_bid_wins_immediately() {
        let (engine, clock, seller) = harness();
        let auction = engine.create_auction(req(seller, AuctionType::Dutch, 3600, clock.now())).await.unwrap();

        let buyer = AgentId::new();
        let bid = engine.place_bid(auction.id, buyer, dec!(10), Currency::usd()).await.unwrap();
        assert_eq!(bid.status, BidStatus::Won);

        let reloaded = engine.persistence.get_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, AuctionStatus::Ended);
        assert_eq!(reloaded.winner_id, Some(buyer));
    }

    #[tokio::test]
    async fn sealed_bids_are_hidden_from_non_bidders_until_ended() {
        let (engine, clock, seller) = harness();
        let auction = engine.create_auction(req(seller, AuctionType::Sealed, 120, clock.now())).await.unwrap();

        let bidder = AgentId::new();
        let observer = AgentId::new();
        engine.place_bid(auction.id, bidder, dec!(50), Currency::usd()).await.unwrap();

        let visible_to_observer = engine.list_bids(auction.id, observer).await.unwrap();
        assert_eq!(visible_to_observer[0].amount, Decimal::ZERO);

        let visible_to_bidder = engine.list_bids(auction.id, bidder).await.unwrap();
        assert_eq!(visible_to_bidder[0].amount, dec!(50));

        engine.end_auction(auction.id, seller).await.unwrap();
        let visible_after_end = engine.list_bids(auction.id, observer).await.unwrap();
        assert_eq!(visible_after_end[0].amount, dec!(50));
    }

    #[tokio::test]
    async fn reserve_not_met_ends_without_winner() {
        let (engine, clock, seller) = harness();
        let mut request = req(seller, AuctionType::English, 120, clock.now());
        request.reserve_price = Some(dec!(1000));
        let auction = engine.create_auction(request).await.unwrap();

        let bidder = AgentId::new();
        engine.place_bid(auction.id, bidder, dec!(20), Currency::usd()).await.unwrap();
        let ended = engine.end_auction(auction.id, seller).await.unwrap();

        assert_eq!(ended.status, AuctionStatus::Ended);
        assert!(ended.winner_id.is_none());
    }

    #[tokio::test]
    async fn scheduled_auction_activates_once_starts_at_elapses() {
        let (engine, clock, seller) = harness();
        let mut request = req(seller, AuctionType::English, 120, clock.now());
        request.starts_at = Some(clock.now() + chrono::Duration::seconds(30));
        let auction = engine.create_auction(request).await.unwrap();
        assert_eq!(auction.status, AuctionStatus::Scheduled);

        let bidder = AgentId::new();
        assert!(matches!(
            engine.place_bid(auction.id, bidder, dec!(10), Currency::usd()).await,
            Err(Error::InvalidState { .. })
        ));
        assert!(engine.activate_if_due(auction.id).await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(31));
        let activated = engine.activate_if_due(auction.id).await.unwrap().unwrap();
        assert_eq!(activated.status, AuctionStatus::Active);

        let bid = engine.place_bid(auction.id, bidder, dec!(10), Currency::usd()).await.unwrap();
        assert_eq!(bid.status, BidStatus::Active);
    }

    #[tokio::test]
    async fn bid_inside_extension_window_emits_ending_soon() {
        let (engine, clock, seller) = harness();
        let auction = engine.create_auction(req(seller, AuctionType::English, 30, clock.now())).await.unwrap();
        let mut ending_soon = engine.events.subscribe(seller);

        let bidder = AgentId::new();
        engine.place_bid(auction.id, bidder, dec!(10), Currency::usd()).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                let event = ending_soon.recv().await.unwrap();
                if event.event_type == "auction.ending_soon" {
                    return event;
                }
            }
        })
        .await
        .expect("auction.ending_soon was not published");
        assert_eq!(event.payload["auction_id"], json!(auction.id.to_string()));
    }

    #[tokio::test]
    async fn seller_cannot_bid_on_own_auction() {
        let (engine, clock, seller) = harness();
        let auction = engine.create_auction(req(seller, AuctionType::English, 120, clock.now())).await.unwrap();
        assert!(matches!(
            engine.place_bid(auction.id, seller, dec!(20), Currency::usd()).await,
            Err(Error::NotAuthorized)
        ));
    }
}
