//! Persistence adapter (§6): "Six stable tables (named semantically, not
//! per-SQL): agents, orders, trades, auctions, bids, transactions, tasks,
//! task_history, events ..., webhooks." This module is a *contract* — no
//! on-disk layout is prescribed (Non-goal). [`InMemoryPersistence`] is a
//! reference implementation good enough to drive the demo binary and the
//! test suite; a real deployment swaps it for a real store without any
//! core needing to change.

use crate::auction::{Auction, Bid};
use crate::error::{Error, Result};
use crate::escrow::{Rating, Transaction};
use crate::events::Event;
use crate::events::webhook::WebhookSubscription;
use crate::ids::{
    AgentId, AuctionId, BidId, EventId, OrderId, ProductId, TaskId, TransactionId, WebhookId,
};
use crate::matching::{Order, Trade};
use crate::task::{Task, TaskHistoryRow};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_order(&self, order: Order) -> Result<()>;
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;
    async fn orders_for_product(&self, product_id: ProductId) -> Result<Vec<Order>>;

    async fn save_trade(&self, trade: Trade) -> Result<()>;
    async fn trades_for_product(&self, product_id: ProductId) -> Result<Vec<Trade>>;

    async fn save_auction(&self, auction: Auction) -> Result<()>;
    async fn get_auction(&self, id: AuctionId) -> Result<Option<Auction>>;

    async fn save_bid(&self, bid: Bid) -> Result<()>;
    async fn get_bid(&self, id: BidId) -> Result<Option<Bid>>;
    async fn bids_for_auction(&self, auction_id: AuctionId) -> Result<Vec<Bid>>;

    async fn save_transaction(&self, transaction: Transaction) -> Result<()>;
    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>>;

    async fn save_rating(&self, rating: Rating) -> Result<()>;
    async fn ratings_for_agent(&self, agent_id: AgentId) -> Result<Vec<Rating>>;
    async fn rating_exists(&self, transaction_id: TransactionId, rater_id: AgentId) -> Result<bool>;

    async fn save_task(&self, task: Task) -> Result<()>;
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;
    async fn append_task_history(&self, row: TaskHistoryRow) -> Result<()>;
    async fn task_history(&self, task_id: TaskId) -> Result<Vec<TaskHistoryRow>>;

    /// Durable append-only event log. Never mutated once written.
    async fn append_event(&self, event: Event) -> Result<()>;
    /// Per-principal activity log, one row per recipient in the event's
    /// audience (§4.1).
    async fn activity_log(&self, agent_id: AgentId) -> Result<Vec<Event>>;
    /// Idempotence check for duplicate `Publish` calls (§8 property 5).
    async fn event_seen(&self, id: EventId) -> Result<bool>;

    async fn save_webhook(&self, webhook: WebhookSubscription) -> Result<()>;
    async fn get_webhook(&self, id: WebhookId) -> Result<Option<WebhookSubscription>>;
    async fn delete_webhook(&self, id: WebhookId) -> Result<()>;
    async fn webhooks_for_event_type(&self, event_type: &str) -> Result<Vec<WebhookSubscription>>;
}

/// In-memory reference implementation. Good for tests and the demo binary;
/// not durable across process restarts (persistence durability is an
/// adapter concern this crate does not prescribe).
#[derive(Default)]
pub struct InMemoryPersistence {
    orders: DashMap<OrderId, Order>,
    trades: DashMap<ProductId, Vec<Trade>>,
    auctions: DashMap<AuctionId, Auction>,
    bids: DashMap<BidId, Bid>,
    bids_by_auction: DashMap<AuctionId, Vec<BidId>>,
    transactions: DashMap<TransactionId, Transaction>,
    ratings: DashMap<AgentId, Vec<Rating>>,
    rating_keys: DashMap<(TransactionId, AgentId), ()>,
    tasks: DashMap<TaskId, Task>,
    task_history: DashMap<TaskId, Vec<TaskHistoryRow>>,
    event_log: DashMap<EventId, Event>,
    activity_log: DashMap<AgentId, Vec<Event>>,
    webhooks: DashMap<WebhookId, WebhookSubscription>,
}

impl InMemoryPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn save_order(&self, order: Order) -> Result<()> {
        self.orders.insert(order.id, order);
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn orders_for_product(&self, product_id: ProductId) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .iter()
            .filter(|o| o.product_id == product_id)
            .map(|o| o.clone())
            .collect())
    }

    async fn save_trade(&self, trade: Trade) -> Result<()> {
        self.trades.entry(trade.product_id).or_default().push(trade);
        Ok(())
    }

    async fn trades_for_product(&self, product_id: ProductId) -> Result<Vec<Trade>> {
        Ok(self
            .trades
            .get(&product_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn save_auction(&self, auction: Auction) -> Result<()> {
        self.auctions.insert(auction.id, auction);
        Ok(())
    }

    async fn get_auction(&self, id: AuctionId) -> Result<Option<Auction>> {
        Ok(self.auctions.get(&id).map(|a| a.clone()))
    }

    async fn save_bid(&self, bid: Bid) -> Result<()> {
        self.bids_by_auction
            .entry(bid.auction_id)
            .or_default()
            .retain(|id| *id != bid.id);
        self.bids_by_auction
            .entry(bid.auction_id)
            .or_default()
            .push(bid.id);
        self.bids.insert(bid.id, bid);
        Ok(())
    }

    async fn get_bid(&self, id: BidId) -> Result<Option<Bid>> {
        Ok(self.bids.get(&id).map(|b| b.clone()))
    }

    async fn bids_for_auction(&self, auction_id: AuctionId) -> Result<Vec<Bid>> {
        let ids = self
            .bids_by_auction
            .get(&auction_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.bids.get(&id).map(|b| b.clone()))
            .collect())
    }

    async fn save_transaction(&self, transaction: Transaction) -> Result<()> {
        self.transactions.insert(transaction.id, transaction);
        Ok(())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.transactions.get(&id).map(|t| t.clone()))
    }

    async fn save_rating(&self, rating: Rating) -> Result<()> {
        self.rating_keys
            .insert((rating.transaction_id, rating.rater_id), ());
        self.ratings.entry(rating.ratee_id).or_default().push(rating);
        Ok(())
    }

    async fn ratings_for_agent(&self, agent_id: AgentId) -> Result<Vec<Rating>> {
        Ok(self.ratings.get(&agent_id).map(|v| v.clone()).unwrap_or_default())
    }

    async fn rating_exists(&self, transaction_id: TransactionId, rater_id: AgentId) -> Result<bool> {
        Ok(self.rating_keys.contains_key(&(transaction_id, rater_id)))
    }

    async fn save_task(&self, task: Task) -> Result<()> {
        self.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.get(&id).map(|t| t.clone()))
    }

    async fn append_task_history(&self, row: TaskHistoryRow) -> Result<()> {
        self.task_history.entry(row.task_id).or_default().push(row);
        Ok(())
    }

    async fn task_history(&self, task_id: TaskId) -> Result<Vec<TaskHistoryRow>> {
        Ok(self
            .task_history
            .get(&task_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn append_event(&self, event: Event) -> Result<()> {
        for agent_id in &event.agent_audience {
            self.activity_log.entry(*agent_id).or_default().push(event.clone());
        }
        self.event_log.insert(event.id, event);
        Ok(())
    }

    async fn activity_log(&self, agent_id: AgentId) -> Result<Vec<Event>> {
        Ok(self
            .activity_log
            .get(&agent_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn event_seen(&self, id: EventId) -> Result<bool> {
        Ok(self.event_log.contains_key(&id))
    }

    async fn save_webhook(&self, webhook: WebhookSubscription) -> Result<()> {
        self.webhooks.insert(webhook.id, webhook);
        Ok(())
    }

    async fn get_webhook(&self, id: WebhookId) -> Result<Option<WebhookSubscription>> {
        Ok(self.webhooks.get(&id).map(|w| w.clone()))
    }

    async fn delete_webhook(&self, id: WebhookId) -> Result<()> {
        self.webhooks.remove(&id);
        Ok(())
    }

    async fn webhooks_for_event_type(&self, event_type: &str) -> Result<Vec<WebhookSubscription>> {
        Ok(self
            .webhooks
            .iter()
            .filter(|w| w.is_active && w.event_type_filter.iter().any(|t| t == event_type))
            .map(|w| w.clone())
            .collect())
    }
}

/// Adapter errors map to [`Error::DependencyFailed`] unless a more specific
/// kind applies (§7).
pub fn dependency_failed(msg: impl Into<String>) -> Error {
    Error::DependencyFailed(msg.into())
}
