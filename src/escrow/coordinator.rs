//! Transaction / Escrow Coordinator (§4.4): `pending -> escrow_funded ->
//! delivered -> completed`, with `dispute`, `refund` and `cancel` side
//! paths. One critical section per transaction id covers the
//! read-check-write step (§5), realized with a per-id `tokio::sync::Mutex`
//! the same way the auction engine serializes bids.

use crate::adapters::{Payments, Persistence, Scoring};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::escrow::rating::Rating;
use crate::escrow::transaction::{Transaction, TransactionSource, TransactionStatus};
use crate::events::EventFabric;
use crate::ids::{AgentId, RatingId, TransactionId};
use crate::money::{Currency, Money};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub struct TransactionCoordinator {
    persistence: Arc<dyn Persistence>,
    payments: Arc<dyn Payments>,
    scoring: Arc<dyn Scoring>,
    events: EventFabric,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    locks: DashMap<TransactionId, Arc<Mutex<()>>>,
    holds: DashMap<TransactionId, crate::adapters::HoldRef>,
}

impl TransactionCoordinator {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        payments: Arc<dyn Payments>,
        scoring: Arc<dyn Scoring>,
        events: EventFabric,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            persistence,
            payments,
            scoring,
            events,
            clock,
            config,
            locks: DashMap::new(),
            holds: DashMap::new(),
        }
    }

    fn lock_for(&self, id: TransactionId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Creates a new transaction in `pending`. Called by the Matching,
    /// Auction, or Task cores once they have a counterparty pair and an
    /// amount to escrow (§4.3 "Transaction creation on win", §4.5 `accept`).
    pub async fn create(
        &self,
        buyer_id: AgentId,
        seller_id: AgentId,
        amount: Decimal,
        currency: Currency,
        source: TransactionSource,
        source_id: String,
    ) -> Result<Transaction> {
        let transaction = Transaction {
            id: TransactionId::new(),
            buyer_id,
            seller_id,
            amount,
            currency,
            source,
            source_id,
            status: TransactionStatus::Pending,
            external_payment_ref: None,
            delivery_proof: None,
            created_at: self.clock.now(),
            funded_at: None,
            delivered_at: None,
            completed_at: None,
        };
        self.persistence.save_transaction(transaction.clone()).await?;
        Ok(transaction)
    }

    /// `fund`: two-phase hold through Payments, `pending -> escrow_funded`.
    pub async fn fund(&self, transaction_id: TransactionId) -> Result<Transaction> {
        let lock = self.lock_for(transaction_id);
        let _guard = lock.lock().await;

        let mut transaction = self.load(transaction_id).await?;
        if transaction.status != TransactionStatus::Pending {
            return Err(Error::invalid_state(format!("{:?}", transaction.status), "fund"));
        }

        let hold = self
            .payments
            .hold(transaction.buyer_id, Money::new(transaction.amount, transaction.currency))
            .await?;
        self.holds.insert(transaction_id, hold);

        transaction.status = TransactionStatus::EscrowFunded;
        transaction.funded_at = Some(self.clock.now());
        self.persistence.save_transaction(transaction.clone()).await?;

        self.events
            .publish(
                "transaction.escrow_funded",
                json!({"buyer_id": transaction.buyer_id.to_string(), "seller_id": transaction.seller_id.to_string(), "transaction_id": transaction.id.to_string()}),
            )
            .await?;
        Ok(transaction)
    }

    /// `deliver`: seller-only, `escrow_funded -> delivered`.
    pub async fn deliver(&self, transaction_id: TransactionId, caller_id: AgentId, delivery_proof: String) -> Result<Transaction> {
        let lock = self.lock_for(transaction_id);
        let _guard = lock.lock().await;

        let mut transaction = self.load(transaction_id).await?;
        if transaction.status != TransactionStatus::EscrowFunded {
            return Err(Error::invalid_state(format!("{:?}", transaction.status), "deliver"));
        }
        if caller_id != transaction.seller_id {
            return Err(Error::NotAuthorized);
        }

        transaction.delivery_proof = Some(delivery_proof);
        transaction.status = TransactionStatus::Delivered;
        transaction.delivered_at = Some(self.clock.now());
        self.persistence.save_transaction(transaction.clone()).await?;

        self.events
            .publish(
                "transaction.delivered",
                json!({"buyer_id": transaction.buyer_id.to_string(), "seller_id": transaction.seller_id.to_string(), "transaction_id": transaction.id.to_string()}),
            )
            .await?;
        Ok(transaction)
    }

    /// `confirm`: buyer-only, `delivered -> completed`. Captures the held
    /// funds minus the platform fee (§4.4 "Platform fee").
    pub async fn confirm(&self, transaction_id: TransactionId, caller_id: AgentId) -> Result<Transaction> {
        let lock = self.lock_for(transaction_id);
        let _guard = lock.lock().await;

        let mut transaction = self.load(transaction_id).await?;
        if transaction.status != TransactionStatus::Delivered {
            return Err(Error::invalid_state(format!("{:?}", transaction.status), "confirm"));
        }
        if caller_id != transaction.buyer_id {
            return Err(Error::NotAuthorized);
        }

        let hold = self.holds.get(&transaction_id).map(|h| h.clone()).ok_or(Error::Internal("missing hold for funded transaction".into()))?;
        let gross = Money::new(transaction.amount, transaction.currency);
        let fee = gross.percentage(self.config.platform_fee_percent);
        let net = gross.checked_sub(&fee)?;

        match self.payments.capture(&hold, transaction.seller_id, net).await {
            Ok(()) => {
                info!(transaction_id = %transaction.id, fee = %fee.amount, "platform fee withheld");
                transaction.status = TransactionStatus::Completed;
                transaction.completed_at = Some(self.clock.now());
                self.persistence.save_transaction(transaction.clone()).await?;
                self.scoring.record_completion(transaction.seller_id, true).await;

                self.events
                    .publish(
                        "transaction.completed",
                        json!({"buyer_id": transaction.buyer_id.to_string(), "seller_id": transaction.seller_id.to_string(), "transaction_id": transaction.id.to_string()}),
                    )
                    .await?;
                Ok(transaction)
            }
            Err(err) => {
                self.events
                    .publish(
                        "payment.capture_failed",
                        json!({"buyer_id": transaction.buyer_id.to_string(), "seller_id": transaction.seller_id.to_string(), "transaction_id": transaction.id.to_string(), "error": err.to_string()}),
                    )
                    .await?;
                Err(err)
            }
        }
    }

    /// `dispute`: buyer-only, callable from `{escrow_funded, delivered}`.
    pub async fn dispute(&self, transaction_id: TransactionId, caller_id: AgentId) -> Result<Transaction> {
        let lock = self.lock_for(transaction_id);
        let _guard = lock.lock().await;

        let mut transaction = self.load(transaction_id).await?;
        if !matches!(transaction.status, TransactionStatus::EscrowFunded | TransactionStatus::Delivered) {
            return Err(Error::invalid_state(format!("{:?}", transaction.status), "dispute"));
        }
        if caller_id != transaction.buyer_id {
            return Err(Error::NotAuthorized);
        }

        transaction.status = TransactionStatus::Disputed;
        self.persistence.save_transaction(transaction.clone()).await?;

        self.events
            .publish(
                "dispute.opened",
                json!({"buyer_id": transaction.buyer_id.to_string(), "seller_id": transaction.seller_id.to_string(), "transaction_id": transaction.id.to_string()}),
            )
            .await?;
        Ok(transaction)
    }

    /// `refund`: administrative path, callable from `{escrow_funded,
    /// delivered, disputed}`.
    pub async fn refund(&self, transaction_id: TransactionId) -> Result<Transaction> {
        let lock = self.lock_for(transaction_id);
        let _guard = lock.lock().await;

        let mut transaction = self.load(transaction_id).await?;
        if !matches!(
            transaction.status,
            TransactionStatus::EscrowFunded | TransactionStatus::Delivered | TransactionStatus::Disputed
        ) {
            return Err(Error::invalid_state(format!("{:?}", transaction.status), "refund"));
        }

        if let Some(hold) = self.holds.get(&transaction_id).map(|h| h.clone()) {
            self.payments.release(&hold).await?;
        }

        transaction.status = TransactionStatus::Refunded;
        self.persistence.save_transaction(transaction.clone()).await?;

        self.events
            .publish(
                "transaction.refunded",
                json!({"buyer_id": transaction.buyer_id.to_string(), "seller_id": transaction.seller_id.to_string(), "transaction_id": transaction.id.to_string()}),
            )
            .await?;
        Ok(transaction)
    }

    /// `cancel`: either party, `pending` only.
    pub async fn cancel(&self, transaction_id: TransactionId, caller_id: AgentId) -> Result<Transaction> {
        let lock = self.lock_for(transaction_id);
        let _guard = lock.lock().await;

        let mut transaction = self.load(transaction_id).await?;
        if transaction.status != TransactionStatus::Pending {
            return Err(Error::invalid_state(format!("{:?}", transaction.status), "cancel"));
        }
        if caller_id != transaction.buyer_id && caller_id != transaction.seller_id {
            return Err(Error::NotAuthorized);
        }

        transaction.status = TransactionStatus::Cancelled;
        self.persistence.save_transaction(transaction.clone()).await?;

        self.events
            .publish(
                "transaction.cancelled",
                json!({"buyer_id": transaction.buyer_id.to_string(), "seller_id": transaction.seller_id.to_string(), "transaction_id": transaction.id.to_string()}),
            )
            .await?;
        Ok(transaction)
    }

    /// §4.4 "Rating": exactly one rating per rater per transaction, only
    /// after `completed`.
    pub async fn submit_rating(
        &self,
        transaction_id: TransactionId,
        rater_id: AgentId,
        score: u8,
        message: Option<String>,
    ) -> Result<Rating> {
        let transaction = self.load(transaction_id).await?;
        if transaction.status != TransactionStatus::Completed {
            return Err(Error::invalid_state(format!("{:?}", transaction.status), "submit_rating"));
        }
        if !(1..=5).contains(&score) {
            return Err(Error::invalid_input("/score", "must be between 1 and 5"));
        }
        let ratee_id = if rater_id == transaction.buyer_id {
            transaction.seller_id
        } else if rater_id == transaction.seller_id {
            transaction.buyer_id
        } else {
            return Err(Error::NotAuthorized);
        };

        if self.persistence.rating_exists(transaction_id, rater_id).await? {
            return Err(Error::Conflict);
        }

        let rating = Rating {
            id: RatingId::new(),
            transaction_id,
            rater_id,
            ratee_id,
            score,
            message,
            created_at: self.clock.now(),
        };
        self.persistence.save_rating(rating.clone()).await?;
        self.scoring.record_rating(ratee_id, score).await;
        Ok(rating)
    }

    /// SPEC_FULL.md §5 supplemented read model.
    pub async fn average_rating(&self, agent_id: AgentId) -> Option<Decimal> {
        self.scoring.average_rating(agent_id).await
    }

    async fn load(&self, id: TransactionId) -> Result<Transaction> {
        self.persistence.get_transaction(id).await?.ok_or(Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryPayments, InMemoryPersistence, InMemoryScoring};
    use crate::clock::SystemClock;
    use rust_decimal_macros::dec;

    fn harness() -> (TransactionCoordinator, AgentId, AgentId) {
        let clock = Arc::new(SystemClock);
        let config = Arc::new(Config::default());
        let persistence = InMemoryPersistence::new();
        let events = EventFabric::new(persistence.clone(), clock.clone(), config.clone());
        let coordinator = TransactionCoordinator::new(
            persistence,
            Arc::new(InMemoryPayments::new()),
            Arc::new(InMemoryScoring::new()),
            events,
            clock,
            config,
        );
        (coordinator, AgentId::new(), AgentId::new())
    }

    #[tokio::test]
    async fn happy_path_runs_to_completion() {
        let (coordinator, buyer, seller) = harness();
        let transaction = coordinator
            .create(buyer, seller, dec!(100), Currency::usd(), TransactionSource::ListingPurchase, "listing_1".into())
            .await
            .unwrap();

        coordinator.fund(transaction.id).await.unwrap();
        coordinator.deliver(transaction.id, seller, "proof.png".into()).await.unwrap();
        let completed = coordinator.confirm(transaction.id, buyer).await.unwrap();
        assert_eq!(completed.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn deliver_requires_seller() {
        let (coordinator, buyer, seller) = harness();
        let transaction = coordinator
            .create(buyer, seller, dec!(100), Currency::usd(), TransactionSource::ListingPurchase, "listing_1".into())
            .await
            .unwrap();
        coordinator.fund(transaction.id).await.unwrap();

        assert!(matches!(
            coordinator.deliver(transaction.id, buyer, "proof".into()).await,
            Err(Error::NotAuthorized)
        ));
    }

    #[tokio::test]
    async fn duplicate_rating_is_rejected() {
        let (coordinator, buyer, seller) = harness();
        let transaction = coordinator
            .create(buyer, seller, dec!(100), Currency::usd(), TransactionSource::ListingPurchase, "listing_1".into())
            .await
            .unwrap();
        coordinator.fund(transaction.id).await.unwrap();
        coordinator.deliver(transaction.id, seller, "proof".into()).await.unwrap();
        coordinator.confirm(transaction.id, buyer).await.unwrap();

        coordinator.submit_rating(transaction.id, buyer, 5, None).await.unwrap();
        assert!(matches!(
            coordinator.submit_rating(transaction.id, buyer, 4, None).await,
            Err(Error::Conflict)
        ));

        assert_eq!(coordinator.average_rating(seller).await, Some(Decimal::from(5)));
    }

    #[tokio::test]
    async fn cancel_only_allowed_while_pending() {
        let (coordinator, buyer, seller) = harness();
        let transaction = coordinator
            .create(buyer, seller, dec!(100), Currency::usd(), TransactionSource::ListingPurchase, "listing_1".into())
            .await
            .unwrap();
        coordinator.fund(transaction.id).await.unwrap();

        assert!(coordinator.cancel(transaction.id, buyer).await.is_err());
    }

    /// S7: concurrent `confirm`/`dispute` on the same transaction must
    /// produce exactly one success and one `invalid_state` loser, never
    /// both succeeding (§5 "two concurrent confirm calls must produce
    /// exactly one completed and one invalid_state error").
    #[tokio::test]
    async fn concurrent_confirm_and_dispute_yield_exactly_one_winner() {
        let (coordinator, buyer, seller) = harness();
        let transaction = coordinator
            .create(buyer, seller, dec!(100), Currency::usd(), TransactionSource::ListingPurchase, "listing_1".into())
            .await
            .unwrap();
        coordinator.fund(transaction.id).await.unwrap();
        coordinator.deliver(transaction.id, seller, "proof".into()).await.unwrap();

        let (confirm_result, dispute_result) =
            tokio::join!(coordinator.confirm(transaction.id, buyer), coordinator.dispute(transaction.id, buyer));

        let successes = [confirm_result.is_ok(), dispute_result.is_ok()]
            .iter()
            .filter(|ok| **ok)
            .count();
        assert_eq!(successes, 1, "exactly one of confirm/dispute must win the race");

        let final_transaction = coordinator.load(transaction.id).await.unwrap();
        assert!(matches!(
            final_transaction.status,
            TransactionStatus::Completed | TransactionStatus::Disputed
        ));
    }
}
