//! SwarmMarket demo binary.
//!
//! Wires in-memory adapter implementations into the three cores and the
//! shared Event Fabric, then runs a scripted scenario end to end so the
//! matching, auction, and escrow/task flows can be observed together
//! without any external transport (out of scope — §0).

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use swarmmarket_core::adapters::capability::{CapabilityRecord, CapabilityStatus, FixedFeePricing};
use swarmmarket_core::adapters::{
    InMemoryCapabilities, InMemoryIdentity, InMemoryNotifier, InMemoryPayments, InMemoryPersistence, InMemoryScoring,
};
use swarmmarket_core::auction::{AuctionType, CreateAuctionRequest};
use swarmmarket_core::escrow::TransactionSource;
use swarmmarket_core::ids::{AgentId, CapabilityId, ProductId};
use swarmmarket_core::matching::{Order, OrderType, Side};
use swarmmarket_core::task::CreateTaskRequest;
use swarmmarket_core::{
    AuctionEngine, Clock, Config, Currency, EventFabric, MatchingEngine, Money, StructuralValidator, SystemClock,
    TaskCoordinator, TransactionCoordinator,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "swarmmarket-demo", about = "Runs a scripted SwarmMarket scenario")]
struct Cli {
    /// Skip the task/escrow portion of the scenario.
    #[arg(long, default_value_t = false)]
    skip_tasks: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::from_env());

    let persistence = InMemoryPersistence::new();
    let clock = Arc::new(SystemClock);
    let events = EventFabric::new(persistence.clone(), clock.clone(), config.clone());

    let matching = MatchingEngine::new(clock.clone(), events.clone(), persistence.clone());
    let auctions = AuctionEngine::new(persistence.clone(), events.clone(), clock.clone(), config.clone());
    let payments = Arc::new(InMemoryPayments::new());
    let scoring = Arc::new(InMemoryScoring::new());
    let transactions = Arc::new(TransactionCoordinator::new(
        persistence.clone(),
        payments,
        scoring,
        events.clone(),
        clock.clone(),
        config.clone(),
    ));

    let identity = InMemoryIdentity::new();
    let _notifier = InMemoryNotifier::new();

    run_matching_scenario(&matching).await.context("matching engine scenario failed")?;
    run_auction_scenario(&auctions, clock.clone()).await.context("auction engine scenario failed")?;
    run_escrow_scenario(&transactions).await.context("escrow coordinator scenario failed")?;

    if !cli.skip_tasks {
        run_task_scenario(persistence, events, transactions, clock, config)
            .await
            .context("task coordinator scenario failed")?;
    }

    identity.register(AgentId::new());
    Ok(())
}

/// §8 scenario S1: exact cross fills both orders.
async fn run_matching_scenario(matching: &MatchingEngine) -> Result<()> {
    let product: ProductId = ProductId::new();
    let alice = AgentId::new();
    let bob = AgentId::new();

    let sell = Order::new(alice, product, Side::Sell, OrderType::Limit, Some(dec!(100)), dec!(10), chrono::Utc::now());
    matching.place_order(sell).await?;

    let buy = Order::new(bob, product, Side::Buy, OrderType::Limit, Some(dec!(100)), dec!(10), chrono::Utc::now());
    let outcome = matching.place_order(buy).await?;
    tracing::info!(trades = outcome.trades.len(), "matching scenario complete");
    Ok(())
}

/// §8 scenario S4: english auction anti-sniping extension.
async fn run_auction_scenario(auctions: &AuctionEngine, clock: Arc<SystemClock>) -> Result<()> {
    let seller = AgentId::new();
    let bidder = AgentId::new();

    let auction = auctions
        .create_auction(CreateAuctionRequest {
            seller_id: seller,
            auction_type: AuctionType::English,
            title: "vintage dataset".into(),
            starting_price: dec!(100),
            reserve_price: None,
            buy_now_price: None,
            currency: Currency::usd(),
            min_increment: Some(dec!(10)),
            price_decrement: None,
            decrement_interval_seconds: None,
            starts_at: None,
            ends_at: clock.now() + chrono::Duration::seconds(120),
            extension_seconds: None,
            metadata: json!({}),
        })
        .await?;

    auctions.place_bid(auction.id, bidder, dec!(110), Currency::usd()).await?;
    let ended = auctions.end_auction(auction.id, seller).await?;
    tracing::info!(winner = ?ended.winner_id, price = %ended.current_price, "auction scenario complete");
    Ok(())
}

/// §4.4 happy path: fund, deliver, confirm, rate.
async fn run_escrow_scenario(transactions: &TransactionCoordinator) -> Result<()> {
    let buyer = AgentId::new();
    let seller = AgentId::new();

    let transaction = transactions
        .create(buyer, seller, dec!(250), Currency::usd(), TransactionSource::ListingPurchase, "listing_42".into())
        .await?;
    transactions.fund(transaction.id).await?;
    transactions.deliver(transaction.id, seller, "shipment_tracking_123".into()).await?;
    transactions.confirm(transaction.id, buyer).await?;
    transactions.submit_rating(transaction.id, buyer, 5, Some("great seller".into())).await?;

    tracing::info!(transaction_id = %transaction.id, "escrow scenario complete");
    Ok(())
}

/// §4.5 happy path through a registered capability.
async fn run_task_scenario(
    persistence: Arc<InMemoryPersistence>,
    events: EventFabric,
    transactions: Arc<TransactionCoordinator>,
    clock: Arc<SystemClock>,
    config: Arc<Config>,
) -> Result<()> {
    let capabilities = Arc::new(InMemoryCapabilities::new());
    let executor = AgentId::new();
    let requester = AgentId::new();
    let capability_id: CapabilityId = CapabilityId::new();

    capabilities.register(CapabilityRecord {
        id: capability_id,
        agent_id: executor,
        status: CapabilityStatus::Active,
        accepting_tasks: true,
        input_schema: json!({
            "type": "object",
            "properties": {"dataset_url": {"type": "string"}},
            "required": ["dataset_url"],
        }),
        output_schema: None,
        status_events: None,
        base_fee: Money::new(dec!(15), Currency::usd()),
    });

    let webhooks = Arc::new(swarmmarket_core::events::webhook::WebhookDispatcher::new(
        config.webhook_timeout(),
        config.webhook_max_retries,
        std::time::Duration::from_secs(config.webhook_backoff_base_secs),
    ));

    let coordinator = TaskCoordinator::new(
        persistence,
        capabilities,
        Arc::new(StructuralValidator),
        Arc::new(FixedFeePricing),
        events,
        webhooks,
        transactions,
        clock,
        config,
    );

    let task = coordinator
        .create_task(
            requester,
            CreateTaskRequest {
                capability_id,
                input: json!({"dataset_url": "s3://bucket/dataset.csv"}),
                callback_url: None,
                callback_secret: None,
                metadata: json!({}),
            },
        )
        .await?;

    let task = coordinator.accept(task.id, executor).await?;
    let task = coordinator.deliver(task.id, executor, json!({"rows_processed": 4096})).await?;
    let task = coordinator.confirm(task.id, requester).await?;
    tracing::info!(task_id = %task.id, status = ?task.status, "task scenario complete");
    Ok(())
}
