pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::EngineResult;
use crate::models::{Fill, MarketState, Order, OrderStatus, Team};

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// The atomic update the trade executor hands to storage for one match
/// (spec.md §4.3 steps 1-6). Both order snapshots already carry their
/// post-fill `filled`/`status` fields; storage's job is to persist them
/// together with the fill, inventory, and balance changes, or none at all.
#[derive(Debug, Clone)]
pub struct TradeUpdate {
    pub buyer_order: Order,
    pub seller_order: Order,
    pub fill: Fill,
    pub buyer_team: String,
    pub seller_team: String,
    pub product: String,
    pub qty: Decimal,
    pub cost: Decimal,
}

/// The atomic update the production service hands to storage: deduct
/// ingredients, credit output, for one team.
#[derive(Debug, Clone)]
pub struct ProductionUpdate {
    pub team: String,
    pub output_product: String,
    pub output_qty: Decimal,
    pub ingredients: Vec<(String, Decimal)>,
}

#[async_trait]
pub trait TeamRepository: Send + Sync {
    async fn get_team(&self, team: &str) -> EngineResult<Option<Team>>;
    async fn teams_with_inventory(&self, product: &str, min_qty: Decimal) -> EngineResult<Vec<Team>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: &Order) -> EngineResult<()>;
    async fn get_order(&self, team: &str, cl_ord_id: &str) -> EngineResult<Option<Order>>;
    async fn order_exists(&self, team: &str, cl_ord_id: &str) -> EngineResult<bool>;
    /// `ordersByStatus(PENDING|PARTIALLY_FILLED)` — used for book recovery.
    async fn resting_orders(&self) -> EngineResult<Vec<Order>>;
    /// All orders for a team, most recent first — backs `REQUEST_ALL_ORDERS`.
    async fn orders_for_team(&self, team: &str) -> EngineResult<Vec<Order>>;
    async fn update_status(
        &self,
        team: &str,
        cl_ord_id: &str,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> EngineResult<()>;
}

#[async_trait]
pub trait FillRepository: Send + Sync {
    async fn fills_for_team_since(&self, team: &str, since: DateTime<Utc>) -> EngineResult<Vec<Fill>>;
    async fn fills_for_product_since(&self, product: &str, since: DateTime<Utc>) -> EngineResult<Vec<Fill>>;
}

#[async_trait]
pub trait MarketStateRepository: Send + Sync {
    async fn get_market_state(&self, product: &str) -> EngineResult<Option<MarketState>>;
    async fn upsert_market_state(&self, state: &MarketState) -> EngineResult<()>;
}

/// The full storage contract consumed by the engine, executor, and
/// production service (spec.md §6 "Storage contract").
#[async_trait]
pub trait Store:
    TeamRepository + OrderRepository + FillRepository + MarketStateRepository + Send + Sync
{
    /// Performs the five-step trade update atomically. Returns
    /// `InsufficientBalance`/`InsufficientInventory` without mutating
    /// anything if the invariant would be violated.
    async fn execute_trade(&self, update: TradeUpdate) -> EngineResult<()>;

    /// Deducts ingredients and credits output atomically.
    async fn execute_production(&self, update: ProductionUpdate) -> EngineResult<()>;
}
