use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::error::{EngineError, EngineResult};
use crate::models::{Fill, MarketState, Order, OrderStatus, Team, SERVER_TEAM};

use super::{ProductionUpdate, Store, TradeUpdate};
use super::{FillRepository, MarketStateRepository, OrderRepository, TeamRepository};

/// In-memory reference implementation of the storage contract. Used by
/// the crate's own test suite and as a fallback when no `DATABASE_URL`
/// is configured — the teacher's equivalent is absent (it always talks
/// to Postgres), so this is grounded in the *shape* of
/// `services/matching/orchestrator.rs`'s transactional persistence rather
/// than a specific file.
#[derive(Default)]
pub struct InMemoryStore {
    teams: RwLock<HashMap<String, Team>>,
    orders: RwLock<HashMap<(String, String), Order>>,
    fills: RwLock<Vec<Fill>>,
    market_state: RwLock<HashMap<String, MarketState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_team(&self, team: Team) {
        self.teams.write().insert(team.id.clone(), team);
    }
}

#[async_trait]
impl TeamRepository for InMemoryStore {
    async fn get_team(&self, team: &str) -> EngineResult<Option<Team>> {
        Ok(self.teams.read().get(team).cloned())
    }

    async fn teams_with_inventory(&self, product: &str, min_qty: Decimal) -> EngineResult<Vec<Team>> {
        Ok(self
            .teams
            .read()
            .values()
            .filter(|t| t.inventory_of(product) >= min_qty)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> EngineResult<()> {
        self.orders
            .write()
            .insert((order.team.clone(), order.cl_ord_id.clone()), order.clone());
        Ok(())
    }

    async fn get_order(&self, team: &str, cl_ord_id: &str) -> EngineResult<Option<Order>> {
        Ok(self
            .orders
            .read()
            .get(&(team.to_string(), cl_ord_id.to_string()))
            .cloned())
    }

    async fn order_exists(&self, team: &str, cl_ord_id: &str) -> EngineResult<bool> {
        Ok(self
            .orders
            .read()
            .contains_key(&(team.to_string(), cl_ord_id.to_string())))
    }

    async fn resting_orders(&self) -> EngineResult<Vec<Order>> {
        Ok(self
            .orders
            .read()
            .values()
            .filter(|o| o.is_resting())
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        team: &str,
        cl_ord_id: &str,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> EngineResult<()> {
        if let Some(order) = self
            .orders
            .write()
            .get_mut(&(team.to_string(), cl_ord_id.to_string()))
        {
            order.status = status;
            order.updated_at = updated_at;
        }
        Ok(())
    }

    async fn orders_for_team(&self, team: &str) -> EngineResult<Vec<Order>> {
        let mut orders: Vec<Order> = self.orders.read().values().filter(|o| o.team == team).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}

#[async_trait]
impl FillRepository for InMemoryStore {
    async fn fills_for_team_since(&self, team: &str, since: DateTime<Utc>) -> EngineResult<Vec<Fill>> {
        Ok(self
            .fills
            .read()
            .iter()
            .filter(|f| f.touches(team) && f.executed_at >= since)
            .cloned()
            .collect())
    }

    async fn fills_for_product_since(
        &self,
        product: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<Fill>> {
        Ok(self
            .fills
            .read()
            .iter()
            .filter(|f| f.product == product && f.executed_at >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MarketStateRepository for InMemoryStore {
    async fn get_market_state(&self, product: &str) -> EngineResult<Option<MarketState>> {
        Ok(self.market_state.read().get(product).cloned())
    }

    async fn upsert_market_state(&self, state: &MarketState) -> EngineResult<()> {
        self.market_state
            .write()
            .insert(state.product.clone(), state.clone());
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn execute_trade(&self, update: TradeUpdate) -> EngineResult<()> {
        let mut teams = self.teams.write();
        let mut orders = self.orders.write();
        let mut fills = self.fills.write();

        if update.buyer_team != SERVER_TEAM {
            let buyer = teams
                .get(&update.buyer_team)
                .ok_or_else(|| EngineError::Internal(format!("unknown team {}", update.buyer_team)))?;
            if buyer.balance < update.cost {
                return Err(EngineError::InsufficientBalance);
            }
        }
        if update.seller_team != SERVER_TEAM {
            let seller = teams
                .get(&update.seller_team)
                .ok_or_else(|| EngineError::Internal(format!("unknown team {}", update.seller_team)))?;
            if seller.inventory_of(&update.product) < update.qty {
                return Err(EngineError::InsufficientInventory);
            }
        }

        if update.buyer_team != SERVER_TEAM {
            let buyer = teams.get_mut(&update.buyer_team).unwrap();
            buyer.balance -= update.cost;
            *buyer.inventory.entry(update.product.clone()).or_insert(Decimal::ZERO) += update.qty;
        }
        if update.seller_team != SERVER_TEAM {
            let seller = teams.get_mut(&update.seller_team).unwrap();
            seller.balance += update.cost;
            *seller.inventory.entry(update.product.clone()).or_insert(Decimal::ZERO) -= update.qty;
        }

        orders.insert(
            (update.buyer_order.team.clone(), update.buyer_order.cl_ord_id.clone()),
            update.buyer_order,
        );
        orders.insert(
            (update.seller_order.team.clone(), update.seller_order.cl_ord_id.clone()),
            update.seller_order,
        );
        fills.push(update.fill);

        Ok(())
    }

    async fn execute_production(&self, update: ProductionUpdate) -> EngineResult<()> {
        let mut teams = self.teams.write();
        let team = teams
            .get(&update.team)
            .ok_or_else(|| EngineError::Internal(format!("unknown team {}", update.team)))?;

        for (ingredient, required) in &update.ingredients {
            if team.inventory_of(ingredient) < *required {
                return Err(EngineError::InsufficientIngredients);
            }
        }

        let team = teams.get_mut(&update.team).unwrap();
        for (ingredient, required) in &update.ingredients {
            *team.inventory.entry(ingredient.clone()).or_insert(Decimal::ZERO) -= *required;
        }
        *team
            .inventory
            .entry(update.output_product.clone())
            .or_insert(Decimal::ZERO) += update.output_qty;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mode, Side};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn team(id: &str, balance: Decimal) -> Team {
        Team {
            id: id.into(),
            name: id.into(),
            balance,
            inventory: HashMap::new(),
            authorized_products: vec![],
            recipes: HashMap::new(),
        }
    }

    fn team_with_inventory(id: &str, balance: Decimal, product: &str, qty: Decimal) -> Team {
        let mut t = team(id, balance);
        t.inventory.insert(product.to_string(), qty);
        t
    }

    fn order(team: &str, side: Side, qty: Decimal, filled: Decimal) -> Order {
        let now = Utc::now();
        Order {
            cl_ord_id: format!("{team}-1"),
            team: team.into(),
            side,
            mode: Mode::Limit,
            product: "GUACA".into(),
            qty,
            filled,
            limit_price: Some(dec!(10)),
            expires_at: None,
            message: None,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn execute_trade_transfers_cash_and_goods() {
        let store = InMemoryStore::new();
        store.seed_team(team("alpha", dec!(1000)));
        store.seed_team(team_with_inventory("beta", dec!(0), "GUACA", dec!(10)));

        let mut buyer = order("alpha", Side::Buy, dec!(10), dec!(0));
        buyer.apply_fill(dec!(10), Utc::now());
        let mut seller = order("beta", Side::Sell, dec!(10), dec!(0));
        seller.apply_fill(dec!(10), Utc::now());

        let fill = Fill {
            id: Uuid::new_v4(),
            buyer_team: "alpha".into(),
            seller_team: "beta".into(),
            buyer_cl_ord_id: buyer.cl_ord_id.clone(),
            seller_cl_ord_id: seller.cl_ord_id.clone(),
            product: "GUACA".into(),
            qty: dec!(10),
            price: dec!(11),
            buyer_message: None,
            seller_message: None,
            executed_at: Utc::now(),
        };

        store
            .execute_trade(TradeUpdate {
                buyer_order: buyer,
                seller_order: seller,
                fill,
                buyer_team: "alpha".into(),
                seller_team: "beta".into(),
                product: "GUACA".into(),
                qty: dec!(10),
                cost: dec!(110),
            })
            .await
            .unwrap();

        let alpha = store.get_team("alpha").await.unwrap().unwrap();
        let beta = store.get_team("beta").await.unwrap().unwrap();
        assert_eq!(alpha.balance, dec!(890));
        assert_eq!(beta.balance, dec!(110));
        assert_eq!(alpha.inventory_of("GUACA"), dec!(10));
        assert_eq!(beta.inventory_of("GUACA"), dec!(0));
    }

    #[tokio::test]
    async fn execute_trade_rejects_insufficient_balance_without_mutating() {
        let store = InMemoryStore::new();
        store.seed_team(team("alpha", dec!(50)));
        store.seed_team(team("beta", dec!(0)));

        let buyer = order("alpha", Side::Buy, dec!(10), dec!(0));
        let seller = order("beta", Side::Sell, dec!(10), dec!(0));
        let fill = Fill {
            id: Uuid::new_v4(),
            buyer_team: "alpha".into(),
            seller_team: "beta".into(),
            buyer_cl_ord_id: buyer.cl_ord_id.clone(),
            seller_cl_ord_id: seller.cl_ord_id.clone(),
            product: "GUACA".into(),
            qty: dec!(10),
            price: dec!(10),
            buyer_message: None,
            seller_message: None,
            executed_at: Utc::now(),
        };

        let result = store
            .execute_trade(TradeUpdate {
                buyer_order: buyer,
                seller_order: seller,
                fill,
                buyer_team: "alpha".into(),
                seller_team: "beta".into(),
                product: "GUACA".into(),
                qty: dec!(10),
                cost: dec!(100),
            })
            .await;

        assert!(matches!(result, Err(EngineError::InsufficientBalance)));
        let alpha = store.get_team("alpha").await.unwrap().unwrap();
        assert_eq!(alpha.balance, dec!(50));
    }
}
