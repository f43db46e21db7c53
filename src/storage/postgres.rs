use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::models::{Fill, MarketState, Order, OrderStatus, Recipe, Team, SERVER_TEAM};

use super::{ProductionUpdate, Store, TradeUpdate};
use super::{FillRepository, MarketStateRepository, OrderRepository, TeamRepository};

/// `sqlx::PgPool`-backed storage contract implementation. Query shape
/// follows `services/matching/orchestrator.rs`: explicit binds, `query`
/// for writes, `query_as` for reads, `pool.begin()`/`tx.commit()` for the
/// multi-statement atomic updates.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TeamRepository for PostgresStore {
    async fn get_team(&self, team: &str) -> EngineResult<Option<Team>> {
        let row: Option<(String, String, Decimal, Vec<String>)> = sqlx::query_as(
            r#"SELECT id, name, balance, authorized_products FROM teams WHERE id = $1"#,
        )
        .bind(team)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, name, balance, authorized_products)) = row else {
            return Ok(None);
        };

        let inventory_rows: Vec<(String, Decimal)> =
            sqlx::query_as(r#"SELECT product, qty FROM inventory WHERE team = $1"#)
                .bind(team)
                .fetch_all(&self.pool)
                .await?;
        let inventory: HashMap<String, Decimal> = inventory_rows.into_iter().collect();

        let recipe_rows: Vec<(String, String, serde_json::Value, Decimal)> = sqlx::query_as(
            r#"SELECT output, recipe_type::text, ingredients, premium_bonus FROM recipes WHERE team = $1"#,
        )
        .bind(team)
        .fetch_all(&self.pool)
        .await?;

        let mut recipes = HashMap::new();
        for (output, recipe_type, ingredients_json, premium_bonus) in recipe_rows {
            let recipe_type = if recipe_type.eq_ignore_ascii_case("premium") {
                crate::models::RecipeType::Premium
            } else {
                crate::models::RecipeType::Basic
            };
            let ingredients: HashMap<String, Decimal> =
                serde_json::from_value(ingredients_json).unwrap_or_default();
            recipes.insert(
                output.clone(),
                Recipe {
                    output,
                    recipe_type,
                    ingredients,
                    premium_bonus,
                },
            );
        }

        Ok(Some(Team {
            id,
            name,
            balance,
            inventory,
            authorized_products,
            recipes,
        }))
    }

    async fn teams_with_inventory(&self, product: &str, min_qty: Decimal) -> EngineResult<Vec<Team>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"SELECT team FROM inventory WHERE product = $1 AND qty >= $2"#,
        )
        .bind(product)
        .bind(min_qty)
        .fetch_all(&self.pool)
        .await?;

        let mut teams = Vec::with_capacity(ids.len());
        for (id,) in ids {
            if let Some(t) = self.get_team(&id).await? {
                teams.push(t);
            }
        }
        Ok(teams)
    }
}

#[async_trait]
impl OrderRepository for PostgresStore {
    async fn insert_order(&self, order: &Order) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                cl_ord_id, team, side, mode, product, qty, filled,
                limit_price, expires_at, message, status, created_at, updated_at
            )
            VALUES ($1, $2, $3::order_side, $4::order_mode, $5, $6, $7, $8, $9, $10, $11::order_status, $12, $13)
            ON CONFLICT (team, cl_ord_id) DO UPDATE SET
                filled = EXCLUDED.filled,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&order.cl_ord_id)
        .bind(&order.team)
        .bind(order.side)
        .bind(order.mode)
        .bind(&order.product)
        .bind(order.qty)
        .bind(order.filled)
        .bind(order.limit_price)
        .bind(order.expires_at)
        .bind(&order.message)
        .bind(order.status)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_order(&self, team: &str, cl_ord_id: &str) -> EngineResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"SELECT * FROM orders WHERE team = $1 AND cl_ord_id = $2"#,
        )
        .bind(team)
        .bind(cl_ord_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn order_exists(&self, team: &str, cl_ord_id: &str) -> EngineResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"SELECT COUNT(*) FROM orders WHERE team = $1 AND cl_ord_id = $2"#,
        )
        .bind(team)
        .bind(cl_ord_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(c,)| c > 0).unwrap_or(false))
    }

    async fn resting_orders(&self) -> EngineResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"SELECT * FROM orders WHERE status IN ('pending', 'partially_filled')"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    async fn update_status(
        &self,
        team: &str,
        cl_ord_id: &str,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"UPDATE orders SET status = $1::order_status, updated_at = $2 WHERE team = $3 AND cl_ord_id = $4"#,
        )
        .bind(status)
        .bind(updated_at)
        .bind(team)
        .bind(cl_ord_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn orders_for_team(&self, team: &str) -> EngineResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"SELECT * FROM orders WHERE team = $1 ORDER BY created_at DESC"#,
        )
        .bind(team)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }
}

#[async_trait]
impl FillRepository for PostgresStore {
    async fn fills_for_team_since(&self, team: &str, since: DateTime<Utc>) -> EngineResult<Vec<Fill>> {
        let fills = sqlx::query_as::<_, Fill>(
            r#"
            SELECT * FROM fills
            WHERE (buyer_team = $1 OR seller_team = $1) AND executed_at >= $2
            ORDER BY executed_at ASC
            "#,
        )
        .bind(team)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(fills)
    }

    async fn fills_for_product_since(
        &self,
        product: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<Fill>> {
        let fills = sqlx::query_as::<_, Fill>(
            r#"SELECT * FROM fills WHERE product = $1 AND executed_at >= $2"#,
        )
        .bind(product)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(fills)
    }
}

#[async_trait]
impl MarketStateRepository for PostgresStore {
    async fn get_market_state(&self, product: &str) -> EngineResult<Option<MarketState>> {
        let state = sqlx::query_as::<_, MarketState>(
            r#"SELECT * FROM market_state WHERE product = $1"#,
        )
        .bind(product)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state)
    }

    async fn upsert_market_state(&self, state: &MarketState) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO market_state (product, best_bid, best_ask, last_trade_price, volume_24h, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (product) DO UPDATE SET
                best_bid = EXCLUDED.best_bid,
                best_ask = EXCLUDED.best_ask,
                last_trade_price = EXCLUDED.last_trade_price,
                volume_24h = EXCLUDED.volume_24h,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&state.product)
        .bind(state.best_bid)
        .bind(state.best_ask)
        .bind(state.last_trade_price)
        .bind(state.volume_24h)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn execute_trade(&self, update: TradeUpdate) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        if update.buyer_team != SERVER_TEAM {
            let balance: Option<(Decimal,)> =
                sqlx::query_as(r#"SELECT balance FROM teams WHERE id = $1 FOR UPDATE"#)
                    .bind(&update.buyer_team)
                    .fetch_optional(&mut *tx)
                    .await?;
            let balance = balance
                .ok_or_else(|| EngineError::Internal(format!("unknown team {}", update.buyer_team)))?
                .0;
            if balance < update.cost {
                return Err(EngineError::InsufficientBalance);
            }
        }
        if update.seller_team != SERVER_TEAM {
            let qty: Option<(Decimal,)> = sqlx::query_as(
                r#"SELECT qty FROM inventory WHERE team = $1 AND product = $2 FOR UPDATE"#,
            )
            .bind(&update.seller_team)
            .bind(&update.product)
            .fetch_optional(&mut *tx)
            .await?;
            if qty.map(|(q,)| q).unwrap_or(Decimal::ZERO) < update.qty {
                return Err(EngineError::InsufficientInventory);
            }
        }

        for (team, delta_balance, delta_inventory) in [
            (&update.buyer_team, -update.cost, update.qty),
            (&update.seller_team, update.cost, -update.qty),
        ] {
            if team == SERVER_TEAM {
                continue;
            }
            sqlx::query(r#"UPDATE teams SET balance = balance + $1 WHERE id = $2"#)
                .bind(delta_balance)
                .bind(team)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                r#"
                INSERT INTO inventory (team, product, qty) VALUES ($1, $2, $3)
                ON CONFLICT (team, product) DO UPDATE SET qty = inventory.qty + $3
                "#,
            )
            .bind(team)
            .bind(&update.product)
            .bind(delta_inventory)
            .execute(&mut *tx)
            .await?;
        }

        for order in [&update.buyer_order, &update.seller_order] {
            sqlx::query(
                r#"
                INSERT INTO orders (
                    cl_ord_id, team, side, mode, product, qty, filled,
                    limit_price, expires_at, message, status, created_at, updated_at
                )
                VALUES ($1, $2, $3::order_side, $4::order_mode, $5, $6, $7, $8, $9, $10, $11::order_status, $12, $13)
                ON CONFLICT (team, cl_ord_id) DO UPDATE SET
                    filled = EXCLUDED.filled,
                    status = EXCLUDED.status,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(&order.cl_ord_id)
            .bind(&order.team)
            .bind(order.side)
            .bind(order.mode)
            .bind(&order.product)
            .bind(order.qty)
            .bind(order.filled)
            .bind(order.limit_price)
            .bind(order.expires_at)
            .bind(&order.message)
            .bind(order.status)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO fills (
                id, buyer_team, seller_team, buyer_cl_ord_id, seller_cl_ord_id,
                product, qty, price, buyer_message, seller_message, executed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(update.fill.id)
        .bind(&update.fill.buyer_team)
        .bind(&update.fill.seller_team)
        .bind(&update.fill.buyer_cl_ord_id)
        .bind(&update.fill.seller_cl_ord_id)
        .bind(&update.fill.product)
        .bind(update.fill.qty)
        .bind(update.fill.price)
        .bind(&update.fill.buyer_message)
        .bind(&update.fill.seller_message)
        .bind(update.fill.executed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn execute_production(&self, update: ProductionUpdate) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        for (ingredient, required) in &update.ingredients {
            let qty: Option<(Decimal,)> = sqlx::query_as(
                r#"SELECT qty FROM inventory WHERE team = $1 AND product = $2 FOR UPDATE"#,
            )
            .bind(&update.team)
            .bind(ingredient)
            .fetch_optional(&mut *tx)
            .await?;
            if qty.map(|(q,)| q).unwrap_or(Decimal::ZERO) < *required {
                return Err(EngineError::InsufficientIngredients);
            }
        }

        for (ingredient, required) in &update.ingredients {
            sqlx::query(
                r#"UPDATE inventory SET qty = qty - $1 WHERE team = $2 AND product = $3"#,
            )
            .bind(required)
            .bind(&update.team)
            .bind(ingredient)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO inventory (team, product, qty) VALUES ($1, $2, $3)
            ON CONFLICT (team, product) DO UPDATE SET qty = inventory.qty + $3
            "#,
        )
        .bind(&update.team)
        .bind(&update.output_product)
        .bind(update.output_qty)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
