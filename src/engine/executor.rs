use std::time::Duration;

use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::storage::{Store, TradeUpdate};

/// Executes one trade-update transaction, retrying on storage conflicts
/// with `100ms × attempt` backoff up to `max_retries` times. Business
/// invariant failures (insufficient balance/inventory) are not retried —
/// they abort the match immediately (spec.md §4.3, §7).
pub async fn execute_trade_with_retry(
    store: &dyn Store,
    update: TradeUpdate,
    max_retries: u32,
) -> EngineResult<()> {
    let mut attempt = 0u32;
    loop {
        match store.execute_trade(update.clone()).await {
            Ok(()) => return Ok(()),
            Err(EngineError::Storage(err)) if attempt < max_retries => {
                attempt += 1;
                warn!(attempt, error = %err, "trade transaction conflict, retrying");
                tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mode, Order, OrderStatus, Side, Team};
    use crate::storage::InMemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use uuid::Uuid;

    #[tokio::test]
    async fn insufficient_balance_is_not_retried() {
        let store = InMemoryStore::new();
        store.seed_team(Team {
            id: "alpha".into(),
            name: "alpha".into(),
            balance: dec!(0),
            inventory: HashMap::new(),
            authorized_products: vec![],
            recipes: HashMap::new(),
        });
        store.seed_team(Team {
            id: "beta".into(),
            name: "beta".into(),
            balance: dec!(0),
            inventory: HashMap::new(),
            authorized_products: vec![],
            recipes: HashMap::new(),
        });

        let now = Utc::now();
        let buyer = Order {
            cl_ord_id: "b1".into(),
            team: "alpha".into(),
            side: Side::Buy,
            mode: Mode::Limit,
            product: "GUACA".into(),
            qty: dec!(10),
            filled: dec!(10),
            limit_price: Some(dec!(10)),
            expires_at: None,
            message: None,
            status: OrderStatus::Filled,
            created_at: now,
            updated_at: now,
        };
        let mut seller = buyer.clone();
        seller.team = "beta".into();
        seller.side = Side::Sell;
        seller.cl_ord_id = "s1".into();

        let update = TradeUpdate {
            buyer_order: buyer.clone(),
            seller_order: seller.clone(),
            fill: crate::models::Fill {
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
                executed_at: now,
            },
            buyer_team: "alpha".into(),
            seller_team: "beta".into(),
            product: "GUACA".into(),
            qty: dec!(10),
            cost: dec!(100),
        };

        let result = execute_trade_with_retry(&store, update, 3).await;
        assert!(matches!(result, Err(EngineError::InsufficientBalance)));
    }
}
