use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::recipe::Recipe;

/// A tournament team. Created out-of-band; mutated only by the trade
/// executor and the production service, and only under a storage
/// transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub balance: Decimal,
    pub inventory: HashMap<String, Decimal>,
    pub authorized_products: Vec<String>,
    pub recipes: HashMap<String, Recipe>,
}

impl Team {
    pub fn inventory_of(&self, product: &str) -> Decimal {
        self.inventory.get(product).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn is_authorized_for(&self, product: &str) -> bool {
        self.authorized_products.iter().any(|p| p == product)
    }
}

/// Synthetic counterparty used by the offer broker when it needs a
/// balance/inventory-exempt leg (see `EngineError` docs on `SERVER_TEAM`).
pub const SERVER_TEAM: &str = "SERVER";

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn inventory_of_defaults_to_zero() {
        let team = Team {
            id: "alpha".into(),
            name: "Alpha".into(),
            balance: dec!(100),
            inventory: HashMap::new(),
            authorized_products: vec![],
            recipes: HashMap::new(),
        };
        assert_eq!(team.inventory_of("GUACA"), Decimal::ZERO);
    }

    #[test]
    fn authorization_check() {
        let team = Team {
            id: "alpha".into(),
            name: "Alpha".into(),
            balance: dec!(0),
            inventory: HashMap::new(),
            authorized_products: vec!["GUACA".into()],
            recipes: HashMap::new(),
        };
        assert!(team.is_authorized_for("GUACA"));
        assert!(!team.is_authorized_for("FOSFO"));
    }
}
