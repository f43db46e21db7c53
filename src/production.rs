use std::sync::Arc;

use rust_decimal::Decimal;

use crate::error::{EngineError, EngineResult};
use crate::models::RecipeType;
use crate::session::Broadcaster;
use crate::storage::{ProductionUpdate, Store};

/// Validates recipe authorization and converts ingredients to output
/// atomically (spec.md §4.7). Grounded in the teacher's
/// `services/settlement.rs` validate-then-commit shape, generalized from
/// "two order legs" to "one team's ingredient set".
pub struct ProductionService {
    store: Arc<dyn Store>,
    broadcaster: Arc<Broadcaster>,
}

impl ProductionService {
    pub fn new(store: Arc<dyn Store>, broadcaster: Arc<Broadcaster>) -> Self {
        Self { store, broadcaster }
    }

    pub async fn produce(&self, team: &str, product: &str, quantity: Decimal) -> EngineResult<()> {
        if quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidQuantity);
        }

        let Some(team_record) = self.store.get_team(team).await? else {
            return Err(EngineError::UnauthorizedProduction);
        };
        if !team_record.is_authorized_for(product) {
            return Err(EngineError::UnauthorizedProduction);
        }
        let Some(recipe) = team_record.recipes.get(product) else {
            return Err(EngineError::InvalidRecipe);
        };

        let (output_qty, ingredients) = match recipe.recipe_type {
            RecipeType::Basic => (quantity, Vec::new()),
            RecipeType::Premium if recipe.ingredients.is_empty() => (quantity, Vec::new()),
            RecipeType::Premium => {
                let mut ingredients = Vec::with_capacity(recipe.ingredients.len());
                for (ingredient, per_unit) in &recipe.ingredients {
                    let required = per_unit * quantity;
                    if team_record.inventory_of(ingredient) < required {
                        return Err(EngineError::InsufficientIngredients);
                    }
                    ingredients.push((ingredient.clone(), required));
                }
                let output_qty = (quantity * recipe.premium_bonus).floor();
                (output_qty, ingredients)
            }
        };

        let update = ProductionUpdate {
            team: team.to_string(),
            output_product: product.to_string(),
            output_qty,
            ingredients,
        };
        self.store.execute_production(update).await?;

        self.broadcaster.balance_inventory_refresh(team, self.store.as_ref()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Recipe, Team};
    use crate::session::SessionRegistry;
    use crate::storage::InMemoryStore;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn basic_team() -> Team {
        let mut recipes = HashMap::new();
        recipes.insert(
            "BREAD".to_string(),
            Recipe { output: "BREAD".into(), recipe_type: RecipeType::Basic, ingredients: HashMap::new(), premium_bonus: dec!(1) },
        );
        Team {
            id: "A".into(),
            name: "A".into(),
            balance: dec!(1000),
            inventory: HashMap::new(),
            authorized_products: vec!["BREAD".into()],
            recipes,
        }
    }

    fn seeded_store() -> Arc<dyn Store> {
        let store = InMemoryStore::new();
        store.seed_team(basic_team());
        Arc::new(store)
    }

    #[tokio::test]
    async fn basic_recipe_credits_quantity_directly() {
        let store = seeded_store();
        let broadcaster = Arc::new(Broadcaster::new(SessionRegistry::new()));
        let service = ProductionService::new(store.clone(), broadcaster);

        service.produce("A", "BREAD", dec!(5)).await.unwrap();

        let team = store.get_team("A").await.unwrap().unwrap();
        assert_eq!(team.inventory_of("BREAD"), dec!(5));
    }

    #[tokio::test]
    async fn unauthorized_product_is_rejected() {
        let store = seeded_store();
        let broadcaster = Arc::new(Broadcaster::new(SessionRegistry::new()));
        let service = ProductionService::new(store, broadcaster);

        let err = service.produce("A", "GUACA", dec!(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::UnauthorizedProduction));
    }

    fn premium_team() -> Team {
        let mut ingredients = HashMap::new();
        ingredients.insert("GUACA".to_string(), dec!(2));
        let mut recipes = HashMap::new();
        recipes.insert(
            "SALSA".to_string(),
            Recipe { output: "SALSA".into(), recipe_type: RecipeType::Premium, ingredients, premium_bonus: dec!(1.5) },
        );
        let mut inventory = HashMap::new();
        inventory.insert("GUACA".to_string(), dec!(20));
        Team {
            id: "B".into(),
            name: "B".into(),
            balance: dec!(1000),
            inventory,
            authorized_products: vec!["SALSA".into()],
            recipes,
        }
    }

    #[tokio::test]
    async fn premium_recipe_deducts_ingredients_and_credits_bonus_output() {
        let store = InMemoryStore::new();
        store.seed_team(premium_team());
        let store: Arc<dyn Store> = Arc::new(store);
        let broadcaster = Arc::new(Broadcaster::new(SessionRegistry::new()));
        let service = ProductionService::new(store.clone(), broadcaster);

        service.produce("B", "SALSA", dec!(4)).await.unwrap();

        let team = store.get_team("B").await.unwrap().unwrap();
        assert_eq!(team.inventory_of("GUACA"), dec!(12), "4 * 2 GUACA per unit should be deducted");
        assert_eq!(team.inventory_of("SALSA"), dec!(6), "floor(4 * 1.5) = 6 SALSA should be credited");
    }

    #[tokio::test]
    async fn premium_recipe_rejects_when_ingredients_insufficient() {
        let store = InMemoryStore::new();
        store.seed_team(premium_team());
        let store: Arc<dyn Store> = Arc::new(store);
        let broadcaster = Arc::new(Broadcaster::new(SessionRegistry::new()));
        let service = ProductionService::new(store.clone(), broadcaster);

        let err = service.produce("B", "SALSA", dec!(100)).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientIngredients));

        let team = store.get_team("B").await.unwrap().unwrap();
        assert_eq!(team.inventory_of("GUACA"), dec!(20), "failed production must not touch inventory");
    }
}
