use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "recipe_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RecipeType {
    Basic,
    Premium,
}

/// Part of a team's definition: how to turn ingredients into `output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub output: String,
    pub recipe_type: RecipeType,
    /// Per-unit-of-output ingredient requirement. Empty for BASIC.
    pub ingredients: HashMap<String, Decimal>,
    pub premium_bonus: Decimal,
}

impl Recipe {
    pub fn required(&self, ingredient: &str, quantity: Decimal) -> Decimal {
        self.ingredients
            .get(ingredient)
            .copied()
            .unwrap_or(Decimal::ZERO)
            * quantity
    }
}
