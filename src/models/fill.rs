use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::order::datetime_as_millis;

/// An immutable record of one matched quantity between two orders at a
/// specific price. One fill per matching event — partial fills on one
/// order across multiple makers produce multiple fill rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Fill {
    pub id: Uuid,
    pub buyer_team: String,
    pub seller_team: String,
    pub buyer_cl_ord_id: String,
    pub seller_cl_ord_id: String,
    pub product: String,
    pub qty: Decimal,
    pub price: Decimal,
    pub buyer_message: Option<String>,
    pub seller_message: Option<String>,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub executed_at: DateTime<Utc>,
}

impl Fill {
    pub fn counterparty(&self, team: &str) -> &str {
        if team == self.buyer_team {
            &self.seller_team
        } else {
            &self.buyer_team
        }
    }

    pub fn counterparty_message(&self, team: &str) -> Option<&str> {
        if team == self.buyer_team {
            self.seller_message.as_deref()
        } else {
            self.buyer_message.as_deref()
        }
    }

    pub fn touches(&self, team: &str) -> bool {
        self.buyer_team == team || self.seller_team == team
    }
}
