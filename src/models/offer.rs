use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A private solicitation sent to inventory-holding teams when a buy
/// order cannot match from the book. Held only in the Market Engine's
/// memory — lost on restart, which is acceptable (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: Uuid,
    pub buyer_team: String,
    pub buyer_cl_ord_id: String,
    pub product: String,
    pub quantity_requested: Decimal,
    pub max_price: Decimal,
    pub expires_at: DateTime<Utc>,
    pub status: OfferStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OfferStatus {
    Active,
    Taken,
    Expired,
}

impl Offer {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_milliseconds().max(0)
    }
}
