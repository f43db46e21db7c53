use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::order::datetime_as_millis;

/// Cached per-product market snapshot, refreshed by the trade executor
/// and the ticker service.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MarketState {
    pub product: String,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_trade_price: Option<Decimal>,
    pub volume_24h: Decimal,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub updated_at: DateTime<Utc>,
}

impl MarketState {
    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(b), Some(a)) => Some((b + a) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn empty(product: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            product: product.into(),
            best_bid: None,
            best_ask: None,
            last_trade_price: None,
            volume_24h: Decimal::ZERO,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn mid_is_none_unless_both_sides_present() {
        let mut m = MarketState::empty("GUACA", Utc::now());
        assert_eq!(m.mid(), None);
        m.best_bid = Some(dec!(10));
        assert_eq!(m.mid(), None);
        m.best_ask = Some(dec!(12));
        assert_eq!(m.mid(), Some(dec!(11)));
    }
}
