use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Serializes `DateTime<Utc>` as epoch milliseconds, matching the wire
/// protocol's `serverTime`/timestamp fields.
pub mod datetime_as_millis {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(dt.timestamp_millis())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_mode", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
}

/// An order. Created by the router on validation, mutated only inside
/// trade-execution transactions, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub cl_ord_id: String,
    pub team: String,
    pub side: Side,
    pub mode: Mode,
    pub product: String,
    pub qty: Decimal,
    pub filled: Decimal,
    pub limit_price: Option<Decimal>,
    pub expires_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub status: OrderStatus,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining(&self) -> Decimal {
        self.qty - self.filled
    }

    pub fn is_resting(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::PartiallyFilled)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|e| e < now)
    }

    /// Applies a fill of `qty`, transitioning status. Callers must bound
    /// `qty` to `remaining()` first.
    pub fn apply_fill(&mut self, qty: Decimal, now: DateTime<Utc>) {
        debug_assert!(qty <= self.remaining());
        self.filled += qty;
        self.status = if self.filled >= self.qty {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(qty: Decimal, filled: Decimal) -> Order {
        let now = Utc::now();
        Order {
            cl_ord_id: "a-1".into(),
            team: "alpha".into(),
            side: Side::Buy,
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

    #[test]
    fn apply_fill_transitions_to_filled() {
        let mut o = order(dec!(10), dec!(0));
        o.apply_fill(dec!(10), Utc::now());
        assert_eq!(o.status, OrderStatus::Filled);
        assert_eq!(o.remaining(), Decimal::ZERO);
    }

    #[test]
    fn apply_fill_transitions_to_partially_filled() {
        let mut o = order(dec!(10), dec!(0));
        o.apply_fill(dec!(4), Utc::now());
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.remaining(), dec!(6));
    }

    #[test]
    fn opposite_side() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
