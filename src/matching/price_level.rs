use rust_decimal::Decimal;

/// Fixed-point price ordering key so book levels can live in a `BTreeMap`
/// without relying on `Decimal`'s `Ord` directly across differently-scaled
/// values. Grounded in the teacher's `services/matching/types.rs::PriceLevel`.
const SCALE: i64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriceLevel(i64);

impl PriceLevel {
    pub fn from_decimal(price: Decimal) -> Self {
        let scaled = (price * Decimal::from(SCALE)).round();
        Self(scaled.try_into().unwrap_or(i64::MAX))
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(SCALE)
    }

    pub const MAX: PriceLevel = PriceLevel(i64::MAX);
    pub const ZERO: PriceLevel = PriceLevel(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_trips_through_decimal() {
        let level = PriceLevel::from_decimal(dec!(11.50));
        assert_eq!(level.to_decimal(), dec!(11.5));
    }

    #[test]
    fn ordering_matches_price_ordering() {
        let low = PriceLevel::from_decimal(dec!(9.99));
        let high = PriceLevel::from_decimal(dec!(10.00));
        assert!(low < high);
    }
}
