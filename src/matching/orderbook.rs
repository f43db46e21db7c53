use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::models::{Mode, Side};

use super::price_level::PriceLevel;

/// Identifies a resting order: (team, client order id).
pub type OrderKey = (String, String);

/// The book's view of one resting order — enough to run price-time
/// priority matching without round-tripping to storage. The Market
/// Engine keeps the authoritative `Order` record alongside this.
#[derive(Debug, Clone)]
pub struct OrderEntry {
    pub team: String,
    pub cl_ord_id: String,
    pub mode: Mode,
    pub limit_price: Option<Decimal>,
    pub remaining: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
    pub sequence: u64,
}

/// Per-product price-time priority book: two ordered collections, plus
/// an id index for O(log n) insert/remove and O(1) top-of-book. Grounded
/// in the teacher's `services/matching/orderbook.rs::Orderbook`, with
/// `BTreeMap<PriceLevel, VecDeque<OrderEntry>>` for each side and a
/// `DashMap` id index — generalized to per-product buckets held by
/// [`OrderBook`].
pub struct ProductBook {
    pub product: String,
    bids: RwLock<BTreeMap<PriceLevel, VecDeque<OrderEntry>>>,
    asks: RwLock<BTreeMap<PriceLevel, VecDeque<OrderEntry>>>,
    index: DashMap<OrderKey, (Side, PriceLevel)>,
}

impl ProductBook {
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            bids: RwLock::new(BTreeMap::new()),
            asks: RwLock::new(BTreeMap::new()),
            index: DashMap::new(),
        }
    }

    fn price_key(side: Side, entry: &OrderEntry) -> PriceLevel {
        match (side, entry.mode, entry.limit_price) {
            (Side::Buy, Mode::Market, _) => PriceLevel::MAX,
            (Side::Sell, Mode::Market, _) => PriceLevel::ZERO,
            (_, Mode::Limit, Some(p)) => PriceLevel::from_decimal(p),
            // LIMIT orders must carry a price; this arm is unreachable
            // for validated input but keeps the match total.
            (_, Mode::Limit, None) => PriceLevel::ZERO,
        }
    }

    pub fn add(&self, side: Side, entry: OrderEntry) {
        let key = (entry.team.clone(), entry.cl_ord_id.clone());
        let price = Self::price_key(side, &entry);
        self.index.insert(key, (side, price));
        let mut levels = match side {
            Side::Buy => self.bids.write(),
            Side::Sell => self.asks.write(),
        };
        levels.entry(price).or_default().push_back(entry);
    }

    pub fn remove(&self, team: &str, cl_ord_id: &str) -> Option<OrderEntry> {
        let key = (team.to_string(), cl_ord_id.to_string());
        let (side, price) = self.index.remove(&key)?.1;
        let mut levels = match side {
            Side::Buy => self.bids.write(),
            Side::Sell => self.asks.write(),
        };
        let queue = levels.get_mut(&price)?;
        let pos = queue.iter().position(|o| o.cl_ord_id == cl_ord_id && o.team == team)?;
        let entry = queue.remove(pos);
        if queue.is_empty() {
            levels.remove(&price);
        }
        entry
    }

    /// Reduces a resting order's remaining quantity in place (used after
    /// a maker is partially consumed). Removes it entirely if it reaches
    /// zero.
    pub fn reduce(&self, team: &str, cl_ord_id: &str, by: Decimal) {
        let key = (team.to_string(), cl_ord_id.to_string());
        let Some(entry_ref) = self.index.get(&key) else {
            return;
        };
        let (side, price) = *entry_ref;
        drop(entry_ref);
        let mut levels = match side {
            Side::Buy => self.bids.write(),
            Side::Sell => self.asks.write(),
        };
        if let Some(queue) = levels.get_mut(&price) {
            if let Some(order) = queue.iter_mut().find(|o| o.cl_ord_id == cl_ord_id && o.team == team) {
                order.remaining -= by;
                if order.remaining <= Decimal::ZERO {
                    let pos = queue.iter().position(|o| o.cl_ord_id == cl_ord_id).unwrap();
                    queue.remove(pos);
                    if queue.is_empty() {
                        levels.remove(&price);
                    }
                    drop(levels);
                    self.index.remove(&key);
                }
            }
        }
    }

    /// Best bid/ask price, for ticker and offer pricing. Buy side is
    /// sorted ascending by `PriceLevel`, so the best bid is the highest
    /// key; ask's best is the lowest key.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids
            .read()
            .keys()
            .next_back()
            .filter(|p| **p != PriceLevel::MAX)
            .map(|p| p.to_decimal())
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks
            .read()
            .keys()
            .next()
            .filter(|p| **p != PriceLevel::ZERO)
            .map(|p| p.to_decimal())
    }

    /// Iterates the opposite side in matching priority order (best price
    /// first, then arrival order within a level), evicting any entries
    /// whose expiry has already passed.
    pub fn matchable_opposite(&self, side: Side, now: DateTime<Utc>) -> Vec<OrderEntry> {
        let opposite = side.opposite();
        let mut levels = match opposite {
            Side::Buy => self.bids.write(),
            Side::Sell => self.asks.write(),
        };

        let ordered_keys: Vec<PriceLevel> = match opposite {
            Side::Buy => levels.keys().rev().copied().collect(),
            Side::Sell => levels.keys().copied().collect(),
        };

        let mut out = Vec::new();
        for key in ordered_keys {
            if let Some(queue) = levels.get_mut(&key) {
                queue.retain(|e| {
                    let expired = e.expires_at.is_some_and(|x| x < now);
                    if expired {
                        self.index.remove(&(e.team.clone(), e.cl_ord_id.clone()));
                    }
                    !expired
                });
                out.extend(queue.iter().cloned());
            }
        }
        out
    }

    pub fn has_order(&self, team: &str, cl_ord_id: &str) -> bool {
        self.index.contains_key(&(team.to_string(), cl_ord_id.to_string()))
    }
}

/// Book registry: one [`ProductBook`] per product, created lazily.
#[derive(Default)]
pub struct OrderBook {
    products: DashMap<String, ProductBook>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn book_for(&self, product: &str) -> dashmap::mapref::one::Ref<'_, String, ProductBook> {
        self.products
            .entry(product.to_string())
            .or_insert_with(|| ProductBook::new(product))
            .downgrade()
    }

    pub fn add(&self, product: &str, side: Side, entry: OrderEntry) {
        self.products
            .entry(product.to_string())
            .or_insert_with(|| ProductBook::new(product))
            .add(side, entry);
    }

    pub fn remove(&self, product: &str, team: &str, cl_ord_id: &str) -> Option<OrderEntry> {
        self.products.get(product).and_then(|b| b.remove(team, cl_ord_id))
    }

    pub fn reduce(&self, product: &str, team: &str, cl_ord_id: &str, by: Decimal) {
        if let Some(book) = self.products.get(product) {
            book.reduce(team, cl_ord_id, by);
        }
    }

    pub fn products(&self) -> Vec<String> {
        self.products.iter().map(|e| e.key().clone()).collect()
    }

    pub fn best_bid(&self, product: &str) -> Option<Decimal> {
        self.products.get(product).and_then(|b| b.best_bid())
    }

    pub fn best_ask(&self, product: &str) -> Option<Decimal> {
        self.products.get(product).and_then(|b| b.best_ask())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(team: &str, id: &str, price: Decimal, qty: Decimal, seq: u64) -> OrderEntry {
        OrderEntry {
            team: team.into(),
            cl_ord_id: id.into(),
            mode: Mode::Limit,
            limit_price: Some(price),
            remaining: qty,
            expires_at: None,
            sequence: seq,
        }
    }

    #[test]
    fn best_bid_and_ask() {
        let book = ProductBook::new("GUACA");
        book.add(Side::Buy, entry("a", "1", dec!(10), dec!(5), 1));
        book.add(Side::Buy, entry("b", "2", dec!(12), dec!(5), 2));
        book.add(Side::Sell, entry("c", "3", dec!(15), dec!(5), 3));
        assert_eq!(book.best_bid(), Some(dec!(12)));
        assert_eq!(book.best_ask(), Some(dec!(15)));
    }

    #[test]
    fn matchable_opposite_is_price_then_time_ordered() {
        let book = ProductBook::new("GUACA");
        book.add(Side::Buy, entry("a", "1", dec!(10), dec!(5), 1));
        book.add(Side::Buy, entry("b", "2", dec!(12), dec!(5), 2));
        book.add(Side::Buy, entry("c", "3", dec!(12), dec!(5), 3));

        let makers = book.matchable_opposite(Side::Sell, Utc::now());
        assert_eq!(makers[0].cl_ord_id, "2");
        assert_eq!(makers[1].cl_ord_id, "3");
        assert_eq!(makers[2].cl_ord_id, "1");
    }

    #[test]
    fn add_remove_roundtrip() {
        let book = ProductBook::new("GUACA");
        book.add(Side::Sell, entry("a", "1", dec!(10), dec!(5), 1));
        assert!(book.has_order("a", "1"));
        let removed = book.remove("a", "1");
        assert!(removed.is_some());
        assert!(!book.has_order("a", "1"));
    }

    #[test]
    fn reduce_evicts_when_exhausted() {
        let book = ProductBook::new("GUACA");
        book.add(Side::Sell, entry("a", "1", dec!(10), dec!(5), 1));
        book.reduce("a", "1", dec!(5));
        assert!(!book.has_order("a", "1"));
    }

    #[test]
    fn expired_entries_are_evicted_during_iteration() {
        let book = ProductBook::new("GUACA");
        let mut e = entry("a", "1", dec!(10), dec!(5), 1);
        e.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        book.add(Side::Sell, e);
        let makers = book.matchable_opposite(Side::Buy, Utc::now());
        assert!(makers.is_empty());
        assert!(!book.has_order("a", "1"));
    }
}
