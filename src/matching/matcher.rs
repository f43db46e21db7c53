use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{Mode, Side};

use super::orderbook::{OrderEntry, ProductBook};

/// The order as seen by the matcher: just enough to decide match/no-match,
/// price, and quantity (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct Aggressor {
    pub team: String,
    pub cl_ord_id: String,
    pub side: Side,
    pub mode: Mode,
    pub limit_price: Option<Decimal>,
    pub remaining: Decimal,
}

#[derive(Debug, Clone)]
pub struct MatchDescriptor {
    pub maker: OrderEntry,
    pub trade_qty: Decimal,
    pub trade_price: Decimal,
}

#[derive(Debug)]
pub enum MatchOutcome {
    Matched(MatchDescriptor),
    NoMatch,
    /// Neither side carries a concrete price (MARKET vs MARKET with no
    /// resting limit to anchor on) — see SPEC_FULL.md §9 Open Question
    /// resolution for `NO_PRICE_REFERENCE`.
    NoPriceReference,
}

fn limit_compatible(side: Side, aggressor_price: Decimal, maker_price: Decimal) -> bool {
    match side {
        Side::Buy => aggressor_price >= maker_price,
        Side::Sell => aggressor_price <= maker_price,
    }
}

/// Pure match-decision function (spec.md §4.2). Iterates the opposite
/// side of `book` in price-time priority and returns the first eligible
/// maker, or `NoMatch` if none qualifies (the caller then rests the
/// aggressor at the tail of its side).
pub fn try_match(aggressor: &Aggressor, book: &ProductBook, now: DateTime<Utc>) -> MatchOutcome {
    let candidates = book.matchable_opposite(aggressor.side, now);

    for maker in candidates {
        if maker.team == aggressor.team {
            // Self-trade prevention: skip this maker, keep looking.
            continue;
        }

        let both_market = aggressor.mode == Mode::Market && maker.mode == Mode::Market;
        if both_market {
            return MatchOutcome::NoPriceReference;
        }

        if aggressor.mode == Mode::Limit && maker.mode == Mode::Limit {
            let compatible = match aggressor.side {
                Side::Buy => limit_compatible(
                    Side::Buy,
                    aggressor.limit_price.unwrap(),
                    maker.limit_price.unwrap(),
                ),
                Side::Sell => limit_compatible(
                    Side::Sell,
                    aggressor.limit_price.unwrap(),
                    maker.limit_price.unwrap(),
                ),
            };
            if !compatible {
                // Price-incompatible at this level; since the book is
                // priority-ordered, no later candidate at a worse price
                // can match either.
                continue;
            }
        }

        // Trade price: maker's limit when it's resting as a LIMIT order,
        // otherwise the aggressor's limit.
        let trade_price = if maker.mode == Mode::Limit {
            maker.limit_price.unwrap()
        } else {
            aggressor.limit_price.unwrap()
        };

        let trade_qty = aggressor.remaining.min(maker.remaining);
        return MatchOutcome::Matched(MatchDescriptor {
            maker,
            trade_qty,
            trade_price,
        });
    }

    MatchOutcome::NoMatch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::orderbook::OrderEntry;
    use rust_decimal_macros::dec;

    fn maker(team: &str, id: &str, mode: Mode, price: Option<Decimal>, qty: Decimal) -> OrderEntry {
        OrderEntry {
            team: team.into(),
            cl_ord_id: id.into(),
            mode,
            limit_price: price,
            remaining: qty,
            expires_at: None,
            sequence: 0,
        }
    }

    #[test]
    fn matches_crossing_limits() {
        let book = ProductBook::new("GUACA");
        book.add(Side::Sell, maker("beta", "s1", Mode::Limit, Some(dec!(11)), dec!(10)));

        let aggressor = Aggressor {
            team: "alpha".into(),
            cl_ord_id: "b1".into(),
            side: Side::Buy,
            mode: Mode::Limit,
            limit_price: Some(dec!(12)),
            remaining: dec!(10),
        };

        match try_match(&aggressor, &book, Utc::now()) {
            MatchOutcome::Matched(m) => {
                assert_eq!(m.trade_price, dec!(11));
                assert_eq!(m.trade_qty, dec!(10));
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn self_trade_is_skipped() {
        let book = ProductBook::new("SEBO");
        book.add(Side::Buy, maker("alpha", "b1", Mode::Limit, Some(dec!(10)), dec!(5)));

        let aggressor = Aggressor {
            team: "alpha".into(),
            cl_ord_id: "s1".into(),
            side: Side::Sell,
            mode: Mode::Limit,
            limit_price: Some(dec!(9)),
            remaining: dec!(5),
        };

        assert!(matches!(try_match(&aggressor, &book, Utc::now()), MatchOutcome::NoMatch));
    }

    #[test]
    fn non_crossing_limits_do_not_match() {
        let book = ProductBook::new("GUACA");
        book.add(Side::Sell, maker("beta", "s1", Mode::Limit, Some(dec!(15)), dec!(10)));

        let aggressor = Aggressor {
            team: "alpha".into(),
            cl_ord_id: "b1".into(),
            side: Side::Buy,
            mode: Mode::Limit,
            limit_price: Some(dec!(12)),
            remaining: dec!(10),
        };

        assert!(matches!(try_match(&aggressor, &book, Utc::now()), MatchOutcome::NoMatch));
    }

    #[test]
    fn market_order_takes_maker_limit_price() {
        let book = ProductBook::new("GUACA");
        book.add(Side::Sell, maker("beta", "s1", Mode::Limit, Some(dec!(11)), dec!(10)));

        let aggressor = Aggressor {
            team: "alpha".into(),
            cl_ord_id: "b1".into(),
            side: Side::Buy,
            mode: Mode::Market,
            limit_price: None,
            remaining: dec!(10),
        };

        match try_match(&aggressor, &book, Utc::now()) {
            MatchOutcome::Matched(m) => assert_eq!(m.trade_price, dec!(11)),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn market_vs_market_has_no_price_reference() {
        let book = ProductBook::new("GUACA");
        book.add(Side::Sell, maker("beta", "s1", Mode::Market, None, dec!(10)));

        let aggressor = Aggressor {
            team: "alpha".into(),
            cl_ord_id: "b1".into(),
            side: Side::Buy,
            mode: Mode::Market,
            limit_price: None,
            remaining: dec!(10),
        };

        assert!(matches!(
            try_match(&aggressor, &book, Utc::now()),
            MatchOutcome::NoPriceReference
        ));
    }
}
