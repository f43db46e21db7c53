use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::engine::EngineHandle;
use crate::error::{EngineError, EngineResult};
use crate::models::{Offer, OfferStatus, Order};
use crate::session::Broadcaster;
use crate::storage::Store;

/// Default offer base price when no mid is available yet for the
/// product (spec.md §4.4 step 3).
const DEFAULT_BASE_PRICE: Decimal = dec!(10.0);

/// Active + recently-resolved offers, keyed by id. Conceptually owned by
/// the Market Engine but implemented as a `DashMap` so the periodic
/// sweeper and inbound ACCEPT_OFFER handling can both mutate entries
/// with per-key locking rather than routing every acceptance through
/// the engine's single command queue.
pub type OfferTable = Arc<DashMap<Uuid, Offer>>;

pub fn new_offer_table() -> OfferTable {
    Arc::new(DashMap::new())
}

/// Targets private solicitations at inventory-holding teams when a buy
/// order can't match from the book, and settles acceptances against the
/// specific originating order (spec.md §4.4). Grounded in the teacher's
/// `services/settlement.rs` transaction-retry pattern for the acceptance
/// path, generalized from "one matched pair" to "one targeted offer".
pub struct OfferBroker {
    store: Arc<dyn Store>,
    broadcaster: Arc<Broadcaster>,
    offers: OfferTable,
    engine: EngineHandle,
    config: AppConfig,
}

impl OfferBroker {
    pub fn new(
        store: Arc<dyn Store>,
        broadcaster: Arc<Broadcaster>,
        offers: OfferTable,
        engine: EngineHandle,
        config: AppConfig,
    ) -> Self {
        Self { store, broadcaster, offers, engine, config }
    }

    /// Targets an offer for a residual buy order. Fire-and-forget from
    /// the engine's perspective (spec.md §4.5 step 4).
    pub async fn generate_offer(&self, buyer_order: &Order) {
        let residual = buyer_order.remaining();
        let eligible = match self.store.teams_with_inventory(&buyer_order.product, residual).await {
            Ok(teams) => teams,
            Err(err) => {
                warn!(error = %err, product = %buyer_order.product, "failed to query eligible teams for offer");
                return;
            }
        };
        let eligible: Vec<_> = eligible.into_iter().filter(|t| t.id != buyer_order.team).collect();
        if eligible.is_empty() {
            return;
        }

        let mid = match self.store.get_market_state(&buyer_order.product).await {
            Ok(Some(state)) => state.mid(),
            _ => None,
        };
        let price = match mid {
            Some(mid) => mid * self.config.offer_price_multiplier(),
            None => DEFAULT_BASE_PRICE,
        };

        let now = Utc::now();
        let expires_at = if self.config.offer_timeout_secs == 0 {
            now + chrono::Duration::days(3650)
        } else {
            now + self.config.offer_timeout()
        };

        let offer = Offer {
            id: Uuid::new_v4(),
            buyer_team: buyer_order.team.clone(),
            buyer_cl_ord_id: buyer_order.cl_ord_id.clone(),
            product: buyer_order.product.clone(),
            quantity_requested: residual,
            max_price: price,
            expires_at,
            status: OfferStatus::Active,
        };
        self.offers.insert(offer.id, offer.clone());

        info!(offer_id = %offer.id, buyer = %buyer_order.team, product = %buyer_order.product, teams = eligible.len(), "offer targeted");
        for team in eligible {
            self.broadcaster.offer(&team.id, &offer, now).await;
        }
    }

    /// Handles an inbound ACCEPT_OFFER. Performs the first-acceptance
    /// compare-and-set, then hands off to the engine for matching against
    /// the specific buy order (spec.md §4.4 Acceptance).
    pub async fn accept_offer(
        &self,
        offer_id: Uuid,
        acceptor_team: &str,
        quantity_offered: Decimal,
        price_offered: Decimal,
    ) -> EngineResult<()> {
        let now = Utc::now();
        let Some(mut entry) = self.offers.get_mut(&offer_id) else {
            return Err(EngineError::OfferNotFound);
        };

        if entry.status == OfferStatus::Taken {
            return Err(EngineError::OfferTaken);
        }
        if entry.status == OfferStatus::Expired || entry.is_expired(now) {
            entry.status = OfferStatus::Expired;
            return Err(EngineError::OfferExpired);
        }
        if price_offered > entry.max_price {
            return Err(EngineError::InvalidOrder("priceOffered exceeds offer maxPrice".into()));
        }
        if quantity_offered <= Decimal::ZERO || quantity_offered > entry.quantity_requested {
            return Err(EngineError::InvalidQuantity);
        }

        entry.status = OfferStatus::Taken;
        let buyer_team = entry.buyer_team.clone();
        let buyer_cl_ord_id = entry.buyer_cl_ord_id.clone();
        drop(entry);

        match self
            .engine
            .accept_offer(offer_id, buyer_team, buyer_cl_ord_id, acceptor_team.to_string(), quantity_offered, price_offered)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Some(mut entry) = self.offers.get_mut(&offer_id) {
                    if entry.status == OfferStatus::Taken {
                        entry.status = OfferStatus::Active;
                    }
                }
                Err(err)
            }
        }
    }

    /// Evicts expired offers, transitioning ACTIVE -> EXPIRED (spec.md
    /// §4.4 Expiration). Runs every 100ms by default.
    pub fn sweep(&self) {
        let now = Utc::now();
        for mut entry in self.offers.iter_mut() {
            if entry.status == OfferStatus::Active && entry.is_expired(now) {
                entry.status = OfferStatus::Expired;
            }
        }
    }

    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.offer_sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_offer(status: OfferStatus, expires_at: chrono::DateTime<Utc>) -> Offer {
        Offer {
            id: Uuid::new_v4(),
            buyer_team: "A".into(),
            buyer_cl_ord_id: "c1".into(),
            product: "FOSFO".into(),
            quantity_requested: dec!(15),
            max_price: dec!(11),
            expires_at,
            status,
        }
    }

    #[test]
    fn sweep_expires_active_past_deadline() {
        let table = new_offer_table();
        let offer = sample_offer(OfferStatus::Active, Utc::now() - chrono::Duration::seconds(1));
        table.insert(offer.id, offer.clone());
        for mut entry in table.iter_mut() {
            if entry.status == OfferStatus::Active && entry.is_expired(Utc::now()) {
                entry.status = OfferStatus::Expired;
            }
        }
        assert_eq!(table.get(&offer.id).unwrap().status, OfferStatus::Expired);
    }

    #[test]
    fn sweep_leaves_fresh_offers_active() {
        let table = new_offer_table();
        let offer = sample_offer(OfferStatus::Active, Utc::now() + chrono::Duration::seconds(30));
        table.insert(offer.id, offer.clone());
        for mut entry in table.iter_mut() {
            if entry.status == OfferStatus::Active && entry.is_expired(Utc::now()) {
                entry.status = OfferStatus::Expired;
            }
        }
        assert_eq!(table.get(&offer.id).unwrap().status, OfferStatus::Active);
    }
}
