use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::error;

use crate::matching::OrderBook;
use crate::models::MarketState;
use crate::session::Broadcaster;
use crate::storage::Store;
use crate::ws::protocol::ServerMessage;

/// Periodic + ad-hoc top-of-book and rolling-volume computation
/// (spec.md §4.6). Grounded in `main.rs`'s kline-update background
/// worker: a `tokio::spawn`ed `interval.tick()` loop, plus a method the
/// engine calls directly right after a trade commits.
pub struct TickerService {
    store: Arc<dyn Store>,
    book: Arc<OrderBook>,
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
}

impl TickerService {
    pub fn new(store: Arc<dyn Store>, book: Arc<OrderBook>, broadcaster: Arc<Broadcaster>, interval: Duration) -> Self {
        Self { store, book, broadcaster, interval }
    }

    pub async fn refresh_one(&self, product: &str) {
        let now = Utc::now();
        let best_bid = self.book.best_bid(product);
        let best_ask = self.book.best_ask(product);
        let since = now - chrono::Duration::hours(24);
        let recent_fills = self.store.fills_for_product_since(product, since).await.unwrap_or_else(|err| {
            error!(product, error = %err, "failed to compute rolling volume");
            Vec::new()
        });
        let volume_24h = recent_fills.iter().fold(Decimal::ZERO, |acc, f| acc + f.qty);
        let last_trade_price = match recent_fills.last() {
            Some(f) => Some(f.price),
            None => self
                .store
                .get_market_state(product)
                .await
                .ok()
                .flatten()
                .and_then(|s| s.last_trade_price),
        };

        let state = MarketState {
            product: product.to_string(),
            best_bid,
            best_ask,
            last_trade_price,
            volume_24h,
            updated_at: now,
        };

        if let Err(err) = self.store.upsert_market_state(&state).await {
            error!(product, error = %err, "failed to persist market state");
        }

        self.broadcaster
            .ticker(ServerMessage::Ticker {
                product: product.to_string(),
                best_bid: state.best_bid,
                best_ask: state.best_ask,
                mid: state.mid(),
                volume_24h: state.volume_24h,
                server_time: now.timestamp_millis(),
            })
            .await;
    }

    pub async fn refresh_all(&self, products: &[String]) {
        for product in products {
            self.refresh_one(product).await;
        }
    }

    /// Spawns the periodic refresh loop; returns the task handle so
    /// `main` can track it for shutdown.
    pub fn spawn_periodic(self: Arc<Self>, products: Vec<String>) -> tokio::task::JoinHandle<()> {
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.refresh_all(&products).await;
            }
        })
    }
}
