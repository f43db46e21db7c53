pub mod executor;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{EngineError, EngineResult};
use crate::matching::{try_match, Aggressor, MatchOutcome, OrderBook, OrderEntry, OrderKey};
use crate::models::{Fill, Mode, Order, OrderStatus, Side};
use crate::offer_broker::{OfferBroker, OfferTable};
use crate::session::Broadcaster;
use crate::storage::{Store, TradeUpdate};
use crate::ticker::TickerService;

/// Commands accepted by the Market Engine's single-writer loop
/// (spec.md §4.5).
pub enum EngineCommand {
    /// A brand-new order, already validated and persisted as PENDING by
    /// the router.
    Submit(Order),
    /// Cancels a resting order. No-op (but still acked) if the order is
    /// already terminal.
    Cancel {
        team: String,
        cl_ord_id: String,
        reply: oneshot::Sender<EngineResult<OrderStatus>>,
    },
    /// An offer acceptance, materialized as a virtual SELL order matched
    /// only against the named buy order (spec.md §4.4).
    AcceptOffer {
        offer_id: Uuid,
        buyer_team: String,
        buyer_cl_ord_id: String,
        acceptor_team: String,
        quantity: Decimal,
        price: Decimal,
        reply: oneshot::Sender<EngineResult<()>>,
    },
}

/// Handle cloned into the router, offer broker, and production service
/// to submit commands to the engine without sharing its owned state.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn submit(&self, order: Order) -> EngineResult<()> {
        self.tx
            .try_send(EngineCommand::Submit(order))
            .map_err(|_| EngineError::ServiceUnavailable)
    }

    pub async fn cancel(&self, team: String, cl_ord_id: String) -> EngineResult<OrderStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(EngineCommand::Cancel { team, cl_ord_id, reply })
            .map_err(|_| EngineError::ServiceUnavailable)?;
        rx.await.map_err(|_| EngineError::ServiceUnavailable)?
    }

    pub async fn accept_offer(
        &self,
        offer_id: Uuid,
        buyer_team: String,
        buyer_cl_ord_id: String,
        acceptor_team: String,
        quantity: Decimal,
        price: Decimal,
    ) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(EngineCommand::AcceptOffer {
                offer_id,
                buyer_team,
                buyer_cl_ord_id,
                acceptor_team,
                quantity,
                price,
                reply,
            })
            .map_err(|_| EngineError::ServiceUnavailable)?;
        rx.await.map_err(|_| EngineError::ServiceUnavailable)?
    }
}

/// The single-writer Market Engine: owns the order book and the
/// resting-order working set, serially invokes the matcher and executor,
/// and asynchronously hands residual buys to the offer broker.
pub struct MarketEngine {
    store: Arc<dyn Store>,
    book: Arc<OrderBook>,
    resting: HashMap<OrderKey, Order>,
    broadcaster: Arc<Broadcaster>,
    offer_broker: Arc<OfferBroker>,
    ticker: Arc<TickerService>,
    config: AppConfig,
    rx: mpsc::Receiver<EngineCommand>,
    residuals: VecDeque<Order>,
    sequence: u64,
}

impl MarketEngine {
    pub async fn new(
        store: Arc<dyn Store>,
        book: Arc<OrderBook>,
        broadcaster: Arc<Broadcaster>,
        ticker: Arc<TickerService>,
        offers: OfferTable,
        config: AppConfig,
    ) -> anyhow::Result<(Self, EngineHandle)> {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let handle = EngineHandle { tx: tx.clone() };
        let offer_broker = Arc::new(OfferBroker::new(
            store.clone(),
            broadcaster.clone(),
            offers,
            handle.clone(),
            config.clone(),
        ));

        let mut engine = MarketEngine {
            store,
            book,
            resting: HashMap::new(),
            broadcaster,
            offer_broker,
            ticker,
            config,
            rx,
            residuals: VecDeque::new(),
            sequence: 0,
        };
        engine.recover().await?;
        Ok((engine, handle))
    }

    pub fn offer_broker(&self) -> Arc<OfferBroker> {
        self.offer_broker.clone()
    }

    pub fn book_snapshot(&self) -> &OrderBook {
        &self.book
    }

    /// Rebuilds the book from all PENDING/PARTIALLY_FILLED orders in
    /// storage (spec.md §4.5 Startup). Offers are not restored — they
    /// are ephemeral.
    async fn recover(&mut self) -> anyhow::Result<()> {
        let resting = self.store.resting_orders().await?;
        info!(count = resting.len(), "recovering resting orders into book");
        for order in resting {
            self.insert_into_book(order);
        }
        Ok(())
    }

    fn insert_into_book(&mut self, order: Order) {
        let key = (order.team.clone(), order.cl_ord_id.clone());
        self.sequence += 1;
        let entry = OrderEntry {
            team: order.team.clone(),
            cl_ord_id: order.cl_ord_id.clone(),
            mode: order.mode,
            limit_price: order.limit_price,
            remaining: order.remaining(),
            expires_at: order.expires_at,
            sequence: self.sequence,
        };
        self.book.add(&order.product, order.side, entry);
        self.resting.insert(key, order);
    }

    fn remove_from_book(&mut self, product: &str, team: &str, cl_ord_id: &str) {
        self.book.remove(product, team, cl_ord_id);
        self.resting.remove(&(team.to_string(), cl_ord_id.to_string()));
    }

    /// Drains the command queue until empty or `deadline` elapses
    /// (spec.md §4.5 Shutdown).
    pub async fn run_until_shutdown(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if let Some(order) = self.residuals.pop_front() {
                self.process_order(order).await;
                continue;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("market engine draining remaining commands before shutdown");
                        while let Ok(cmd) = self.rx.try_recv() {
                            self.handle_command(cmd).await;
                        }
                        break;
                    }
                }
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
            }
        }
        info!("market engine stopped");
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Submit(order) => self.process_order(order).await,
            EngineCommand::Cancel { team, cl_ord_id, reply } => {
                let result = self.process_cancel(&team, &cl_ord_id).await;
                let _ = reply.send(result);
            }
            EngineCommand::AcceptOffer {
                offer_id,
                buyer_team,
                buyer_cl_ord_id,
                acceptor_team,
                quantity,
                price,
                reply,
            } => {
                let result = self
                    .process_accept_offer(offer_id, &buyer_team, &buyer_cl_ord_id, &acceptor_team, quantity, price)
                    .await;
                let _ = reply.send(result);
            }
        }
    }

    async fn process_cancel(&mut self, team: &str, cl_ord_id: &str) -> EngineResult<OrderStatus> {
        let Some(order) = self.resting.get(&(team.to_string(), cl_ord_id.to_string())).cloned() else {
            return Err(EngineError::InvalidOrder("order not found or already terminal".into()));
        };
        self.remove_from_book(&order.product, team, cl_ord_id);
        let now = Utc::now();
        self.store
            .update_status(team, cl_ord_id, OrderStatus::Cancelled, now)
            .await?;
        self.broadcaster
            .order_ack(team, cl_ord_id, OrderStatus::Cancelled, now)
            .await;
        Ok(OrderStatus::Cancelled)
    }

    /// Main per-command pipeline (spec.md §4.5):
    /// expiry check -> matcher -> executor -> residual re-enqueue / book
    /// insert + offer targeting.
    async fn process_order(&mut self, mut order: Order) {
        let now = Utc::now();
        if order.is_expired(now) {
            debug!(team = %order.team, cl_ord_id = %order.cl_ord_id, "order expired before matching");
            if let Err(err) = self
                .store
                .update_status(&order.team, &order.cl_ord_id, OrderStatus::Cancelled, now)
                .await
            {
                error!(error = %err, "failed to persist expiry cancellation");
            }
            self.broadcaster
                .order_ack(&order.team, &order.cl_ord_id, OrderStatus::Cancelled, now)
                .await;
            return;
        }

        let aggressor = Aggressor {
            team: order.team.clone(),
            cl_ord_id: order.cl_ord_id.clone(),
            side: order.side,
            mode: order.mode,
            limit_price: order.limit_price,
            remaining: order.remaining(),
        };

        let book = self.book.book_for(&order.product);
        let outcome = try_match(&aggressor, &book, now);
        drop(book);

        match outcome {
            MatchOutcome::NoPriceReference => {
                warn!(team = %order.team, cl_ord_id = %order.cl_ord_id, "market order rejected: no price reference");
                self.broadcaster
                    .error(&order.team, Some(&order.cl_ord_id), EngineError::NoPriceReference, now)
                    .await;
            }
            MatchOutcome::NoMatch => {
                self.rest_new_order(order, now).await;
            }
            MatchOutcome::Matched(descriptor) => {
                let maker_key = (descriptor.maker.team.clone(), descriptor.maker.cl_ord_id.clone());
                let Some(mut maker_order) = self.resting.get(&maker_key).cloned() else {
                    // Maker vanished between the book scan and here (shouldn't
                    // happen under the single-writer model); treat as no-match.
                    self.rest_new_order(order, now).await;
                    return;
                };

                let trade_qty = descriptor.trade_qty;
                let trade_price = descriptor.trade_price;

                let mut aggressor_order = order.clone();
                aggressor_order.apply_fill(trade_qty, now);
                maker_order.apply_fill(trade_qty, now);

                let (buyer_order, seller_order, buyer_team, seller_team) = match order.side {
                    Side::Buy => (
                        aggressor_order.clone(),
                        maker_order.clone(),
                        order.team.clone(),
                        maker_order.team.clone(),
                    ),
                    Side::Sell => (
                        maker_order.clone(),
                        aggressor_order.clone(),
                        maker_order.team.clone(),
                        order.team.clone(),
                    ),
                };

                let fill = Fill {
                    id: Uuid::new_v4(),
                    buyer_team: buyer_team.clone(),
                    seller_team: seller_team.clone(),
                    buyer_cl_ord_id: buyer_order.cl_ord_id.clone(),
                    seller_cl_ord_id: seller_order.cl_ord_id.clone(),
                    product: order.product.clone(),
                    qty: trade_qty,
                    price: trade_price,
                    buyer_message: buyer_order.message.clone(),
                    seller_message: seller_order.message.clone(),
                    executed_at: now,
                };

                let update = TradeUpdate {
                    buyer_order: buyer_order.clone(),
                    seller_order: seller_order.clone(),
                    fill: fill.clone(),
                    buyer_team: buyer_team.clone(),
                    seller_team: seller_team.clone(),
                    product: order.product.clone(),
                    qty: trade_qty,
                    cost: trade_qty * trade_price,
                };

                match executor::execute_trade_with_retry(
                    self.store.as_ref(),
                    update,
                    self.config.transaction_retries,
                )
                .await
                {
                    Ok(()) => {
                        // Commit succeeded: apply book mutations now.
                        self.book.reduce(&order.product, &maker_key.0, &maker_key.1, trade_qty);
                        if maker_order.remaining() <= Decimal::ZERO {
                            self.resting.remove(&maker_key);
                        } else {
                            self.resting.insert(maker_key, maker_order.clone());
                        }

                        self.broadcaster.fill(&fill, buyer_order.remaining(), buyer_order.qty, seller_order.remaining(), seller_order.qty).await;
                        self.broadcaster.balance_inventory_refresh(&buyer_team, self.store.as_ref()).await;
                        self.broadcaster.balance_inventory_refresh(&seller_team, self.store.as_ref()).await;
                        self.request_ticker_refresh(&order.product).await;

                        if aggressor_order.remaining() > Decimal::ZERO {
                            order = aggressor_order;
                            self.residuals.push_front(order);
                        } else {
                            self.broadcaster
                                .order_ack(&aggressor_order.team, &aggressor_order.cl_ord_id, aggressor_order.status, now)
                                .await;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "trade execution failed after retries, aborting match");
                        self.broadcaster
                            .error(&order.team, Some(&order.cl_ord_id), err, now)
                            .await;
                        // Book is left exactly as it was before this match
                        // attempt; the aggressor goes back to the queue head
                        // to be retried against the (unchanged) book.
                        self.residuals.push_front(order);
                    }
                }
            }
        }
    }

    /// Persists a non-matching order as PENDING, adds it to the book, and
    /// for a residual BUY asynchronously asks the offer broker to target
    /// eligible inventory-holding teams (spec.md §4.5 step 4, §4.4).
    async fn rest_new_order(&mut self, order: Order, now: chrono::DateTime<Utc>) {
        if let Err(err) = self.store.insert_order(&order).await {
            error!(error = %err, "failed to persist resting order");
            self.broadcaster
                .error(&order.team, Some(&order.cl_ord_id), err, now)
                .await;
            return;
        }
        self.broadcaster
            .order_ack(&order.team, &order.cl_ord_id, order.status, now)
            .await;

        let triggers_offer = order.side == Side::Buy && order.remaining() > Decimal::ZERO;
        self.insert_into_book(order.clone());

        if triggers_offer {
            let broker = self.offer_broker.clone();
            tokio::spawn(async move {
                broker.generate_offer(&order).await;
            });
        }
    }

    async fn request_ticker_refresh(&self, product: &str) {
        self.ticker.refresh_one(product).await;
    }

    async fn process_accept_offer(
        &mut self,
        offer_id: Uuid,
        buyer_team: &str,
        buyer_cl_ord_id: &str,
        acceptor_team: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> EngineResult<()> {
        let key = (buyer_team.to_string(), buyer_cl_ord_id.to_string());
        let Some(mut buyer_order) = self.resting.get(&key).cloned() else {
            return Err(EngineError::InvalidOrder("target buy order no longer resting".into()));
        };
        let now = Utc::now();
        let trade_qty = quantity.min(buyer_order.remaining());
        if trade_qty <= Decimal::ZERO {
            return Err(EngineError::InvalidQuantity);
        }

        let mut seller_order = Order {
            cl_ord_id: format!("offer-{offer_id}"),
            team: acceptor_team.to_string(),
            side: Side::Sell,
            mode: Mode::Market,
            product: buyer_order.product.clone(),
            qty: trade_qty,
            filled: Decimal::ZERO,
            limit_price: None,
            expires_at: None,
            message: None,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        buyer_order.apply_fill(trade_qty, now);
        seller_order.apply_fill(trade_qty, now);

        let fill = Fill {
            id: Uuid::new_v4(),
            buyer_team: buyer_team.to_string(),
            seller_team: acceptor_team.to_string(),
            buyer_cl_ord_id: buyer_cl_ord_id.to_string(),
            seller_cl_ord_id: seller_order.cl_ord_id.clone(),
            product: buyer_order.product.clone(),
            qty: trade_qty,
            price,
            buyer_message: buyer_order.message.clone(),
            seller_message: None,
            executed_at: now,
        };

        let update = TradeUpdate {
            buyer_order: buyer_order.clone(),
            seller_order: seller_order.clone(),
            fill: fill.clone(),
            buyer_team: buyer_team.to_string(),
            seller_team: acceptor_team.to_string(),
            product: buyer_order.product.clone(),
            qty: trade_qty,
            cost: trade_qty * price,
        };

        executor::execute_trade_with_retry(self.store.as_ref(), update, self.config.transaction_retries).await?;

        self.book.reduce(&buyer_order.product, buyer_team, buyer_cl_ord_id, trade_qty);
        if buyer_order.remaining() <= Decimal::ZERO {
            self.resting.remove(&key);
        } else {
            self.resting.insert(key, buyer_order.clone());
        }

        self.broadcaster.fill(&fill, buyer_order.remaining(), buyer_order.qty, Decimal::ZERO, seller_order.qty).await;
        self.broadcaster.balance_inventory_refresh(buyer_team, self.store.as_ref()).await;
        self.broadcaster.balance_inventory_refresh(acceptor_team, self.store.as_ref()).await;
        self.request_ticker_refresh(&buyer_order.product).await;

        Ok(())
    }
}

/// End-to-end scenarios from spec.md §8, driven against a real
/// `MarketEngine` over `InMemoryStore`. The teacher has no equivalent
/// integration-test layer (it only unit-tests `orderbook.rs`/`types.rs`
/// in isolation) — these are colocated here, the same `#[cfg(test)]
/// mod tests` convention, rather than under a `tests/` directory, since
/// this crate ships no library target for external test binaries to
/// link against.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Team;
    use crate::session::SessionRegistry;
    use crate::storage::InMemoryStore;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::time::Duration as StdDuration;

    fn team(id: &str, balance: Decimal, inventory: &[(&str, Decimal)]) -> Team {
        Team {
            id: id.into(),
            name: id.into(),
            balance,
            inventory: inventory.iter().map(|(p, q)| (p.to_string(), *q)).collect(),
            authorized_products: vec![],
            recipes: HashMap::new(),
        }
    }

    struct Harness {
        handle: EngineHandle,
        offer_broker: Arc<OfferBroker>,
        offers: OfferTable,
        store: Arc<dyn Store>,
    }

    async fn harness(teams: Vec<Team>) -> Harness {
        let concrete = InMemoryStore::new();
        for t in teams {
            concrete.seed_team(t);
        }
        let store: Arc<dyn Store> = Arc::new(concrete);

        let registry = SessionRegistry::new();
        let broadcaster = Arc::new(Broadcaster::new(registry));
        let book = Arc::new(OrderBook::new());
        let ticker = Arc::new(TickerService::new(store.clone(), book.clone(), broadcaster.clone(), StdDuration::from_secs(5)));
        let offers = crate::offer_broker::new_offer_table();
        let config = AppConfig::default();

        let (engine, handle) =
            MarketEngine::new(store.clone(), book.clone(), broadcaster, ticker, offers.clone(), config)
                .await
                .unwrap();
        let offer_broker = engine.offer_broker();
        let (_tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(engine.run_until_shutdown(rx));

        Harness { handle, offer_broker, offers, store }
    }

    fn limit_order(team: &str, cl_ord_id: &str, side: Side, product: &str, qty: Decimal, price: Decimal) -> Order {
        let now = Utc::now();
        Order {
            cl_ord_id: cl_ord_id.into(),
            team: team.into(),
            side,
            mode: Mode::Limit,
            product: product.into(),
            qty,
            filled: Decimal::ZERO,
            limit_price: Some(price),
            expires_at: None,
            message: None,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    async fn wait_until<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return true;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn instant_cross_fills_both_sides() {
        let h = harness(vec![
            team("alpha", dec!(1000), &[]),
            team("beta", dec!(0), &[("GUACA", dec!(50))]),
        ])
        .await;

        h.handle.submit(limit_order("beta", "s1", Side::Sell, "GUACA", dec!(10), dec!(9))).await.unwrap();
        wait_until(|| async {
            matches!(h.store.get_order("beta", "s1").await, Ok(Some(o)) if o.status == OrderStatus::Pending)
        })
        .await;
        h.handle.submit(limit_order("alpha", "b1", Side::Buy, "GUACA", dec!(10), dec!(9))).await.unwrap();

        let filled = wait_until(|| async {
            matches!(h.store.get_order("alpha", "b1").await, Ok(Some(o)) if o.status == OrderStatus::Filled)
        })
        .await;
        assert!(filled, "buy order should have been fully filled");

        let alpha = h.store.get_team("alpha").await.unwrap().unwrap();
        let beta = h.store.get_team("beta").await.unwrap().unwrap();
        assert_eq!(alpha.balance, dec!(910));
        assert_eq!(alpha.inventory_of("GUACA"), dec!(10));
        assert_eq!(beta.balance, dec!(90));
        assert_eq!(beta.inventory_of("GUACA"), dec!(40));
    }

    #[tokio::test]
    async fn partial_fill_residual_generates_an_offer() {
        let h = harness(vec![
            team("alpha", dec!(1000), &[]),
            team("beta", dec!(0), &[("GUACA", dec!(5))]),
            team("gamma", dec!(0), &[("GUACA", dec!(100))]),
        ])
        .await;

        h.handle.submit(limit_order("beta", "s1", Side::Sell, "GUACA", dec!(5), dec!(9))).await.unwrap();
        wait_until(|| async {
            matches!(h.store.get_order("beta", "s1").await, Ok(Some(o)) if o.status == OrderStatus::Pending)
        })
        .await;

        h.handle.submit(limit_order("alpha", "b1", Side::Buy, "GUACA", dec!(10), dec!(9))).await.unwrap();

        let offered = wait_until(|| async { !h.offers.is_empty() }).await;
        assert!(offered, "residual buy quantity should have triggered an offer");

        let offer = h.offers.iter().next().unwrap().clone();
        assert_eq!(offer.buyer_team, "alpha");
        assert_eq!(offer.quantity_requested, dec!(5));
    }

    #[tokio::test]
    async fn first_acceptance_wins_the_offer() {
        let h = harness(vec![
            team("alpha", dec!(1000), &[]),
            team("acceptor1", dec!(0), &[("GUACA", dec!(50))]),
            team("acceptor2", dec!(0), &[("GUACA", dec!(50))]),
        ])
        .await;

        h.handle.submit(limit_order("alpha", "b1", Side::Buy, "GUACA", dec!(10), dec!(9))).await.unwrap();
        wait_until(|| async {
            matches!(h.store.get_order("alpha", "b1").await, Ok(Some(o)) if o.status == OrderStatus::Pending)
        })
        .await;

        let offer_id = uuid::Uuid::new_v4();
        h.offers.insert(
            offer_id,
            crate::models::Offer {
                id: offer_id,
                buyer_team: "alpha".into(),
                buyer_cl_ord_id: "b1".into(),
                product: "GUACA".into(),
                quantity_requested: dec!(10),
                max_price: dec!(9),
                expires_at: Utc::now() + chrono::Duration::seconds(30),
                status: crate::models::OfferStatus::Active,
            },
        );

        let first = h.offer_broker.accept_offer(offer_id, "acceptor1", dec!(10), dec!(9)).await;
        let second = h.offer_broker.accept_offer(offer_id, "acceptor2", dec!(10), dec!(9)).await;

        assert!(first.is_ok());
        assert!(matches!(second, Err(EngineError::OfferTaken)));
    }

    #[tokio::test]
    async fn self_trade_is_prevented_and_both_orders_rest() {
        let h = harness(vec![team("alpha", dec!(1000), &[("GUACA", dec!(50))])]).await;

        h.handle.submit(limit_order("alpha", "b1", Side::Buy, "GUACA", dec!(10), dec!(10))).await.unwrap();
        wait_until(|| async {
            matches!(h.store.get_order("alpha", "b1").await, Ok(Some(o)) if o.status == OrderStatus::Pending)
        })
        .await;

        h.handle.submit(limit_order("alpha", "s1", Side::Sell, "GUACA", dec!(10), dec!(10))).await.unwrap();
        let rested = wait_until(|| async {
            matches!(h.store.get_order("alpha", "s1").await, Ok(Some(o)) if o.status == OrderStatus::Pending)
        })
        .await;
        assert!(rested, "sell order should rest instead of matching its own team's buy");

        let buy = h.store.get_order("alpha", "b1").await.unwrap().unwrap();
        assert_eq!(buy.status, OrderStatus::Pending);
        assert_eq!(buy.filled, Decimal::ZERO);
    }

    #[tokio::test]
    async fn insufficient_balance_aborts_match_and_preserves_the_book() {
        let h = harness(vec![
            team("alpha", dec!(0), &[]),
            team("beta", dec!(0), &[("GUACA", dec!(50))]),
        ])
        .await;

        h.handle.submit(limit_order("beta", "s1", Side::Sell, "GUACA", dec!(10), dec!(9))).await.unwrap();
        wait_until(|| async {
            matches!(h.store.get_order("beta", "s1").await, Ok(Some(o)) if o.status == OrderStatus::Pending)
        })
        .await;

        h.handle.submit(limit_order("alpha", "b1", Side::Buy, "GUACA", dec!(10), dec!(9))).await.unwrap();
        let rested = wait_until(|| async {
            matches!(h.store.get_order("alpha", "b1").await, Ok(Some(o)) if o.status == OrderStatus::Pending)
        })
        .await;
        assert!(rested, "order should rest unfilled after the executor rejects it");

        let seller = h.store.get_order("beta", "s1").await.unwrap().unwrap();
        assert_eq!(seller.status, OrderStatus::Pending);
        assert_eq!(seller.filled, Decimal::ZERO, "maker leg must be untouched when the transaction aborts");
    }
}
