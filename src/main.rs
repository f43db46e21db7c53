use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod config;
mod engine;
mod error;
mod matching;
mod models;
mod offer_broker;
mod production;
mod rate_limit;
mod session;
mod storage;
mod ticker;
mod ws;

use crate::auth::JwtManager;
use crate::config::AppConfig;
use crate::engine::{EngineHandle, MarketEngine};
use crate::matching::OrderBook;
use crate::offer_broker::{new_offer_table, OfferBroker};
use crate::production::ProductionService;
use crate::rate_limit::RateLimiter;
use crate::session::{Broadcaster, SessionRegistry};
use crate::storage::{InMemoryStore, PostgresStore, Store};
use crate::ticker::TickerService;

/// Shared handles reachable from every axum route and the websocket
/// handler. Grounded in the teacher's own `AppState`, trimmed to the
/// services this exchange actually has.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub engine: EngineHandle,
    pub offer_broker: Arc<OfferBroker>,
    pub production: Arc<ProductionService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub registry: SessionRegistry,
    pub broadcaster: Arc<Broadcaster>,
    pub jwt: Arc<JwtManager>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            tracing::info!("connecting to postgres");
            Arc::new(PostgresStore::connect(url).await?)
        }
        None => {
            tracing::warn!("no database_url configured, falling back to the in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let registry = SessionRegistry::new();
    let broadcaster = Arc::new(Broadcaster::new(registry.clone()));
    let book = Arc::new(OrderBook::new());
    let ticker = Arc::new(TickerService::new(
        store.clone(),
        book.clone(),
        broadcaster.clone(),
        config.ticker_interval(),
    ));
    let offers = new_offer_table();

    let (engine, engine_handle) = MarketEngine::new(
        store.clone(),
        book.clone(),
        broadcaster.clone(),
        ticker.clone(),
        offers,
        config.clone(),
    )
    .await?;
    let offer_broker = engine.offer_broker();
    let production = Arc::new(ProductionService::new(store.clone(), broadcaster.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
    let jwt = Arc::new(JwtManager::new(&config.jwt_secret));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run_until_shutdown(shutdown_rx));
    let ticker_task = ticker.clone().spawn_periodic(config.products.clone());
    let sweeper_task = offer_broker.clone().spawn_sweeper();

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        engine: engine_handle,
        offer_broker,
        production,
        rate_limiter,
        registry,
        broadcaster,
        jwt,
    });

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .merge(api::create_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from_str(&config.bind_addr)?;
    tracing::info!(%addr, "market engine listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    ticker_task.abort();
    sweeper_task.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
