use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::models::{Fill, Mode, Order, OrderStatus, Side};
use crate::rate_limit::ActionClass;
use crate::session::Session;
use crate::storage::Store;
use crate::ws::protocol::{ClientMessage, ServerMessage};
use crate::AppState;

/// Read heartbeat window (spec.md §5). Distinct from the configurable
/// `heartbeatInterval`, which governs client-side ping cadence.
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_MESSAGE_LEN: usize = 200;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut receiver) = socket.split();

    let team = match authenticate(&mut sink, &mut receiver, &state).await {
        Some(team) => team,
        None => return,
    };

    let session = Arc::new(Session::new(team.clone(), sink));
    state.registry.register(session.clone());
    info!(team = %team, session = %session.id, "session authenticated");

    loop {
        match tokio::time::timeout(READ_TIMEOUT, receiver.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                handle_frame(&text, &team, &state).await;
            }
            Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(err))) => {
                warn!(team = %team, error = %err, "websocket read error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(team = %team, "read heartbeat window expired, closing session");
                break;
            }
        }
    }

    state.registry.deregister(&team, session.id);
    info!(team = %team, "session closed");
}

/// Pre-authentication loop: the socket's write half is not yet wrapped in
/// a [`Session`], so `LOGIN_OK`/`AUTH_FAILED` are written directly to it.
async fn authenticate(
    sink: &mut SplitSink<WebSocket, Message>,
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &Arc<AppState>,
) -> Option<String> {
    let raw = match tokio::time::timeout(READ_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => return None,
    };

    let login = match serde_json::from_str::<ClientMessage>(&raw) {
        Ok(ClientMessage::Login { token, .. }) => token,
        _ => {
            send_raw(sink, &auth_failed("expected LOGIN as the first frame")).await;
            return None;
        }
    };

    let claims = match state.jwt.verify_token(&login) {
        Ok(claims) => claims,
        Err(err) => {
            warn!(error = %err, "login token verification failed");
            send_raw(sink, &auth_failed("invalid or expired token")).await;
            return None;
        }
    };

    let team = match state.store.get_team(&claims.sub).await {
        Ok(Some(team)) => team,
        Ok(None) => {
            send_raw(sink, &auth_failed("unknown team")).await;
            return None;
        }
        Err(err) => {
            warn!(error = %err, "storage error looking up team at login");
            send_raw(sink, &auth_failed("storage unavailable")).await;
            return None;
        }
    };

    let now = Utc::now();
    let ok = ServerMessage::LoginOk {
        team: team.id.clone(),
        species: claims.species,
        initial_balance: claims.initial_balance,
        current_balance: team.balance,
        inventory: team.inventory,
        authorized_products: team.authorized_products,
        recipes: team.recipes,
        role: claims.role,
        server_time: now.timestamp_millis(),
    };
    send_raw(sink, &ok.to_json()).await;
    Some(team.id)
}

fn auth_failed(reason: &str) -> String {
    ServerMessage::Error {
        code: EngineError::AuthFailed.wire_code().to_string(),
        reason: reason.to_string(),
        cl_ord_id: None,
        timestamp: Utc::now().timestamp_millis(),
    }
    .to_json()
}

async fn send_raw(sink: &mut SplitSink<WebSocket, Message>, payload: &str) {
    if let Err(err) = sink.send(Message::Text(payload.to_string())).await {
        warn!(error = %err, "failed to write pre-auth frame");
    }
}

async fn handle_frame(raw: &str, team: &str, state: &Arc<AppState>) {
    let msg: ClientMessage = match serde_json::from_str(raw) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(team, error = %err, "malformed frame");
            reply_error(state, team, None, EngineError::InvalidOrder("malformed frame".into())).await;
            return;
        }
    };

    match msg {
        ClientMessage::Login { .. } => {
            // Already authenticated; a second LOGIN on the same connection is ignored.
        }
        ClientMessage::Order {
            cl_ord_id,
            side,
            mode,
            product,
            qty,
            limit_price,
            expires_at,
            message,
            debug_mode: _,
        } => {
            handle_order(state, team, cl_ord_id, side, mode, product, qty, limit_price, expires_at, message).await;
        }
        ClientMessage::Cancel { cl_ord_id } => {
            handle_cancel(state, team, cl_ord_id).await;
        }
        ClientMessage::AcceptOffer { offer_id, accept, quantity_offered, price_offered } => {
            if !accept {
                return;
            }
            if !state.rate_limiter.allow(team, ActionClass::OfferReply) {
                reply_error(state, team, None, EngineError::RateLimitExceeded).await;
                return;
            }
            if let Err(err) = state.offer_broker.accept_offer(offer_id, team, quantity_offered, price_offered).await {
                reply_error(state, team, None, err).await;
            }
        }
        ClientMessage::ProductionUpdate { product, quantity } => {
            if !state.rate_limiter.allow(team, ActionClass::Production) {
                reply_error(state, team, None, EngineError::RateLimitExceeded).await;
                return;
            }
            if let Err(err) = state.production.produce(team, &product, quantity).await {
                reply_error(state, team, None, err).await;
            }
        }
        ClientMessage::Resync { last_sync } => {
            handle_resync(state, team, last_sync).await;
        }
        ClientMessage::RequestAllOrders => {
            handle_request_all_orders(state, team).await;
        }
        ClientMessage::Ping { timestamp } => {
            state.broadcaster.send_to_team(team, &ServerMessage::Pong { timestamp }).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_order(
    state: &Arc<AppState>,
    team: &str,
    cl_ord_id: String,
    side: Side,
    mode: Mode,
    product: String,
    qty: Decimal,
    limit_price: Option<Decimal>,
    expires_at: Option<i64>,
    message: Option<String>,
) {
    if let Some(ref msg) = message {
        if msg.chars().count() > MAX_MESSAGE_LEN {
            reply_error(state, team, Some(&cl_ord_id), EngineError::InvalidOrder("message exceeds 200 characters".into())).await;
            return;
        }
    }
    if !state.config.is_known_product(&product) {
        reply_error(state, team, Some(&cl_ord_id), EngineError::InvalidProduct(product)).await;
        return;
    }
    if qty <= Decimal::ZERO {
        reply_error(state, team, Some(&cl_ord_id), EngineError::InvalidQuantity).await;
        return;
    }
    if mode == Mode::Limit && !limit_price.is_some_and(|p| p > Decimal::ZERO) {
        reply_error(state, team, Some(&cl_ord_id), EngineError::InvalidOrder("LIMIT order requires price > 0".into())).await;
        return;
    }
    match state.store.order_exists(team, &cl_ord_id).await {
        Ok(true) => {
            reply_error(state, team, Some(&cl_ord_id), EngineError::DuplicateOrderId(cl_ord_id)).await;
            return;
        }
        Ok(false) => {}
        Err(err) => {
            reply_error(state, team, Some(&cl_ord_id), err).await;
            return;
        }
    }
    if !state.rate_limiter.allow(team, ActionClass::Order) {
        reply_error(state, team, Some(&cl_ord_id), EngineError::RateLimitExceeded).await;
        return;
    }

    let now = Utc::now();
    let order = Order {
        cl_ord_id: cl_ord_id.clone(),
        team: team.to_string(),
        side,
        mode,
        product,
        qty,
        filled: Decimal::ZERO,
        limit_price: if mode == Mode::Limit { limit_price } else { None },
        expires_at: expires_at.and_then(DateTime::from_timestamp_millis),
        message,
        status: OrderStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    // The router owns the request-received -> PENDING transition (spec.md
    // §4.9/§3): the order must exist in the store before it ever reaches the
    // matcher, otherwise an order that fully matches on its first pass has
    // nothing for the executor's UPDATE to touch.
    if let Err(err) = state.store.insert_order(&order).await {
        reply_error(state, team, Some(&cl_ord_id), err).await;
        return;
    }

    if let Err(err) = state.engine.submit(order).await {
        reply_error(state, team, Some(&cl_ord_id), err).await;
    }
}

async fn handle_cancel(state: &Arc<AppState>, team: &str, cl_ord_id: String) {
    if let Err(err) = state.engine.cancel(team.to_string(), cl_ord_id.clone()).await {
        reply_error(state, team, Some(&cl_ord_id), err).await;
    }
}

async fn handle_resync(state: &Arc<AppState>, team: &str, last_sync: i64) {
    let now = Utc::now();
    let floor = now - chrono::Duration::seconds(state.config.resync_lookback_secs);
    let requested = DateTime::from_timestamp_millis(last_sync).unwrap_or(floor);
    let since = requested.max(floor);

    let fills = match state.store.fills_for_team_since(team, since).await {
        Ok(fills) => fills,
        Err(err) => {
            reply_error(state, team, None, err).await;
            return;
        }
    };

    let mut events = Vec::with_capacity(fills.len());
    for fill in &fills {
        events.push(fill_to_message(state.store.as_ref(), team, fill).await);
    }

    state
        .broadcaster
        .send_to_team(team, &ServerMessage::EventDelta { events, server_time: now.timestamp_millis() })
        .await;
}

async fn handle_request_all_orders(state: &Arc<AppState>, team: &str) {
    match state.store.orders_for_team(team).await {
        Ok(orders) => {
            state
                .broadcaster
                .send_to_team(team, &ServerMessage::AllOrders { orders, server_time: Utc::now().timestamp_millis() })
                .await;
        }
        Err(err) => reply_error(state, team, None, err).await,
    }
}

async fn fill_to_message(store: &dyn Store, team: &str, fill: &Fill) -> ServerMessage {
    let (cl_ord_id, side) = if fill.buyer_team == team {
        (fill.buyer_cl_ord_id.clone(), Side::Buy)
    } else {
        (fill.seller_cl_ord_id.clone(), Side::Sell)
    };
    let (remaining_qty, total_qty) = match store.get_order(team, &cl_ord_id).await {
        Ok(Some(order)) => (order.remaining(), order.qty),
        _ => (Decimal::ZERO, fill.qty),
    };

    ServerMessage::Fill {
        cl_ord_id,
        fill_qty: fill.qty,
        fill_price: fill.price,
        side,
        product: fill.product.clone(),
        counterparty: fill.counterparty(team).to_string(),
        counterparty_message: fill.counterparty_message(team).map(|s| s.to_string()),
        server_time: fill.executed_at.timestamp_millis(),
        remaining_qty,
        total_qty,
    }
}

async fn reply_error(state: &Arc<AppState>, team: &str, cl_ord_id: Option<&str>, err: EngineError) {
    state.broadcaster.error(team, cl_ord_id, err, Utc::now()).await;
}
