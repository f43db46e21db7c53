use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::EngineError;
use crate::models::{Fill, Offer, OrderStatus, Side};
use crate::storage::Store;
use crate::ws::protocol::ServerMessage;

use super::registry::SessionRegistry;

/// Targeted send + fan-out over the session registry, with best-effort
/// delivery semantics (spec.md §4.8). Grounded in
/// `websocket/handler.rs`'s broadcast-consumption loop, adapted from
/// "subscribe to a shared broadcast channel" to "call directly from the
/// engine/executor after commit" since this exchange's fan-out set
/// (one team, or all teams) is decided by the caller, not by client
/// subscriptions.
#[derive(Clone)]
pub struct Broadcaster {
    registry: SessionRegistry,
}

impl Broadcaster {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    pub async fn send_to_team(&self, team: &str, msg: &ServerMessage) {
        let payload = msg.to_json();
        for session in self.registry.sessions_for(team) {
            session.send(&payload).await;
        }
    }

    pub async fn broadcast_all(&self, msg: &ServerMessage) {
        let payload = msg.to_json();
        for session in self.registry.all_sessions() {
            session.send(&payload).await;
        }
    }

    pub async fn order_ack(&self, team: &str, cl_ord_id: &str, status: OrderStatus, now: DateTime<Utc>) {
        self.send_to_team(
            team,
            &ServerMessage::OrderAck {
                cl_ord_id: cl_ord_id.to_string(),
                status,
                server_time: now.timestamp_millis(),
            },
        )
        .await;
    }

    pub async fn fill(
        &self,
        fill: &Fill,
        buyer_remaining: Decimal,
        buyer_total: Decimal,
        seller_remaining: Decimal,
        seller_total: Decimal,
    ) {
        let now = fill.executed_at.timestamp_millis();
        self.send_to_team(
            &fill.buyer_team,
            &ServerMessage::Fill {
                cl_ord_id: fill.buyer_cl_ord_id.clone(),
                fill_qty: fill.qty,
                fill_price: fill.price,
                side: Side::Buy,
                product: fill.product.clone(),
                counterparty: fill.seller_team.clone(),
                counterparty_message: fill.seller_message.clone(),
                server_time: now,
                remaining_qty: buyer_remaining,
                total_qty: buyer_total,
            },
        )
        .await;
        self.send_to_team(
            &fill.seller_team,
            &ServerMessage::Fill {
                cl_ord_id: fill.seller_cl_ord_id.clone(),
                fill_qty: fill.qty,
                fill_price: fill.price,
                side: Side::Sell,
                product: fill.product.clone(),
                counterparty: fill.buyer_team.clone(),
                counterparty_message: fill.buyer_message.clone(),
                server_time: now,
                remaining_qty: seller_remaining,
                total_qty: seller_total,
            },
        )
        .await;
    }

    pub async fn balance_inventory_refresh(&self, team: &str, store: &dyn Store) {
        let now = Utc::now().timestamp_millis();
        match store.get_team(team).await {
            Ok(Some(t)) => {
                self.send_to_team(team, &ServerMessage::BalanceUpdate { balance: t.balance, server_time: now }).await;
                self.send_to_team(
                    team,
                    &ServerMessage::InventoryUpdate { inventory: t.inventory, server_time: now },
                )
                .await;
            }
            Ok(None) => tracing::warn!(team, "balance/inventory refresh requested for unknown team"),
            Err(err) => tracing::error!(team, error = %err, "failed to load team for refresh"),
        }
    }

    pub async fn offer(&self, team: &str, offer: &Offer, now: DateTime<Utc>) {
        self.send_to_team(
            team,
            &ServerMessage::Offer {
                offer_id: offer.id,
                buyer: offer.buyer_team.clone(),
                product: offer.product.clone(),
                quantity_requested: offer.quantity_requested,
                max_price: offer.max_price,
                expires_in: offer.expires_in(now),
                timestamp: now.timestamp_millis(),
            },
        )
        .await;
    }

    pub async fn error(&self, team: &str, cl_ord_id: Option<&str>, error: EngineError, now: DateTime<Utc>) {
        self.send_to_team(
            team,
            &ServerMessage::Error {
                code: error.wire_code().to_string(),
                reason: error.to_string(),
                cl_ord_id: cl_ord_id.map(|s| s.to_string()),
                timestamp: now.timestamp_millis(),
            },
        )
        .await;
    }

    pub async fn ticker(&self, msg: ServerMessage) {
        self.broadcast_all(&msg).await;
    }

    pub async fn broadcast_notification(&self, message: &str, sender: &str, now: DateTime<Utc>) {
        self.broadcast_all(&ServerMessage::BroadcastNotification {
            message: message.to_string(),
            sender: sender.to_string(),
            server_time: now.timestamp_millis(),
        })
        .await;
    }
}
