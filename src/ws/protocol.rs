use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Mode, OrderStatus, Recipe, Side};

/// Inbound frames (client -> server), tagged on `type` like the
/// teacher's `websocket/handler.rs::ClientMessage`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Login {
        token: String,
        tz: Option<String>,
    },
    Order {
        #[serde(rename = "clOrdID")]
        cl_ord_id: String,
        side: Side,
        mode: Mode,
        product: String,
        qty: Decimal,
        #[serde(rename = "limitPrice")]
        limit_price: Option<Decimal>,
        #[serde(rename = "expiresAt")]
        expires_at: Option<i64>,
        message: Option<String>,
        #[serde(rename = "debugMode")]
        debug_mode: Option<bool>,
    },
    Cancel {
        #[serde(rename = "clOrdID")]
        cl_ord_id: String,
    },
    AcceptOffer {
        #[serde(rename = "offerId")]
        offer_id: Uuid,
        accept: bool,
        #[serde(rename = "quantityOffered")]
        quantity_offered: Decimal,
        #[serde(rename = "priceOffered")]
        price_offered: Decimal,
    },
    ProductionUpdate {
        product: String,
        quantity: Decimal,
    },
    Resync {
        #[serde(rename = "lastSync")]
        last_sync: i64,
    },
    RequestAllOrders,
    Ping {
        timestamp: i64,
    },
}

/// Outbound frames (server -> client), tagged the same way.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    LoginOk {
        team: String,
        species: String,
        #[serde(rename = "initialBalance")]
        initial_balance: Decimal,
        #[serde(rename = "currentBalance")]
        current_balance: Decimal,
        inventory: HashMap<String, Decimal>,
        #[serde(rename = "authorizedProducts")]
        authorized_products: Vec<String>,
        recipes: HashMap<String, Recipe>,
        role: String,
        #[serde(rename = "serverTime")]
        server_time: i64,
    },
    OrderAck {
        #[serde(rename = "clOrdID")]
        cl_ord_id: String,
        status: OrderStatus,
        #[serde(rename = "serverTime")]
        server_time: i64,
    },
    Fill {
        #[serde(rename = "clOrdID")]
        cl_ord_id: String,
        #[serde(rename = "fillQty")]
        fill_qty: Decimal,
        #[serde(rename = "fillPrice")]
        fill_price: Decimal,
        side: Side,
        product: String,
        counterparty: String,
        #[serde(rename = "counterpartyMessage")]
        counterparty_message: Option<String>,
        #[serde(rename = "serverTime")]
        server_time: i64,
        #[serde(rename = "remainingQty")]
        remaining_qty: Decimal,
        #[serde(rename = "totalQty")]
        total_qty: Decimal,
    },
    Ticker {
        product: String,
        #[serde(rename = "bestBid")]
        best_bid: Option<Decimal>,
        #[serde(rename = "bestAsk")]
        best_ask: Option<Decimal>,
        mid: Option<Decimal>,
        #[serde(rename = "volume24h")]
        volume_24h: Decimal,
        #[serde(rename = "serverTime")]
        server_time: i64,
    },
    Offer {
        #[serde(rename = "offerId")]
        offer_id: Uuid,
        buyer: String,
        product: String,
        #[serde(rename = "quantityRequested")]
        quantity_requested: Decimal,
        #[serde(rename = "maxPrice")]
        max_price: Decimal,
        #[serde(rename = "expiresIn")]
        expires_in: i64,
        timestamp: i64,
    },
    BalanceUpdate {
        balance: Decimal,
        #[serde(rename = "serverTime")]
        server_time: i64,
    },
    InventoryUpdate {
        inventory: HashMap<String, Decimal>,
        #[serde(rename = "serverTime")]
        server_time: i64,
    },
    BroadcastNotification {
        message: String,
        sender: String,
        #[serde(rename = "serverTime")]
        server_time: i64,
    },
    EventDelta {
        events: Vec<ServerMessage>,
        #[serde(rename = "serverTime")]
        server_time: i64,
    },
    AllOrders {
        orders: Vec<crate::models::Order>,
        #[serde(rename = "serverTime")]
        server_time: i64,
    },
    Error {
        code: String,
        reason: String,
        #[serde(rename = "clOrdID", skip_serializing_if = "Option::is_none")]
        cl_ord_id: Option<String>,
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error","code":"SERVICE_UNAVAILABLE"}"#.into())
    }
}
