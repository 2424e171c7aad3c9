//! JSON wire messages for the dashboard channel.
//! Every frame is an object with a `type` field; order lifecycle frames
//! reuse the notification kind names as their type tag.

use serde::{Deserialize, Serialize};

use crate::db::models::{OrderSnapshot, OrderStatus, Platform};

/// Event payload carried by order lifecycle frames (everything except the
/// initial `newOrder`, which carries the full order snapshot instead).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEventPayload {
    pub order_id: String,
    pub restaurant_id: String,
    pub restaurant_name: String,
    pub customer_id: String,
    pub total_amount: f64,
    pub status: OrderStatus,
    pub platform: Platform,
    pub message_id: String,
    pub timestamp: String,
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connectionConfirmed")]
    ConnectionConfirmed {
        #[serde(rename = "restaurantId")]
        restaurant_id: String,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "newOrder")]
    NewOrder { order: OrderSnapshot },
    #[serde(rename = "ORDER_CONFIRMED")]
    OrderConfirmed { event: OrderEventPayload },
    #[serde(rename = "ORDER_READY")]
    OrderReady { event: OrderEventPayload },
    #[serde(rename = "ORDER_DELIVERED")]
    OrderDelivered { event: OrderEventPayload },
    #[serde(rename = "ORDER_CANCELLED")]
    OrderCancelled { event: OrderEventPayload },
}

/// Client → server frames. Only `ping` is consumed by the registry; any
/// other kind is handed to the application handler.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping,
    #[serde(other)]
    Unknown,
}
