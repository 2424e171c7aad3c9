//! Typed notification events and their per-recipient rendering.
//!
//! An event is composed once per state transition and fanned out by the
//! dispatcher; it is never persisted. The message id is deterministic
//! (hash of order id + kind + minute bucket) so receivers can suppress
//! duplicates from at-least-once delivery.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::db::models::{amount_from_cents, format_amount, Order, OrderSnapshot, OrderStatus, Platform};
use crate::ws::protocol::OrderEventPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    OrderPlaced,
    OrderConfirmed,
    OrderReady,
    OrderDelivered,
    OrderCancelled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderPlaced => "ORDER_PLACED",
            NotificationKind::OrderConfirmed => "ORDER_CONFIRMED",
            NotificationKind::OrderReady => "ORDER_READY",
            NotificationKind::OrderDelivered => "ORDER_DELIVERED",
            NotificationKind::OrderCancelled => "ORDER_CANCELLED",
        }
    }

    /// Kind emitted when an order lands in the given status. Preparing is a
    /// pass-through state and produces no notification.
    pub fn for_status(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::Placed => Some(NotificationKind::OrderPlaced),
            OrderStatus::Accepted => Some(NotificationKind::OrderConfirmed),
            OrderStatus::Ready => Some(NotificationKind::OrderReady),
            OrderStatus::Delivered => Some(NotificationKind::OrderDelivered),
            OrderStatus::Cancelled => Some(NotificationKind::OrderCancelled),
            OrderStatus::Preparing => None,
        }
    }
}

/// Which side of the order a rendering targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Restaurant,
    Customer,
}

impl Recipient {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recipient::Restaurant => "restaurant",
            Recipient::Customer => "customer",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub order: OrderSnapshot,
    pub total_cents: i64,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn for_order(order: &Order, kind: NotificationKind) -> Self {
        let timestamp = Utc::now();
        Self {
            kind,
            order: order.snapshot(),
            total_cents: order.total_cents,
            message_id: message_id(&order.id, kind, timestamp),
            timestamp,
        }
    }

    /// True when this event closes the order's lifecycle.
    pub fn is_terminal(&self) -> bool {
        self.order.status.is_terminal()
    }

    pub fn wire_payload(&self) -> OrderEventPayload {
        OrderEventPayload {
            order_id: self.order.id.clone(),
            restaurant_id: self.order.restaurant.clone(),
            restaurant_name: self.order.restaurant_name.clone(),
            customer_id: self.order.customer.clone(),
            total_amount: amount_from_cents(self.total_cents),
            status: self.order.status,
            platform: self.order.platform,
            message_id: self.message_id.clone(),
            timestamp: self.timestamp.to_rfc3339(),
        }
    }

    /// Flat string data map carried by every push message.
    pub fn push_data(&self, recipient: Recipient) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        data.insert("type".into(), self.kind.as_str().to_string());
        data.insert("orderId".into(), self.order.id.clone());
        data.insert("restaurantId".into(), self.order.restaurant.clone());
        data.insert("restaurantName".into(), self.order.restaurant_name.clone());
        data.insert("totalAmount".into(), format_amount(self.total_cents));
        data.insert("status".into(), self.order.status.as_str().to_string());
        data.insert("platform".into(), self.order.platform.as_str().to_string());
        data.insert("timestamp".into(), self.timestamp.to_rfc3339());
        data.insert("messageId".into(), self.message_id.clone());

        // Web targets get a click URL and a per-kind action list.
        if self.order.platform == Platform::Web {
            data.insert("url".into(), click_url(self.kind, recipient, &self.order.id));
            let actions = actions_for(self.kind, recipient);
            data.insert(
                "actions".into(),
                serde_json::to_string(actions).unwrap_or_else(|_| "[]".into()),
            );
        }
        data
    }

    pub fn title(&self, recipient: Recipient) -> &'static str {
        title_for(self.kind, recipient)
    }

    pub fn body(&self, recipient: Recipient) -> String {
        body_for(self.kind, recipient, &self.order, self.total_cents)
    }
}

/// Deterministic message id: SHA-256 of order id + kind + minute bucket.
pub fn message_id(order_id: &str, kind: NotificationKind, at: DateTime<Utc>) -> String {
    let bucket = at.timestamp() / 60;
    let mut hasher = Sha256::new();
    hasher.update(order_id.as_bytes());
    hasher.update(b"-");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"-");
    hasher.update(bucket.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Last 6 hex characters of the order identity, for human-readable bodies.
pub fn short_id(order_id: &str) -> String {
    let hex_chars: Vec<char> = order_id
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect();
    let start = hex_chars.len().saturating_sub(6);
    hex_chars[start..].iter().collect()
}

fn title_for(kind: NotificationKind, recipient: Recipient) -> &'static str {
    match recipient {
        Recipient::Restaurant => match kind {
            NotificationKind::OrderPlaced => "New Order Received",
            NotificationKind::OrderConfirmed => "Order Confirmed",
            NotificationKind::OrderReady => "Order Ready for Pickup",
            NotificationKind::OrderDelivered => "Order Delivered",
            NotificationKind::OrderCancelled => "Order Cancelled",
        },
        Recipient::Customer => match kind {
            NotificationKind::OrderPlaced => "Order Placed Successfully",
            NotificationKind::OrderConfirmed => "Order Confirmed",
            NotificationKind::OrderReady => "Order Ready for Pickup",
            NotificationKind::OrderDelivered => "Order Delivered",
            NotificationKind::OrderCancelled => "Order Cancelled",
        },
    }
}

fn body_for(
    kind: NotificationKind,
    recipient: Recipient,
    order: &OrderSnapshot,
    total_cents: i64,
) -> String {
    let number = short_id(&order.id);
    match recipient {
        Recipient::Customer => match kind {
            NotificationKind::OrderPlaced => {
                format!("Your order at {} has been placed", order.restaurant_name)
            }
            NotificationKind::OrderConfirmed => {
                format!("{} has confirmed your order", order.restaurant_name)
            }
            NotificationKind::OrderReady => {
                format!("Your order at {} is ready for pickup", order.restaurant_name)
            }
            NotificationKind::OrderDelivered => {
                format!("Your order from {} has been delivered", order.restaurant_name)
            }
            NotificationKind::OrderCancelled => {
                format!("Your order at {} has been cancelled", order.restaurant_name)
            }
        },
        Recipient::Restaurant => match kind {
            NotificationKind::OrderPlaced => {
                format!("New order #{} — ₹{}", number, format_amount(total_cents))
            }
            NotificationKind::OrderConfirmed => {
                format!("Order #{} has been confirmed", number)
            }
            NotificationKind::OrderReady => {
                format!("Order #{} is ready for pickup", number)
            }
            NotificationKind::OrderDelivered => {
                format!("Order #{} has been delivered", number)
            }
            NotificationKind::OrderCancelled => {
                format!("Order #{} has been cancelled", number)
            }
        },
    }
}

/// Web push actions, by kind and recipient.
fn actions_for(kind: NotificationKind, recipient: Recipient) -> &'static [&'static str] {
    match recipient {
        Recipient::Customer => match kind {
            NotificationKind::OrderPlaced => &["view", "track"],
            NotificationKind::OrderConfirmed => &["track", "contact"],
            NotificationKind::OrderReady => &["track", "directions"],
            NotificationKind::OrderDelivered => &["review", "reorder"],
            NotificationKind::OrderCancelled => &[],
        },
        Recipient::Restaurant => match kind {
            NotificationKind::OrderPlaced => &["accept", "view"],
            NotificationKind::OrderConfirmed | NotificationKind::OrderReady => {
                &["view", "contact"]
            }
            NotificationKind::OrderDelivered | NotificationKind::OrderCancelled => &[],
        },
    }
}

fn click_url(kind: NotificationKind, recipient: Recipient, order_id: &str) -> String {
    match recipient {
        Recipient::Restaurant => format!("/restaurant/orders/{order_id}"),
        Recipient::Customer => match kind {
            NotificationKind::OrderDelivered => format!("/orders/{order_id}/review"),
            _ => format!("/orders/{order_id}"),
        },
    }
}
