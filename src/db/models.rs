//! Database row types and API snapshots for all tables.
//! Row types correspond 1:1 to the SQLite schema defined in migrations.rs;
//! snapshot types are the camelCase JSON shapes handed to clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// User role. Role changes to `Restaurant` are written in the same
/// transaction as the matching restaurants.owner_id row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Restaurant,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Restaurant => "restaurant",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "restaurant" => Some(Role::Restaurant),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// User record in the users table. The password hash is loaded only on the
/// login path and never serialized out.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub mobile_number: String,
    pub role: Role,
    pub restaurant_id: Option<String>,
    pub address: String,
    pub is_active: bool,
    pub legacy_push_token: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let role: String = row.get("role")?;
        Ok(User {
            id: row.get("id")?,
            username: row.get("username")?,
            mobile_number: row.get("mobile_number")?,
            role: Role::parse(&role).unwrap_or(Role::User),
            restaurant_id: row.get("restaurant_id")?,
            address: row.get("address")?,
            is_active: row.get("is_active")?,
            legacy_push_token: row.get("legacy_push_token")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id.clone(),
            username: self.username.clone(),
            mobile_number: self.mobile_number.clone(),
            role: self.role,
            restaurant: self.restaurant_id.clone(),
            address: self.address.clone(),
            is_active: self.is_active,
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub id: String,
    pub username: String,
    pub mobile_number: String,
    pub role: Role,
    pub restaurant: Option<String>,
    pub address: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Push endpoint kind for a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Android,
    Ios,
    Web,
    Unknown,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Android => "android",
            DeviceKind::Ios => "ios",
            DeviceKind::Web => "web",
            DeviceKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "android" => DeviceKind::Android,
            "ios" => DeviceKind::Ios,
            "web" => DeviceKind::Web,
            _ => DeviceKind::Unknown,
        }
    }
}

/// Device record in the devices table: one installed app/browser's push
/// endpoint, owned by a user. At most the 5 most-recently-active are kept.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub user_id: String,
    pub token: String,
    pub kind: DeviceKind,
    pub info: BTreeMap<String, String>,
    pub last_active: String,
    pub expires_at: String,
}

impl DeviceRecord {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get("kind")?;
        let info_json: String = row.get("info")?;
        Ok(DeviceRecord {
            user_id: row.get("user_id")?,
            token: row.get("token")?,
            kind: DeviceKind::parse(&kind),
            info: serde_json::from_str(&info_json).unwrap_or_default(),
            last_active: row.get("last_active")?,
            expires_at: row.get("expires_at")?,
        })
    }
}

/// Restaurant record. Exactly one owner; the owner user carries the
/// back-reference in users.restaurant_id.
#[derive(Debug, Clone)]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    pub address: String,
    pub image_url: String,
    pub is_active: bool,
    pub owner_id: String,
    pub opening_time: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Restaurant {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Restaurant {
            id: row.get("id")?,
            name: row.get("name")?,
            address: row.get("address")?,
            image_url: row.get("image_url")?,
            is_active: row.get("is_active")?,
            owner_id: row.get("owner_id")?,
            opening_time: row.get("opening_time")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn snapshot(&self) -> RestaurantSnapshot {
        RestaurantSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            address: self.address.clone(),
            image_url: self.image_url.clone(),
            is_active: self.is_active,
            owner: self.owner_id.clone(),
            opening_time: self.opening_time.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantSnapshot {
    pub id: String,
    pub name: String,
    pub address: String,
    pub image_url: String,
    pub is_active: bool,
    pub owner: String,
    pub opening_time: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Menu item with an availability flag and a size -> price mapping.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    #[serde(skip_serializing)]
    pub restaurant_id: String,
    pub name: String,
    pub available: bool,
    pub sizes: BTreeMap<String, f64>,
}

impl MenuItem {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let sizes_json: String = row.get("sizes")?;
        Ok(MenuItem {
            id: row.get("id")?,
            restaurant_id: row.get("restaurant_id")?,
            name: row.get("name")?,
            available: row.get("available")?,
            sizes: serde_json::from_str(&sizes_json).unwrap_or_default(),
        })
    }
}

/// Order status. Delivered and Cancelled are terminal; the legal
/// transitions live in orders::machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Placed,
    Accepted,
    Preparing,
    Ready,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Placed => "Placed",
            OrderStatus::Accepted => "Accepted",
            OrderStatus::Preparing => "Preparing",
            OrderStatus::Ready => "Ready",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Placed" => Some(OrderStatus::Placed),
            "Accepted" => Some(OrderStatus::Accepted),
            "Preparing" => Some(OrderStatus::Preparing),
            "Ready" => Some(OrderStatus::Ready),
            "Delivered" => Some(OrderStatus::Delivered),
            "Cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

/// Originating platform of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    App,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::App => "app",
            Platform::Web => "web",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "web" => Platform::Web,
            _ => Platform::App,
        }
    }
}

/// One line item of an order. Wire names follow the order-placement body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    #[serde(rename = "menuItem")]
    pub menu_item_id: String,
    #[serde(rename = "itemName")]
    pub item_name: String,
    pub quantity: u32,
    pub size: String,
}

/// Order record. Line items are stored as a JSON array in the row.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub restaurant_id: String,
    pub restaurant_name: String,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub total_cents: i64,
    pub address: String,
    pub status: OrderStatus,
    pub platform: Platform,
    pub cancellation_reason: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Order {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        let platform: String = row.get("platform")?;
        let items_json: String = row.get("items")?;
        Ok(Order {
            id: row.get("id")?,
            restaurant_id: row.get("restaurant_id")?,
            restaurant_name: row.get("restaurant_name")?,
            customer_id: row.get("customer_id")?,
            items: serde_json::from_str(&items_json).unwrap_or_default(),
            total_cents: row.get("total_cents")?,
            address: row.get("address")?,
            status: OrderStatus::parse(&status).unwrap_or(OrderStatus::Placed),
            platform: Platform::parse(&platform),
            cancellation_reason: row.get("cancellation_reason")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            id: self.id.clone(),
            restaurant: self.restaurant_id.clone(),
            restaurant_name: self.restaurant_name.clone(),
            customer: self.customer_id.clone(),
            items: self.items.clone(),
            total_amount: amount_from_cents(self.total_cents),
            address: self.address.clone(),
            status: self.status,
            platform: self.platform,
            cancellation_reason: self.cancellation_reason.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSnapshot {
    pub id: String,
    pub restaurant: String,
    pub restaurant_name: String,
    pub customer: String,
    pub items: Vec<OrderItem>,
    pub total_amount: f64,
    pub address: String,
    pub status: OrderStatus,
    pub platform: Platform,
    pub cancellation_reason: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Convert a JSON amount to integer minor units, rounding to 2 decimals.
pub fn cents_from_amount(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

pub fn amount_from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Render minor units as a fixed 2-decimal string for display bodies.
pub fn format_amount(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_round_trips_at_two_decimals() {
        assert_eq!(cents_from_amount(420.00), 42000);
        assert_eq!(cents_from_amount(99.99), 9999);
        assert_eq!(amount_from_cents(42000), 420.0);
        assert_eq!(format_amount(42000), "420.00");
        assert_eq!(format_amount(9905), "99.05");
    }

    #[test]
    fn status_parse_rejects_unknown() {
        assert_eq!(OrderStatus::parse("Placed"), Some(OrderStatus::Placed));
        assert_eq!(OrderStatus::parse("placed"), None);
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Ready.is_terminal());
    }

    #[test]
    fn order_item_wire_names() {
        let item: OrderItem = serde_json::from_str(
            r#"{"menuItem":"m1","itemName":"Pizza","quantity":2,"size":"Medium"}"#,
        )
        .unwrap();
        assert_eq!(item.menu_item_id, "m1");
        assert_eq!(item.quantity, 2);
        let out = serde_json::to_value(&item).unwrap();
        assert_eq!(out["menuItem"], "m1");
        assert_eq!(out["size"], "Medium");
    }
}
