//! Integration tests for order placement, the transition DAG over REST,
//! role guards and auto-cancellation.

mod common;

use std::time::Duration;

use common::{quiet_timings, start_test_server, wait_for};
use quickbite_server::state::Timings;
use serde_json::{json, Value};

#[tokio::test]
async fn place_order_returns_created_snapshot() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, _) = server.register_user("owner", "9000000001").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, customer_id) = server.register_user("customer", "9000000002").await;

    let order = server.place_order(&customer_token, &restaurant_id).await;

    assert_eq!(order["status"], "Placed");
    assert_eq!(order["restaurant"], restaurant_id.as_str());
    assert_eq!(order["restaurantName"], "Spice Villa");
    assert_eq!(order["customer"], customer_id.as_str());
    assert_eq!(order["totalAmount"], 420.0);
    assert_eq!(order["items"][0]["itemName"], "Pizza");
    assert_eq!(order["cancellationReason"], "");
}

#[tokio::test]
async fn restaurant_role_cannot_place_orders() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, _) = server.register_user("owner", "9000000011").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;

    let response = server
        .client
        .post(format!("{}/api/orders", server.base_url))
        .bearer_auth(&owner_token)
        .json(&json!({
            "restaurant": restaurant_id,
            "items": [{ "menuItem": "m1", "itemName": "Pizza", "quantity": 1, "size": "Regular" }],
            "totalAmount": 99.0,
            "address": "somewhere",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    // No order was written.
    let listing = server
        .client
        .get(format!("{}/api/orders", server.base_url))
        .bearer_auth(&owner_token)
        .send()
        .await
        .unwrap();
    let body: Value = listing.json().await.unwrap();
    assert!(body["data"]["orders"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_order_bodies_are_rejected() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, _) = server.register_user("owner", "9000000021").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, _) = server.register_user("customer", "9000000022").await;

    let cases = [
        // empty items
        json!({ "restaurant": restaurant_id, "items": [], "totalAmount": 10.0, "address": "a" }),
        // zero quantity
        json!({ "restaurant": restaurant_id,
                "items": [{ "menuItem": "m1", "itemName": "Pizza", "quantity": 0, "size": "Medium" }],
                "totalAmount": 10.0, "address": "a" }),
        // unknown size
        json!({ "restaurant": restaurant_id,
                "items": [{ "menuItem": "m1", "itemName": "Pizza", "quantity": 1, "size": "Gigantic" }],
                "totalAmount": 10.0, "address": "a" }),
        // zero total
        json!({ "restaurant": restaurant_id,
                "items": [{ "menuItem": "m1", "itemName": "Pizza", "quantity": 1, "size": "Medium" }],
                "totalAmount": 0.0, "address": "a" }),
        // blank address
        json!({ "restaurant": restaurant_id,
                "items": [{ "menuItem": "m1", "itemName": "Pizza", "quantity": 1, "size": "Medium" }],
                "totalAmount": 10.0, "address": "  " }),
        // unknown restaurant
        json!({ "restaurant": "missing",
                "items": [{ "menuItem": "m1", "itemName": "Pizza", "quantity": 1, "size": "Medium" }],
                "totalAmount": 10.0, "address": "a" }),
    ];

    for case in cases {
        let response = server
            .client
            .post(format!("{}/api/orders", server.base_url))
            .bearer_auth(&customer_token)
            .json(&case)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "case should be rejected: {case}");
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], "INVALID_INPUT");
    }
}

#[tokio::test]
async fn confirm_then_deliver_follows_the_dag() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, _) = server.register_user("owner", "9000000031").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, _) = server.register_user("customer", "9000000032").await;

    let order = server.place_order(&customer_token, &restaurant_id).await;
    let order_id = order["id"].as_str().unwrap();

    let response = server.patch_order(&owner_token, order_id, "confirm").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["order"]["status"], "Accepted");

    let response = server.patch_order(&owner_token, order_id, "ready").await;
    assert_eq!(response.status(), 200);

    let response = server.patch_order(&owner_token, order_id, "deliver").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["order"]["status"], "Delivered");

    // PATCH response equals the stored document re-read via GET.
    let stored = server.get_order(&customer_token, order_id).await;
    assert_eq!(body["data"]["order"], stored);
}

#[tokio::test]
async fn terminal_orders_conflict_on_further_mutation() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, _) = server.register_user("owner", "9000000041").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, _) = server.register_user("customer", "9000000042").await;

    let order = server.place_order(&customer_token, &restaurant_id).await;
    let order_id = order["id"].as_str().unwrap();

    assert_eq!(server.patch_order(&owner_token, order_id, "confirm").await.status(), 200);
    assert_eq!(server.patch_order(&owner_token, order_id, "deliver").await.status(), 200);

    for action in ["confirm", "ready", "deliver", "cancel"] {
        let response = server.patch_order(&owner_token, order_id, action).await;
        assert_eq!(response.status(), 409, "{action} on a Delivered order");
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], "CONFLICT");
    }

    // Stored state unchanged.
    let stored = server.get_order(&customer_token, order_id).await;
    assert_eq!(stored["status"], "Delivered");
}

#[tokio::test]
async fn illegal_transitions_conflict_without_state_change() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, _) = server.register_user("owner", "9000000051").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, _) = server.register_user("customer", "9000000052").await;

    let order = server.place_order(&customer_token, &restaurant_id).await;
    let order_id = order["id"].as_str().unwrap();

    // Placed cannot go straight to Ready or Delivered.
    for action in ["ready", "deliver"] {
        let response = server.patch_order(&owner_token, order_id, action).await;
        assert_eq!(response.status(), 409, "Placed -> {action}");
    }
    let stored = server.get_order(&customer_token, order_id).await;
    assert_eq!(stored["status"], "Placed");
}

#[tokio::test]
async fn only_the_owner_may_transition_orders() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, _) = server.register_user("owner", "9000000061").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, _) = server.register_user("customer", "9000000062").await;
    let (stranger_token, _) = server.register_user("stranger", "9000000063").await;

    let order = server.place_order(&customer_token, &restaurant_id).await;
    let order_id = order["id"].as_str().unwrap();

    let response = server.patch_order(&stranger_token, order_id, "confirm").await;
    assert_eq!(response.status(), 403);

    let response = server.patch_order(&customer_token, order_id, "confirm").await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn unaccepted_order_is_auto_cancelled_with_the_fixed_reason() {
    // 1-second deadline via the in-process timer; watchdog kept quiet.
    let timings = Timings {
        auto_cancel: Duration::from_secs(1),
        ..quiet_timings()
    };
    let server = start_test_server(timings).await;
    let (owner_token, _) = server.register_user("owner", "9000000071").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, _) = server.register_user("customer", "9000000072").await;

    let order = server.place_order(&customer_token, &restaurant_id).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(1600)).await;

    let stored = server.get_order(&customer_token, &order_id).await;
    assert_eq!(stored["status"], "Cancelled");
    assert_eq!(
        stored["cancellationReason"].as_str().unwrap(),
        "Your chosen restaurant couldn't take your order this time, but don't worry — we have plenty of other amazing restaurants waiting to serve you. Explore your next favorite meal now!"
    );
}

#[tokio::test]
async fn confirmed_order_is_never_auto_cancelled() {
    let timings = Timings {
        auto_cancel: Duration::from_secs(1),
        ..quiet_timings()
    };
    let server = start_test_server(timings).await;
    let (owner_token, _) = server.register_user("owner", "9000000081").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, _) = server.register_user("customer", "9000000082").await;

    let order = server.place_order(&customer_token, &restaurant_id).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    assert_eq!(server.patch_order(&owner_token, &order_id, "confirm").await.status(), 200);
    tokio::time::sleep(Duration::from_millis(1600)).await;

    let stored = server.get_order(&customer_token, &order_id).await;
    assert_eq!(stored["status"], "Accepted");
}

#[tokio::test]
async fn watchdog_cancels_overdue_orders_from_before_a_restart() {
    // The order is written directly to the store with an old created_at and
    // no in-process timer, as if the process had restarted since placement.
    let timings = Timings {
        auto_cancel: Duration::from_secs(60),
        watchdog: Duration::from_millis(300),
        ..quiet_timings()
    };
    let server = start_test_server(timings).await;
    let (owner_token, _) = server.register_user("owner", "9000000091").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, customer_id) = server.register_user("customer", "9000000092").await;

    let order_id = "stale-order-1".to_string();
    {
        let conn = server.state.db.lock().unwrap();
        let past = (chrono::Utc::now() - chrono::Duration::minutes(10)).to_rfc3339();
        conn.execute(
            "INSERT INTO orders (id, restaurant_id, restaurant_name, customer_id, items,
             total_cents, address, status, platform, created_at, updated_at)
             VALUES (?1, ?2, 'Spice Villa', ?3, '[]', 42000, 'Hostel H5', 'Placed', 'app', ?4, ?4)",
            rusqlite::params![order_id, restaurant_id, customer_id, past],
        )
        .unwrap();
    }

    let state = server.state.clone();
    let oid = order_id.clone();
    wait_for("watchdog to cancel the order", Duration::from_secs(5), move || {
        let conn = state.db.lock().unwrap();
        let status: String = conn
            .query_row(
                "SELECT status FROM orders WHERE id = ?1",
                rusqlite::params![oid],
                |row| row.get(0),
            )
            .unwrap();
        status == "Cancelled"
    })
    .await;

    let stored = server.get_order(&customer_token, &order_id).await;
    assert_eq!(stored["status"], "Cancelled");
}

#[tokio::test]
async fn restaurant_listing_filters_by_status_and_owner() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, _) = server.register_user("owner", "9000000101").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, _) = server.register_user("customer", "9000000102").await;

    let order = server.place_order(&customer_token, &restaurant_id).await;
    let order_id = order["id"].as_str().unwrap();
    server.patch_order(&owner_token, order_id, "confirm").await;
    server.place_order(&customer_token, &restaurant_id).await;

    let response = server
        .client
        .get(format!(
            "{}/api/orders/restaurant/{}?status=Placed",
            server.base_url, restaurant_id
        ))
        .bearer_auth(&owner_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let orders = body["data"]["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["status"], "Placed");

    // A non-owner is rejected.
    let response = server
        .client
        .get(format!(
            "{}/api/orders/restaurant/{}",
            server.base_url, restaurant_id
        ))
        .bearer_auth(&customer_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}
