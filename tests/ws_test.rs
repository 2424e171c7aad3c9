//! Integration tests for the dashboard channel: attach auth, supersede,
//! ping/pong, heartbeat liveness and order fan-out frames.

mod common;

use std::time::Duration;

use common::{quiet_timings, start_test_server, wait_for};
use futures_util::{SinkExt, StreamExt};
use quickbite_server::state::Timings;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Read frames until a JSON text frame arrives, with a timeout.
async fn next_json(ws: &mut WsStream, timeout: Duration) -> Value {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("timed out waiting for a JSON frame");
        let msg = tokio::time::timeout(remaining, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            // Transport pings are answered by tungstenite automatically.
            _ => continue,
        }
    }
}

/// Read frames until the close frame arrives; returns its code.
async fn wait_close(ws: &mut WsStream, timeout: Duration) -> Option<u16> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => {
                return frame.map(|f| u16::from(f.code));
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => return None,
            Err(_) => return None,
        }
    }
}

#[tokio::test]
async fn attach_confirms_connection() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, owner_id) = server.register_user("owner", "9100000001").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;

    let (mut ws, _) = connect_async(server.ws_url(&owner_id, &restaurant_id, &owner_token))
        .await
        .expect("upgrade failed");

    let frame = next_json(&mut ws, Duration::from_secs(2)).await;
    assert_eq!(frame["type"], "connectionConfirmed");
    assert_eq!(frame["restaurantId"], restaurant_id.as_str());

    assert!(server.state.channels.lookup(&restaurant_id).is_some());
}

#[tokio::test]
async fn missing_parameters_close_with_4001() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, _) = server.register_user("owner", "9100000011").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;

    // userId left out.
    let url = format!(
        "{}/ws?restaurantId={}&token={}",
        server.ws_base, restaurant_id, owner_token
    );
    let (mut ws, _) = connect_async(url).await.expect("upgrade failed");
    assert_eq!(wait_close(&mut ws, Duration::from_secs(2)).await, Some(4001));
}

#[tokio::test]
async fn invalid_token_closes_with_4001() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, owner_id) = server.register_user("owner", "9100000021").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;

    let (mut ws, _) = connect_async(server.ws_url(&owner_id, &restaurant_id, "not-a-jwt"))
        .await
        .expect("upgrade failed");
    assert_eq!(wait_close(&mut ws, Duration::from_secs(2)).await, Some(4001));
}

#[tokio::test]
async fn non_owner_closes_with_4003() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, _) = server.register_user("owner", "9100000031").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (other_token, other_id) = server.register_user("other", "9100000032").await;

    let (mut ws, _) = connect_async(server.ws_url(&other_id, &restaurant_id, &other_token))
        .await
        .expect("upgrade failed");
    assert_eq!(wait_close(&mut ws, Duration::from_secs(2)).await, Some(4003));
    assert!(server.state.channels.lookup(&restaurant_id).is_none());
}

#[tokio::test]
async fn application_ping_is_answered_with_pong() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, owner_id) = server.register_user("owner", "9100000041").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;

    let (mut ws, _) = connect_async(server.ws_url(&owner_id, &restaurant_id, &owner_token))
        .await
        .expect("upgrade failed");
    let _confirmed = next_json(&mut ws, Duration::from_secs(2)).await;

    ws.send(Message::Text(r#"{"type":"ping"}"#.into()))
        .await
        .unwrap();
    let frame = next_json(&mut ws, Duration::from_secs(2)).await;
    assert_eq!(frame["type"], "pong");
}

#[tokio::test]
async fn second_dashboard_supersedes_the_first() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, owner_id) = server.register_user("owner", "9100000051").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, _) = server.register_user("customer", "9100000052").await;

    let url = server.ws_url(&owner_id, &restaurant_id, &owner_token);
    let (mut first, _) = connect_async(&url).await.expect("upgrade failed");
    let _confirmed = next_json(&mut first, Duration::from_secs(2)).await;

    let (mut second, _) = connect_async(&url).await.expect("upgrade failed");
    let _confirmed = next_json(&mut second, Duration::from_secs(2)).await;

    // The superseded channel is closed with 1000.
    assert_eq!(wait_close(&mut first, Duration::from_secs(2)).await, Some(1000));

    // Fan-out lands on the surviving channel only.
    server.place_order(&customer_token, &restaurant_id).await;
    let frame = next_json(&mut second, Duration::from_secs(2)).await;
    assert_eq!(frame["type"], "newOrder");
}

#[tokio::test]
async fn placed_order_emits_new_order_frame() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, owner_id) = server.register_user("owner", "9100000061").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, _) = server.register_user("customer", "9100000062").await;

    let (mut ws, _) = connect_async(server.ws_url(&owner_id, &restaurant_id, &owner_token))
        .await
        .expect("upgrade failed");
    let _confirmed = next_json(&mut ws, Duration::from_secs(2)).await;

    let order = server.place_order(&customer_token, &restaurant_id).await;

    let frame = next_json(&mut ws, Duration::from_secs(2)).await;
    assert_eq!(frame["type"], "newOrder");
    assert_eq!(frame["order"]["id"], order["id"]);
    assert_eq!(frame["order"]["status"], "Placed");
    assert_eq!(frame["order"]["totalAmount"], 420.0);
}

#[tokio::test]
async fn lifecycle_frames_follow_the_order() {
    let server = start_test_server(quiet_timings()).await;
    let (owner_token, owner_id) = server.register_user("owner", "9100000071").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;
    let (customer_token, _) = server.register_user("customer", "9100000072").await;

    let (mut ws, _) = connect_async(server.ws_url(&owner_id, &restaurant_id, &owner_token))
        .await
        .expect("upgrade failed");
    let _confirmed = next_json(&mut ws, Duration::from_secs(2)).await;

    let order = server.place_order(&customer_token, &restaurant_id).await;
    let order_id = order["id"].as_str().unwrap();

    let frame = next_json(&mut ws, Duration::from_secs(2)).await;
    assert_eq!(frame["type"], "newOrder");

    server.patch_order(&owner_token, order_id, "confirm").await;
    let frame = next_json(&mut ws, Duration::from_secs(2)).await;
    assert_eq!(frame["type"], "ORDER_CONFIRMED");
    assert_eq!(frame["event"]["orderId"], order_id);
    assert_eq!(frame["event"]["status"], "Accepted");
    assert!(frame["event"]["messageId"].as_str().unwrap().len() == 64);

    server.patch_order(&owner_token, order_id, "deliver").await;
    let frame = next_json(&mut ws, Duration::from_secs(2)).await;
    assert_eq!(frame["type"], "ORDER_DELIVERED");
}

#[tokio::test]
async fn responsive_channel_survives_heartbeats_silent_one_is_removed() {
    let timings = Timings {
        heartbeat: Duration::from_millis(200),
        ..quiet_timings()
    };
    let server = start_test_server(timings).await;
    let (owner_token, owner_id) = server.register_user("owner", "9100000081").await;
    let restaurant_id = server.create_restaurant(&owner_token, "Spice Villa").await;

    let (mut ws, _) = connect_async(server.ws_url(&owner_id, &restaurant_id, &owner_token))
        .await
        .expect("upgrade failed");
    let _confirmed = next_json(&mut ws, Duration::from_secs(2)).await;

    // Keep reading: tungstenite answers transport pings with pongs, so the
    // channel stays alive across several sweeps.
    let reader = tokio::spawn(async move {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(1200);
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(100), ws.next()).await {
                Ok(Some(Ok(_))) => continue,
                Ok(_) => break,
                Err(_) => continue,
            }
        }
        ws
    });
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(
        server.state.channels.lookup(&restaurant_id).is_some(),
        "responsive channel survives"
    );

    // Stop reading: no pongs flow back, the sweep terminates the channel.
    let ws = reader.await.unwrap();
    drop_reads(ws);
    let state = server.state.clone();
    let rid = restaurant_id.clone();
    wait_for(
        "silent channel to be terminated",
        Duration::from_secs(3),
        move || state.channels.lookup(&rid).is_none(),
    )
    .await;
}

/// Hold the socket open without polling it, so no pongs are produced.
fn drop_reads(ws: WsStream) {
    tokio::spawn(async move {
        let _held = ws;
        tokio::time::sleep(Duration::from_secs(10)).await;
    });
}
