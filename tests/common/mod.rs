//! Shared harness for integration tests: starts the real server on an
//! OS-assigned port with a temp data dir, compressed timings and a
//! recording push provider.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use quickbite_server::notify::dispatcher::{Dispatcher, RetryPolicy};
use quickbite_server::notify::push::{PushError, PushMessage, PushProvider};
use quickbite_server::state::{AppState, Timings};
use quickbite_server::ws::ChannelRegistry;
use quickbite_server::{auth, db, routes, scheduler};

/// Push provider that records every attempt and can be scripted to fail
/// per token.
#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<PushMessage>>,
    permanent_tokens: Mutex<Vec<String>>,
    transient_failures: Mutex<HashMap<String, u32>>,
}

impl RecordingPush {
    /// Every send to this token fails permanently (unregistered device).
    pub fn fail_permanently(&self, token: &str) {
        self.permanent_tokens.lock().unwrap().push(token.to_string());
    }

    /// The next `count` sends to this token fail transiently.
    pub fn fail_transiently(&self, token: &str, count: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(token.to_string(), count);
    }

    pub fn attempts(&self) -> Vec<PushMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, token: &str) -> Vec<PushMessage> {
        self.attempts()
            .into_iter()
            .filter(|m| m.token == token)
            .collect()
    }
}

#[async_trait]
impl PushProvider for RecordingPush {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        self.sent.lock().unwrap().push(message.clone());

        if self
            .permanent_tokens
            .lock()
            .unwrap()
            .contains(&message.token)
        {
            return Err(PushError::Permanent("UNREGISTERED".into()));
        }

        let mut transient = self.transient_failures.lock().unwrap();
        if let Some(remaining) = transient.get_mut(&message.token) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PushError::Transient("simulated blip".into()));
            }
        }
        Ok(())
    }
}

pub struct TestServer {
    pub base_url: String,
    pub ws_base: String,
    pub state: AppState,
    pub push: Arc<RecordingPush>,
    pub client: reqwest::Client,
    _data_dir: tempfile::TempDir,
}

/// Timings compressed enough that nothing periodic fires unless a test
/// asks for it.
pub fn quiet_timings() -> Timings {
    Timings {
        heartbeat: Duration::from_secs(600),
        token_sweep: Duration::from_secs(600),
        auto_cancel: Duration::from_secs(600),
        watchdog: Duration::from_secs(600),
        opening_watch: Duration::from_secs(600),
    }
}

pub async fn start_test_server(timings: Timings) -> TestServer {
    let data_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let dir = data_dir.path().to_str().unwrap().to_string();

    let db = db::init_db(&dir).expect("Failed to init DB");
    let jwt_secret =
        auth::jwt::load_or_generate_jwt_secret(&dir).expect("Failed to generate JWT secret");

    let channels = ChannelRegistry::new();
    let push = Arc::new(RecordingPush::default());
    let dispatcher = Dispatcher::new(
        db.clone(),
        channels.clone(),
        push.clone(),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
        },
        500,
    );

    let state = AppState {
        db,
        jwt_secret,
        channels,
        dispatcher,
        timings,
    };
    scheduler::spawn_all(state.clone());

    let app = routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        ws_base: format!("ws://{}", addr),
        state,
        push,
        client: reqwest::Client::new(),
        _data_dir: data_dir,
    }
}

impl TestServer {
    /// Register a user; returns (bearer token, user id).
    pub async fn register_user(&self, username: &str, mobile: &str) -> (String, String) {
        let response = self
            .client
            .post(format!("{}/api/users/register", self.base_url))
            .json(&json!({
                "username": username,
                "mobileNumber": mobile,
                "password": "secret123",
            }))
            .send()
            .await
            .expect("register request failed");
        assert_eq!(response.status(), 201, "registration should succeed");

        let body: Value = response.json().await.unwrap();
        let token = body["data"]["token"].as_str().unwrap().to_string();
        let user_id = body["data"]["user"]["id"].as_str().unwrap().to_string();
        (token, user_id)
    }

    /// Create a restaurant owned by the bearer; returns its id.
    pub async fn create_restaurant(&self, token: &str, name: &str) -> String {
        let response = self
            .client
            .post(format!("{}/api/restaurants", self.base_url))
            .bearer_auth(token)
            .json(&json!({ "name": name, "address": "12 Food Street" }))
            .send()
            .await
            .expect("create restaurant failed");
        assert_eq!(response.status(), 201, "restaurant creation should succeed");

        let body: Value = response.json().await.unwrap();
        body["data"]["restaurant"]["id"].as_str().unwrap().to_string()
    }

    /// Register a push device for the bearer.
    pub async fn register_device(&self, token: &str, device_token: &str, kind: &str) {
        let response = self
            .client
            .put(format!("{}/api/users/devices", self.base_url))
            .bearer_auth(token)
            .json(&json!({ "token": device_token, "kind": kind }))
            .send()
            .await
            .expect("device registration failed");
        assert_eq!(response.status(), 200);
    }

    /// Place a standard test order; returns the order snapshot.
    pub async fn place_order(&self, token: &str, restaurant_id: &str) -> Value {
        let response = self
            .client
            .post(format!("{}/api/orders", self.base_url))
            .bearer_auth(token)
            .json(&json!({
                "restaurant": restaurant_id,
                "items": [
                    { "menuItem": "m1", "itemName": "Pizza", "quantity": 2, "size": "Medium" }
                ],
                "totalAmount": 420.00,
                "address": "Hostel H5",
            }))
            .send()
            .await
            .expect("place order failed");
        assert_eq!(response.status(), 201, "order placement should succeed");

        let body: Value = response.json().await.unwrap();
        body["data"]["order"].clone()
    }

    /// Fetch the caller's orders and return the one with the given id.
    pub async fn get_order(&self, token: &str, order_id: &str) -> Value {
        let response = self
            .client
            .get(format!("{}/api/orders", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .expect("list orders failed");
        assert_eq!(response.status(), 200);

        let body: Value = response.json().await.unwrap();
        body["data"]["orders"]
            .as_array()
            .unwrap()
            .iter()
            .find(|o| o["id"] == order_id)
            .cloned()
            .expect("order not found in listing")
    }

    pub async fn patch_order(&self, token: &str, order_id: &str, action: &str) -> reqwest::Response {
        self.client
            .patch(format!("{}/api/orders/{}/{}", self.base_url, order_id, action))
            .bearer_auth(token)
            .send()
            .await
            .expect("order transition request failed")
    }

    pub fn ws_url(&self, user_id: &str, restaurant_id: &str, token: &str) -> String {
        format!(
            "{}/ws?userId={}&restaurantId={}&token={}",
            self.ws_base, user_id, restaurant_id, token
        )
    }
}

/// Wait until the predicate holds or the timeout elapses.
pub async fn wait_for<F: Fn() -> bool>(what: &str, timeout: Duration, predicate: F) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
