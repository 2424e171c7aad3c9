//! Multi-transport notification dispatcher.
//!
//! Takes a Notification Event and delivers it to the restaurant dashboard
//! channel and to the push endpoints of the restaurant owner and the
//! customer. Events for one order flow through a dedicated FIFO lane so
//! they can never overtake each other; lanes for different orders run in
//! parallel. Delivery is at-least-once and best-effort: a failed transport
//! never propagates back to the order lifecycle.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use tokio::sync::mpsc;

use crate::accounts::devices;
use crate::config::PushConfig;
use crate::db::DbPool;
use crate::notify::event::{NotificationEvent, NotificationKind, Recipient};
use crate::notify::push::{PushMessage, PushProvider};
use crate::ws::protocol::ServerMessage;
use crate::ws::ChannelRegistry;

/// Per-token retry schedule: up to `max_attempts` sends, exponential
/// delays starting at `base_delay` (2 s, 4 s, 8 s at the defaults).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PushConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_ms),
        }
    }

    /// Delay before the attempt following `failures` consecutive failures.
    pub fn delay_after(&self, failures: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(failures.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

pub struct Dispatcher {
    db: DbPool,
    channels: Arc<ChannelRegistry>,
    provider: Arc<dyn PushProvider>,
    retry: RetryPolicy,
    batch_size: usize,
    /// One FIFO lane per in-flight order id.
    lanes: DashMap<String, mpsc::UnboundedSender<NotificationEvent>>,
    /// Self-reference so lane workers can be spawned from &self.
    self_ref: std::sync::Weak<Dispatcher>,
}

impl Dispatcher {
    pub fn new(
        db: DbPool,
        channels: Arc<ChannelRegistry>,
        provider: Arc<dyn PushProvider>,
        retry: RetryPolicy,
        batch_size: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            db,
            channels,
            provider,
            retry,
            batch_size: batch_size.max(1),
            lanes: DashMap::new(),
            self_ref: self_ref.clone(),
        })
    }

    /// Enqueue an event on its order's lane, spawning the lane worker on
    /// first use. Events for one order are delivered in enqueue order.
    pub fn dispatch(&self, event: NotificationEvent) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        let order_id = event.order.id.clone();
        match self.lanes.entry(order_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if let Err(rejected) = occupied.get().send(event) {
                    // The previous lane worker already exited; start a new one.
                    let (tx, rx) = mpsc::unbounded_channel();
                    let _ = tx.send(rejected.0);
                    occupied.insert(tx.clone());
                    tokio::spawn(Self::run_lane(this, order_id, rx, tx));
                }
            }
            Entry::Vacant(vacant) => {
                let (tx, rx) = mpsc::unbounded_channel();
                // Send into a channel we hold both ends of.
                let _ = tx.send(event);
                vacant.insert(tx.clone());
                tokio::spawn(Self::run_lane(this, order_id, rx, tx));
            }
        }
    }

    /// Lane worker: drains one order's events FIFO. The lane retires after
    /// a terminal event; nothing may follow Delivered or Cancelled.
    async fn run_lane(
        self: Arc<Self>,
        order_id: String,
        mut rx: mpsc::UnboundedReceiver<NotificationEvent>,
        lane_tx: mpsc::UnboundedSender<NotificationEvent>,
    ) {
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            self.deliver(event).await;
            if terminal {
                break;
            }
        }
        // Remove only our own sender; a replacement lane keeps its slot.
        self.lanes
            .remove_if(&order_id, |_, current| current.same_channel(&lane_tx));
    }

    /// Fan one event out across both transports.
    async fn deliver(&self, event: NotificationEvent) {
        self.send_live(&event);

        if !self.provider.enabled() {
            tracing::debug!(
                order_id = %event.order.id,
                kind = event.kind.as_str(),
                "push delivery disabled, dashboard channel only"
            );
            return;
        }

        if let Some(owner_id) = self.restaurant_owner(&event.order.restaurant).await {
            self.push_to_user(&owner_id, Recipient::Restaurant, &event)
                .await;
        }
        self.push_to_user(&event.order.customer, Recipient::Customer, &event)
            .await;
    }

    /// Live-channel transport: one JSON frame to the restaurant dashboard.
    /// Best-effort: an absent channel or a failed enqueue is non-fatal.
    fn send_live(&self, event: &NotificationEvent) {
        let frame = match event.kind {
            NotificationKind::OrderPlaced => ServerMessage::NewOrder {
                order: event.order.clone(),
            },
            NotificationKind::OrderConfirmed => ServerMessage::OrderConfirmed {
                event: event.wire_payload(),
            },
            NotificationKind::OrderReady => ServerMessage::OrderReady {
                event: event.wire_payload(),
            },
            NotificationKind::OrderDelivered => ServerMessage::OrderDelivered {
                event: event.wire_payload(),
            },
            NotificationKind::OrderCancelled => ServerMessage::OrderCancelled {
                event: event.wire_payload(),
            },
        };

        match self.channels.lookup(&event.order.restaurant) {
            Some(channel) => {
                let outcome = if channel.send(&frame) { "sent" } else { "dropped" };
                self.audit(event, Recipient::Restaurant, "channel", outcome, 1, None);
            }
            None => {
                self.audit(event, Recipient::Restaurant, "channel", "dropped", 1, None);
            }
        }
    }

    /// Push transport for one recipient: one message per active token,
    /// batched at the provider-call level; failed batch items are
    /// rescheduled individually with the retry policy.
    async fn push_to_user(&self, user_id: &str, recipient: Recipient, event: &NotificationEvent) {
        let tokens = match self.active_tokens(user_id).await {
            Ok(tokens) => tokens,
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "token lookup failed");
                return;
            }
        };
        if tokens.is_empty() {
            return;
        }

        let messages: Vec<PushMessage> = tokens
            .into_iter()
            .map(|token| PushMessage {
                token,
                title: event.title(recipient).to_string(),
                body: event.body(recipient),
                data: event.push_data(recipient),
            })
            .collect();

        for chunk in messages.chunks(self.batch_size) {
            let results = self.provider.send_batch(chunk).await;
            for (message, result) in chunk.iter().zip(results) {
                match result {
                    Ok(()) => {
                        self.audit(event, recipient, "push", "sent", 1, Some(&message.token));
                    }
                    Err(err) if err.is_permanent() => {
                        self.audit(
                            event,
                            recipient,
                            "push",
                            "permanent-fail",
                            1,
                            Some(&message.token),
                        );
                        self.evict_token(user_id, &message.token).await;
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "transient push failure, rescheduling");
                        self.audit(
                            event,
                            recipient,
                            "push",
                            "transient-fail",
                            1,
                            Some(&message.token),
                        );
                        self.retry_message(user_id, recipient, event, message).await;
                    }
                }
            }
        }
    }

    /// Individual reschedule after a transient batch failure. The batch
    /// attempt counts as the first send; delays grow exponentially.
    async fn retry_message(
        &self,
        user_id: &str,
        recipient: Recipient,
        event: &NotificationEvent,
        message: &PushMessage,
    ) {
        for attempt in 2..=self.retry.max_attempts {
            tokio::time::sleep(self.retry.delay_after(attempt - 1)).await;
            self.audit(event, recipient, "push", "retried", attempt, Some(&message.token));

            match self.provider.send(message).await {
                Ok(()) => {
                    self.audit(event, recipient, "push", "sent", attempt, Some(&message.token));
                    return;
                }
                Err(err) if err.is_permanent() => {
                    self.audit(
                        event,
                        recipient,
                        "push",
                        "permanent-fail",
                        attempt,
                        Some(&message.token),
                    );
                    self.evict_token(user_id, &message.token).await;
                    return;
                }
                Err(_) if attempt == self.retry.max_attempts => {
                    self.audit(
                        event,
                        recipient,
                        "push",
                        "dropped",
                        attempt,
                        Some(&message.token),
                    );
                }
                Err(_) => {
                    self.audit(
                        event,
                        recipient,
                        "push",
                        "transient-fail",
                        attempt,
                        Some(&message.token),
                    );
                }
            }
        }
    }

    async fn active_tokens(&self, user_id: &str) -> Result<Vec<String>, crate::error::AppError> {
        let db = self.db.clone();
        let uid = user_id.to_string();
        let tokens = tokio::task::spawn_blocking(move || {
            let conn = db.lock()?;
            Ok::<_, crate::error::AppError>(devices::active_tokens(&conn, &uid)?)
        })
        .await??;
        Ok(tokens)
    }

    async fn restaurant_owner(&self, restaurant_id: &str) -> Option<String> {
        let db = self.db.clone();
        let rid = restaurant_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().ok()?;
            conn.query_row(
                "SELECT owner_id FROM restaurants WHERE id = ?1",
                rusqlite::params![rid],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .ok()
            .flatten()
        })
        .await
        .unwrap_or(None)
    }

    /// Remove a dead token so later dispatches skip it without retrying.
    async fn evict_token(&self, user_id: &str, token: &str) {
        let db = self.db.clone();
        let uid = user_id.to_string();
        let tok = token.to_string();
        let removed = tokio::task::spawn_blocking(move || {
            let conn = db.lock().ok()?;
            devices::remove_token(&conn, &uid, &tok).ok()
        })
        .await
        .ok()
        .flatten()
        .unwrap_or(0);

        if removed > 0 {
            tracing::info!(user_id = %uid_redacted(user_id), "removed unregistered push token");
        }
    }

    /// One audit record per transport attempt; the deterministic message id
    /// lets receivers suppress duplicates.
    fn audit(
        &self,
        event: &NotificationEvent,
        recipient: Recipient,
        transport: &str,
        outcome: &str,
        attempt: u32,
        token: Option<&str>,
    ) {
        tracing::info!(
            target: "audit",
            transport,
            outcome,
            attempt,
            kind = event.kind.as_str(),
            recipient = recipient.as_str(),
            order_id = %event.order.id,
            message_id = %event.message_id,
            token_prefix = token.map(|t| t.get(..8).unwrap_or(t)).unwrap_or(""),
            "notification delivery attempt"
        );
    }
}

fn uid_redacted(user_id: &str) -> &str {
    user_id.get(..8).unwrap_or(user_id)
}
