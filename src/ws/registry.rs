//! Restaurant-keyed registry of live dashboard channels.
//!
//! At most one channel per restaurant: a second attach atomically replaces
//! the first and closes it with code 1000 ("superseded"). Liveness is an
//! `isAlive` flag cleared by the scheduler-driven heartbeat sweep and
//! re-set by transport pongs. All sends under the map lock are in-memory
//! queue pushes; socket I/O happens only in the per-connection writer task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::ws::protocol::ServerMessage;

/// Bounded per-channel outbound queue; overflow drops the oldest frame.
pub const OUTBOUND_QUEUE_CAP: usize = 64;

/// Close codes on the dashboard channel.
pub const CLOSE_SUPERSEDED: u16 = 1000;
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 1001;
pub const CLOSE_MALFORMED: u16 = 1003;
pub const CLOSE_AUTH_FAILURE: u16 = 4001;
pub const CLOSE_FORBIDDEN: u16 = 4003;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound frame queue shared between the channel handle and the writer
/// task. Pushes never block; the queue is capped and drops the oldest
/// undelivered frame on overflow.
struct Outbound {
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: Arc<AtomicU64>,
}

impl Outbound {
    fn new(dropped: Arc<AtomicU64>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped,
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Message>> {
        // The queue mutex guards only VecDeque operations; a poisoned
        // guard still holds a structurally valid queue.
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, msg: Message) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut queue = self.lock_queue();
            if queue.len() >= OUTBOUND_QUEUE_CAP {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("outbound queue overflow, dropped oldest frame");
            }
            queue.push_back(msg);
        }
        self.notify.notify_one();
    }

    fn push_close(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut queue = self.lock_queue();
            queue.push_back(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_string().into(),
            })));
        }
        self.notify.notify_one();
    }

    /// Next frame for the writer task; None once closed and drained.
    async fn next(&self) -> Option<Message> {
        loop {
            {
                let mut queue = self.lock_queue();
                if let Some(msg) = queue.pop_front() {
                    return Some(msg);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Handle to one live dashboard channel.
pub struct ChannelHandle {
    pub restaurant_id: String,
    pub owner_user_id: String,
    pub conn_id: u64,
    outbound: Outbound,
    is_alive: AtomicBool,
}

impl ChannelHandle {
    fn new(
        restaurant_id: String,
        owner_user_id: String,
        dropped: Arc<AtomicU64>,
    ) -> Arc<Self> {
        Arc::new(Self {
            restaurant_id,
            owner_user_id,
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            outbound: Outbound::new(dropped),
            is_alive: AtomicBool::new(true),
        })
    }

    /// Enqueue one JSON frame. Best-effort: serialization failures and
    /// closed channels report false without disturbing the connection.
    pub fn send(&self, msg: &ServerMessage) -> bool {
        if self.outbound.closed.load(Ordering::Acquire) {
            return false;
        }
        match serde_json::to_string(msg) {
            Ok(json) => {
                self.outbound.push(Message::Text(json.into()));
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to encode dashboard frame");
                false
            }
        }
    }

    /// Enqueue a raw transport frame (ping/pong).
    pub(crate) fn send_raw(&self, msg: Message) {
        self.outbound.push(msg);
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.outbound.push_close(code, reason);
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.closed.load(Ordering::Acquire)
    }

    /// Transport pong received: channel survives the next sweep.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Release);
    }

    /// Heartbeat probe: returns whether the channel answered since the
    /// previous tick, clearing the flag for the next round.
    fn probe_and_clear(&self) -> bool {
        self.is_alive.swap(false, Ordering::AcqRel)
    }

    pub(crate) async fn next_outbound(&self) -> Option<Message> {
        self.outbound.next().await
    }
}

/// Registry of live dashboard channels, keyed by restaurant id.
pub struct ChannelRegistry {
    channels: DashMap<String, Arc<ChannelHandle>>,
    dropped_frames: Arc<AtomicU64>,
}

impl ChannelRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: DashMap::new(),
            dropped_frames: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Create a handle and register it, superseding any prior channel for
    /// the same restaurant. The map insert is atomic: no instant exists in
    /// which a lookup returns the superseded channel.
    pub fn attach(&self, restaurant_id: &str, owner_user_id: &str) -> Arc<ChannelHandle> {
        let handle = ChannelHandle::new(
            restaurant_id.to_string(),
            owner_user_id.to_string(),
            self.dropped_frames.clone(),
        );
        if let Some(prev) = self
            .channels
            .insert(restaurant_id.to_string(), handle.clone())
        {
            tracing::info!(
                restaurant_id = %restaurant_id,
                "dashboard channel superseded"
            );
            prev.close(CLOSE_SUPERSEDED, "superseded");
        }
        handle
    }

    /// Remove a channel, but only if it is still the registered one:
    /// a superseding channel must not be evicted by the old actor's exit.
    pub fn detach(&self, restaurant_id: &str, conn_id: u64) {
        self.channels
            .remove_if(restaurant_id, |_, ch| ch.conn_id == conn_id);
    }

    pub fn lookup(&self, restaurant_id: &str) -> Option<Arc<ChannelHandle>> {
        self.channels.get(restaurant_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Total frames dropped to outbound-queue overflow across all channels.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// One heartbeat pass: channels that did not pong since the last tick
    /// are closed and removed under the shard lock (a lookup can never
    /// return a terminated channel); the rest are probed with a fresh ping.
    pub fn heartbeat_sweep(&self) {
        let mut terminated = 0usize;
        self.channels.retain(|restaurant_id, channel| {
            if channel.probe_and_clear() {
                channel.send_raw(Message::Ping(Vec::new().into()));
                true
            } else {
                tracing::warn!(
                    restaurant_id = %restaurant_id,
                    "dashboard channel missed heartbeat, terminating"
                );
                channel.close(CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout");
                terminated += 1;
                false
            }
        });
        if terminated > 0 {
            tracing::info!(terminated, "heartbeat sweep removed dead channels");
        }
    }
}
