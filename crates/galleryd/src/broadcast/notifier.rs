//! Fan-out of lifecycle events to live subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use super::event::{NotificationEvent, WelcomeFrame};

pub type SubscriberId = u64;

/// Sender half for one subscriber's outbound frames.
pub type FrameSender = mpsc::UnboundedSender<String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("Notification broadcaster is not running")]
    Stopped,

    #[error("Invalid notification token")]
    Unauthorized,
}

/// A live subscription. Frames arrive as JSON text on `receiver`.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::UnboundedReceiver<String>,
}

/// Picks the subscription token from an `Authorization: Bearer` header,
/// falling back to a `token` query parameter.
pub fn extract_token<'a>(authorization: Option<&'a str>, query_token: Option<&'a str>) -> Option<&'a str> {
    if let Some(header) = authorization {
        if let Some(scheme) = header.get(..7) {
            if scheme.eq_ignore_ascii_case("bearer ") {
                return Some(header[7..].trim());
            }
        }
    }
    query_token
}

struct Subscriber {
    sender: FrameSender,
    connected_at: DateTime<Utc>,
}

struct State {
    running: bool,
    subscribers: HashMap<SubscriberId, Subscriber>,
}

/// Process-scoped set of notification subscribers.
///
/// Share it behind an `Arc`. Starts stopped; call [`start`](Self::start)
/// before accepting subscriptions.
pub struct NotificationBroadcaster {
    state: Mutex<State>,
    next_id: AtomicU64,
    api_token: String,
}

impl std::fmt::Debug for NotificationBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBroadcaster")
            .field("running", &self.is_running())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl NotificationBroadcaster {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(State {
                running: false,
                subscribers: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            api_token: api_token.into(),
        }
    }

    /// Subscriber-set access. A poisoned lock is recovered: the set holds
    /// no invariant a panicking holder could break.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(&self) {
        let mut state = self.lock();
        if !state.running {
            state.running = true;
            info!("Notification broadcaster started");
        }
    }

    /// Drops every subscriber and refuses new ones until restarted.
    pub fn stop(&self) {
        let mut state = self.lock();
        let count = state.subscribers.len();
        state.subscribers.clear();
        state.running = false;
        info!("Notification broadcaster stopped ({} subscribers dropped)", count);
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// When a subscriber connected, if it is still subscribed.
    pub fn connected_at(&self, id: SubscriberId) -> Option<DateTime<Utc>> {
        self.lock().subscribers.get(&id).map(|s| s.connected_at)
    }

    /// Compares `token` against the shared secret in constant time.
    pub fn verify_token(&self, token: &str) -> bool {
        let expected = self.api_token.as_bytes();
        let given = token.as_bytes();
        expected.len() == given.len() && constant_time_eq(expected, given)
    }

    /// Adds a subscriber. The welcome frame is already queued on the
    /// returned receiver.
    pub fn subscribe(&self) -> Result<Subscription, BroadcastError> {
        let mut state = self.lock();
        if !state.running {
            return Err(BroadcastError::Stopped);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        match serde_json::to_string(&WelcomeFrame::default()) {
            Ok(frame) => {
                let _ = sender.send(frame);
            }
            Err(e) => warn!("Failed to serialize welcome frame: {}", e),
        }

        state.subscribers.insert(
            id,
            Subscriber {
                sender,
                connected_at: Utc::now(),
            },
        );
        debug!("Subscriber {} connected ({} total)", id, state.subscribers.len());

        Ok(Subscription { id, receiver })
    }

    /// [`subscribe`](Self::subscribe) gated on the shared secret.
    pub fn subscribe_with_token(&self, token: &str) -> Result<Subscription, BroadcastError> {
        if !self.verify_token(token) {
            warn!("Rejected notification subscription with invalid token");
            return Err(BroadcastError::Unauthorized);
        }
        self.subscribe()
    }

    /// Idempotent.
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.lock().subscribers.remove(&id).is_some() {
            debug!("Subscriber {} disconnected", id);
        }
    }

    /// Sends `event` to every subscriber, dropping those whose receiver is
    /// gone. Returns the number of successful deliveries.
    pub fn broadcast(&self, event: &NotificationEvent) -> usize {
        let frame = match event.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to serialize {:?} event: {}", event.kind, e);
                return 0;
            }
        };

        let mut state = self.lock();
        let mut delivered = 0;
        state.subscribers.retain(|id, subscriber| {
            if subscriber.sender.send(frame.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                debug!("Dropping unreachable subscriber {}", id);
                false
            }
        });

        debug!(
            "Broadcast {:?} for {} to {} subscribers",
            event.kind, event.download_id, delivered
        );
        delivered
    }
}
