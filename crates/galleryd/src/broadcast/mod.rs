//! Live notification of download lifecycle events.
//!
//! The broadcaster is transport-agnostic: a WebSocket (or SSE) handler
//! authenticates with [`NotificationBroadcaster::subscribe_with_token`],
//! forwards every frame from the returned receiver, and unsubscribes on
//! disconnect.

pub mod event;
pub mod notifier;

pub use event::{EventKind, NotificationEvent, WelcomeFrame};
pub use notifier::{
    extract_token, BroadcastError, FrameSender, NotificationBroadcaster, SubscriberId,
    Subscription,
};
