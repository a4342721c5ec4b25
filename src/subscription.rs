//! Subscription vocabulary
//!
//! The core dispatches subscriptions through the same pipeline as queries
//! and mutations: the handler returns a serialisable [`SubscriptionToken`],
//! and the transport wires the actual event stream using the channel
//! utilities here. The frozen routing table never holds live channel ends.
//!
//! # Example
//! ```rust,ignore
//! use nexus_rpc::subscription::{Event, SubscriptionToken, event_channel};
//!
//! async fn ticker(_input: TickerInput, ctx: Context) -> RpcResult<SubscriptionToken> {
//!     let token = SubscriptionToken::new();
//!     let (tx, rx) = event_channel(32);
//!     // Hand `rx` to the transport keyed by `token.subscription_id`,
//!     // then produce events through `tx`.
//!     Ok(token)
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique subscription identifier.
///
/// Rendered as `sub_<uuid>`; parsing accepts both the prefixed and the bare
/// form for compatibility with older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse an identifier, accepting the `sub_` prefix or a bare uuid.
    pub fn parse_lenient(raw: &str) -> Result<Self, uuid::Error> {
        let bare = raw.strip_prefix("sub_").unwrap_or(raw);
        Uuid::parse_str(bare).map(Self)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

impl FromStr for SubscriptionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_lenient(s)
    }
}

impl Serialize for SubscriptionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SubscriptionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse_lenient(&raw).map_err(serde::de::Error::custom)
    }
}

/// One event in a subscription stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T> {
    /// The event payload
    pub data: T,
    /// Optional event id for resumption/deduplication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl<T> Event<T> {
    /// Create an event.
    pub fn new(data: T) -> Self {
        Self { data, id: None }
    }

    /// Create an event with an id.
    pub fn with_id(data: T, id: impl Into<String>) -> Self {
        Self {
            data,
            id: Some(id.into()),
        }
    }
}

/// Sending half of a subscription event channel.
pub type EventSender<T> = mpsc::Sender<Event<T>>;

/// Receiving half of a subscription event channel; owned by the transport.
pub type EventStream<T> = mpsc::Receiver<Event<T>>;

/// Create a bounded subscription event channel.
pub fn event_channel<T>(capacity: usize) -> (EventSender<T>, EventStream<T>) {
    mpsc::channel(capacity)
}

/// The value a subscription handler returns: a registration token the
/// transport uses to wire the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionToken {
    /// The subscription's identifier
    pub subscription_id: SubscriptionId,
}

impl SubscriptionToken {
    /// Create a token with a fresh identifier.
    pub fn new() -> Self {
        Self {
            subscription_id: SubscriptionId::new(),
        }
    }
}

impl Default for SubscriptionToken {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip_both_forms() {
        let id = SubscriptionId::new();
        let prefixed = id.to_string();
        assert!(prefixed.starts_with("sub_"));

        let bare = prefixed.strip_prefix("sub_").unwrap();
        assert_eq!(SubscriptionId::parse_lenient(&prefixed).unwrap(), id);
        assert_eq!(SubscriptionId::parse_lenient(bare).unwrap(), id);
    }

    #[test]
    fn test_id_rejects_garbage() {
        assert!(SubscriptionId::parse_lenient("not-a-uuid").is_err());
        assert!(SubscriptionId::parse_lenient("sub_invalid").is_err());
        assert!(SubscriptionId::parse_lenient("").is_err());
    }

    #[test]
    fn test_token_serializes_with_prefixed_id() {
        let token = SubscriptionToken::new();
        let json = serde_json::to_value(&token).unwrap();
        let rendered = json["subscription_id"].as_str().unwrap();
        assert!(rendered.starts_with("sub_"));

        let back: SubscriptionToken = serde_json::from_value(json).unwrap();
        assert_eq!(back.subscription_id, token.subscription_id);
    }

    #[tokio::test]
    async fn test_event_channel_delivers_in_order() {
        let (tx, mut rx) = event_channel(4);
        tx.send(Event::new(1)).await.unwrap();
        tx.send(Event::with_id(2, "evt-2")).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().data, 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.data, 2);
        assert_eq!(second.id.as_deref(), Some("evt-2"));
        assert!(rx.recv().await.is_none());
    }
}
