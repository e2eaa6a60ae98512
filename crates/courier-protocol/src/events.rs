//! Event frames for the Pusher channel protocol.
//!
//! A frame is a JSON object `{"event", "channel"?, "data"?}`. Events in the
//! `pusher:` and `pusher_internal:` namespaces are emitted by the server or
//! the client library; `client-` prefixed events originate from connected
//! clients on private and presence channels.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::codec::ProtocolError;

/// Well-known event names.
pub mod names {
    pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
    pub const SUBSCRIBE: &str = "pusher:subscribe";
    pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
    pub const PING: &str = "pusher:ping";
    pub const PONG: &str = "pusher:pong";
    pub const ERROR: &str = "pusher:error";
    pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
    pub const MEMBER_ADDED: &str = "pusher_internal:member_added";
    pub const MEMBER_REMOVED: &str = "pusher_internal:member_removed";

    /// Prefix reserved for client-originated events.
    pub const CLIENT_EVENT_PREFIX: &str = "client-";
}

/// Protocol error codes carried in `pusher:error` frames.
pub mod codes {
    /// Application does not exist.
    pub const APP_NOT_FOUND: u16 = 4001;
    /// Application disabled.
    pub const APP_DISABLED: u16 = 4003;
    /// Client requested a protocol version the server does not speak.
    pub const UNSUPPORTED_PROTOCOL: u16 = 4007;
    /// Connection is not authorized for the attempted operation.
    pub const NOT_AUTHORIZED: u16 = 4009;
}

/// Check whether an event name is a client-originated event.
#[must_use]
pub fn is_client_event(name: &str) -> bool {
    name.starts_with(names::CLIENT_EVENT_PREFIX)
}

/// A protocol frame, inbound or outbound.
///
/// `data` is kept as an arbitrary JSON value: triggered events pass the
/// caller's payload through as-is (usually a string holding encoded JSON),
/// while the server-side builders below double-encode their payloads the
/// way the protocol mandates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Event name.
    pub event: String,

    /// Channel the event belongs to, absent for connection-level events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Event payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WireEvent {
    /// Create a frame with every field supplied by the caller.
    #[must_use]
    pub fn new(event: impl Into<String>, channel: Option<String>, data: Option<Value>) -> Self {
        Self {
            event: event.into(),
            channel,
            data,
        }
    }

    /// A triggered event addressed to a channel.
    #[must_use]
    pub fn channel_event(name: impl Into<String>, channel: impl Into<String>, data: Value) -> Self {
        Self::new(name, Some(channel.into()), Some(data))
    }

    /// The greeting sent immediately after a connection is accepted.
    #[must_use]
    pub fn connection_established(socket_id: &str, activity_timeout: u64) -> Self {
        Self::new(
            names::CONNECTION_ESTABLISHED,
            None,
            Some(double_encode(&json!({
                "socket_id": socket_id,
                "activity_timeout": activity_timeout,
            }))),
        )
    }

    /// Acknowledge a successful subscription.
    ///
    /// For presence channels `presence` carries the full roster payload;
    /// other channels acknowledge with an empty object.
    #[must_use]
    pub fn subscription_succeeded(channel: &str, presence: Option<Value>) -> Self {
        let payload = match presence {
            Some(roster) => json!({ "presence": roster }),
            None => json!({}),
        };
        Self::new(
            names::SUBSCRIPTION_SUCCEEDED,
            Some(channel.to_string()),
            Some(double_encode(&payload)),
        )
    }

    /// A member joined a presence channel.
    #[must_use]
    pub fn member_added(channel: &str, user_id: &str, user_info: Option<&Value>) -> Self {
        let payload = match user_info {
            Some(info) => json!({ "user_id": user_id, "user_info": info }),
            None => json!({ "user_id": user_id }),
        };
        Self::new(
            names::MEMBER_ADDED,
            Some(channel.to_string()),
            Some(double_encode(&payload)),
        )
    }

    /// A member left a presence channel.
    #[must_use]
    pub fn member_removed(channel: &str, user_id: &str) -> Self {
        Self::new(
            names::MEMBER_REMOVED,
            Some(channel.to_string()),
            Some(double_encode(&json!({ "user_id": user_id }))),
        )
    }

    /// Keepalive response.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(names::PONG, None, Some(double_encode(&json!({}))))
    }

    /// An error frame; `code` follows the 4xxx protocol error codes.
    #[must_use]
    pub fn error(code: Option<u16>, message: impl Into<String>) -> Self {
        Self::new(
            names::ERROR,
            None,
            Some(double_encode(&json!({
                "code": code,
                "message": message.into(),
            }))),
        )
    }

    /// Parse the payload of a `pusher:subscribe` frame.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is absent or malformed.
    pub fn subscribe_payload(&self) -> Result<SubscribePayload, ProtocolError> {
        let data = self
            .data
            .clone()
            .ok_or(ProtocolError::MissingData(names::SUBSCRIBE))?;
        Ok(serde_json::from_value(data)?)
    }

    /// Parse the payload of a `pusher:unsubscribe` frame.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is absent or malformed.
    pub fn unsubscribe_payload(&self) -> Result<UnsubscribePayload, ProtocolError> {
        let data = self
            .data
            .clone()
            .ok_or(ProtocolError::MissingData(names::UNSUBSCRIBE))?;
        Ok(serde_json::from_value(data)?)
    }
}

/// Encode a payload as the JSON string the protocol expects in `data`.
fn double_encode(payload: &Value) -> Value {
    // serde_json only fails on non-string map keys, which json!() cannot
    // produce here.
    Value::String(serde_json::to_string(payload).unwrap_or_default())
}

/// Payload of a `pusher:subscribe` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscribePayload {
    /// Channel to subscribe to.
    pub channel: String,
    /// Subscription signature, required for private and presence channels.
    #[serde(default)]
    pub auth: Option<String>,
    /// JSON-encoded presence member data (`{"user_id", "user_info"?}`).
    #[serde(default)]
    pub channel_data: Option<String>,
}

impl SubscribePayload {
    /// Parse the presence member carried in `channel_data`.
    ///
    /// # Errors
    ///
    /// Returns an error if `channel_data` is absent or not valid member JSON.
    pub fn member(&self) -> Result<PresenceMember, ProtocolError> {
        let raw = self
            .channel_data
            .as_deref()
            .ok_or(ProtocolError::MissingData("channel_data"))?;
        Ok(serde_json::from_str(raw)?)
    }
}

/// Payload of a `pusher:unsubscribe` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnsubscribePayload {
    /// Channel to unsubscribe from.
    pub channel: String,
}

/// Presence member identity supplied at subscribe time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMember {
    /// Application-assigned member identity.
    pub user_id: String,
    /// Arbitrary member metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_established_shape() {
        let frame = WireEvent::connection_established("81607.5039", 120);
        assert_eq!(frame.event, names::CONNECTION_ESTABLISHED);
        assert!(frame.channel.is_none());

        // data is a JSON-encoded string
        let data = frame.data.unwrap();
        let inner: Value = serde_json::from_str(data.as_str().unwrap()).unwrap();
        assert_eq!(inner["socket_id"], "81607.5039");
        assert_eq!(inner["activity_timeout"], 120);
    }

    #[test]
    fn test_member_added_payload() {
        let info = json!({"name": "Alice"});
        let frame = WireEvent::member_added("presence-lobby", "u1", Some(&info));
        let inner: Value =
            serde_json::from_str(frame.data.unwrap().as_str().unwrap()).unwrap();
        assert_eq!(inner["user_id"], "u1");
        assert_eq!(inner["user_info"]["name"], "Alice");

        let frame = WireEvent::member_removed("presence-lobby", "u1");
        let inner: Value =
            serde_json::from_str(frame.data.unwrap().as_str().unwrap()).unwrap();
        assert_eq!(inner, json!({"user_id": "u1"}));
    }

    #[test]
    fn test_subscribe_payload_parsing() {
        let frame: WireEvent = serde_json::from_str(
            r#"{"event":"pusher:subscribe","data":{"channel":"presence-room","auth":"key:sig","channel_data":"{\"user_id\":\"7\"}"}}"#,
        )
        .unwrap();

        let payload = frame.subscribe_payload().unwrap();
        assert_eq!(payload.channel, "presence-room");
        assert_eq!(payload.auth.as_deref(), Some("key:sig"));

        let member = payload.member().unwrap();
        assert_eq!(member.user_id, "7");
        assert!(member.user_info.is_none());
    }

    #[test]
    fn test_subscribe_payload_missing_data() {
        let frame = WireEvent::new(names::SUBSCRIBE, None, None);
        assert!(matches!(
            frame.subscribe_payload(),
            Err(ProtocolError::MissingData(_))
        ));
    }

    #[test]
    fn test_client_event_prefix() {
        assert!(is_client_event("client-typing"));
        assert!(!is_client_event("pusher:ping"));
        assert!(!is_client_event("typing"));
    }
}
