//! # courier-protocol
//!
//! Wire protocol definitions for the Courier realtime server.
//!
//! Courier speaks the Pusher channel protocol: every frame on the wire is a
//! JSON object with an `event` name, an optional `channel`, and an optional
//! `data` payload. Protocol-internal events carry `data` as a JSON-encoded
//! *string* (double encoding), while triggered events pass the caller's
//! payload through untouched.
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, WireEvent};
//!
//! let frame = WireEvent::connection_established("42.1337", 120);
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(std::str::from_utf8(&encoded).unwrap()).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use events::{PresenceMember, SubscribePayload, UnsubscribePayload, WireEvent};
pub use version::{is_supported, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};
