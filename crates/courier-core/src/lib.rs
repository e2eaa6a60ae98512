//! # courier-core
//!
//! The channel, subscription and presence engine for the Courier realtime
//! server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **App** - Tenant boundary owning a channel namespace and its connections
//! - **Channel** - Named pub/sub topic, classified by name prefix
//! - **Subscription** - Binding of one connection to one channel
//! - **ConnectionRegistry** - Lifecycle and liveness of client connections
//! - **dispatch** - Fan-out with originating-socket exclusion
//! - **auth** - HMAC-SHA256 request and subscription signing
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   AppStore  │────▶│     App     │────▶│   Channel   │
//! └─────────────┘     └─────────────┘     └──────┬──────┘
//!                            │                   │ roster
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │  Registry   │◀────│  dispatch   │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod app;
pub mod auth;
pub mod channel;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod storage;
pub mod subscription;

pub use app::{App, ChannelInfo, SubscribeOutcome};
pub use channel::{Channel, ChannelKind, PresenceEvent};
pub use connection::{Connection, ConnectionRegistry};
pub use dispatch::{Delivery, MAX_EVENT_BYTES};
pub use error::Error;
pub use storage::{AppStore, MemoryAppStore};
pub use subscription::Subscription;
