//! Error taxonomy for the Courier core.

use thiserror::Error;

/// Errors surfaced by the core engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Signature mismatch or unknown credential. Never reveals which part
    /// of the signature failed.
    #[error("Not authorized")]
    NotAuthorized,

    /// Valid credential but the tenant is administratively disabled.
    #[error("Application disabled")]
    ApplicationDisabled,

    /// Unknown application ID.
    #[error("Could not find an app with app_id: {0}")]
    AppNotFound(String),

    /// Unknown channel name on a read-only lookup.
    #[error("Could not find a channel with id {0}")]
    ChannelNotFound(String),

    /// Channel names must be non-empty.
    #[error("Empty channel name")]
    EmptyChannelName,

    /// Triggered event payload exceeds the protocol limit.
    #[error("Event data too large: {0} bytes")]
    EventDataTooLarge(usize),

    /// `user_count` was requested for something other than a presence
    /// channel.
    #[error("Attribute user_count is restricted to presence channels")]
    UserCountRestricted,

    /// A presence-only operation was attempted on a non-presence channel.
    #[error("This operation is restricted to presence channels")]
    PresenceOnly,

    /// Malformed request payload.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
