//! Protocol version negotiation.
//!
//! Clients announce the protocol revision they speak via the `protocol`
//! query parameter on the WebSocket URL. Connections announcing a revision
//! outside the supported range are refused with error code 4007.

/// Protocol revision this server speaks.
pub const PROTOCOL_VERSION: u8 = 7;

/// Oldest protocol revision still accepted.
pub const MIN_PROTOCOL_VERSION: u8 = 5;

/// Check whether a client-announced protocol revision is supported.
#[must_use]
pub fn is_supported(version: u8) -> bool {
    (MIN_PROTOCOL_VERSION..=PROTOCOL_VERSION).contains(&version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_range() {
        assert!(is_supported(PROTOCOL_VERSION));
        assert!(is_supported(MIN_PROTOCOL_VERSION));
        assert!(!is_supported(MIN_PROTOCOL_VERSION - 1));
        assert!(!is_supported(PROTOCOL_VERSION + 1));
    }
}
