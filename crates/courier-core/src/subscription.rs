//! Channel subscriptions.
//!
//! A subscription binds one connection to one channel. It refers to its
//! connection by socket ID rather than holding the connection itself; the
//! registry stays the single owner of connection lifetime.

use courier_protocol::PresenceMember;

/// The binding of one connection to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Socket ID of the owning connection.
    pub socket_id: String,
    /// Presence member identity and metadata, absent on non-presence
    /// channels.
    pub member: Option<PresenceMember>,
}

impl Subscription {
    /// Create a subscription without presence data.
    #[must_use]
    pub fn new(socket_id: impl Into<String>) -> Self {
        Self {
            socket_id: socket_id.into(),
            member: None,
        }
    }

    /// Attach presence member data.
    #[must_use]
    pub fn with_member(mut self, member: PresenceMember) -> Self {
        self.member = Some(member);
        self
    }

    /// The member identity this subscription represents, if any.
    #[must_use]
    pub fn member_id(&self) -> Option<&str> {
        self.member.as_ref().map(|m| m.user_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscription_member_id() {
        let plain = Subscription::new("1.2");
        assert_eq!(plain.member_id(), None);

        let member = PresenceMember {
            user_id: "u1".to_string(),
            user_info: Some(json!({"name": "Alice"})),
        };
        let presence = Subscription::new("1.2").with_member(member);
        assert_eq!(presence.member_id(), Some("u1"));
    }
}
