//! Channel abstraction.
//!
//! A channel is a named pub/sub topic. Its kind is derived purely from the
//! name prefix and never stored anywhere it could drift: `private-` names
//! require a subscription signature, `presence-` names additionally track a
//! member roster, everything else is public.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::Error;
use crate::subscription::Subscription;
use courier_protocol::PresenceMember;

/// Channel classification derived from the name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Public,
    Private,
    Presence,
}

impl ChannelKind {
    /// Classify a channel name. Pure: depends on the name alone.
    #[must_use]
    pub fn of(name: &str) -> Self {
        if name.starts_with("presence-") {
            ChannelKind::Presence
        } else if name.starts_with("private-") {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        }
    }

    /// Whether this kind tracks a member roster.
    #[must_use]
    pub fn is_presence(self) -> bool {
        self == ChannelKind::Presence
    }

    /// Whether subscribing requires a valid subscription signature.
    #[must_use]
    pub fn requires_auth(self) -> bool {
        matches!(self, ChannelKind::Private | ChannelKind::Presence)
    }
}

/// A roster slot: how many live subscriptions represent this member.
#[derive(Debug)]
struct MemberEntry {
    connections: usize,
    info: Option<Value>,
}

/// Membership change produced by a subscribe or unsubscribe.
///
/// Only roster transitions surface here: a member opening a second
/// connection or closing one of several produces nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    MemberAdded {
        user_id: String,
        user_info: Option<Value>,
    },
    MemberRemoved {
        user_id: String,
    },
}

/// A named pub/sub topic owning its subscription set and, for presence
/// channels, the member roster.
#[derive(Debug)]
pub struct Channel {
    name: String,
    kind: ChannelKind,
    /// Subscriptions keyed by socket ID: one per connection per channel.
    subscriptions: HashMap<String, Subscription>,
    /// Presence roster keyed by member ID. Always empty for non-presence
    /// channels.
    roster: HashMap<String, MemberEntry>,
}

impl Channel {
    /// Create a channel, classifying it from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = ChannelKind::of(&name);
        Self {
            name,
            kind,
            subscriptions: HashMap::new(),
            roster: HashMap::new(),
        }
    }

    /// Channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel kind.
    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Whether any subscriptions exist.
    #[must_use]
    pub fn is_occupied(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Number of subscriptions. May exceed the user count when one member
    /// holds several connections.
    #[must_use]
    pub fn total_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of distinct present members.
    ///
    /// # Errors
    ///
    /// User counts are a protocol error on non-presence channels, not zero.
    pub fn total_users(&self) -> Result<usize, Error> {
        if !self.kind.is_presence() {
            return Err(Error::UserCountRestricted);
        }
        Ok(self.roster.len())
    }

    /// Whether the given connection holds a subscription here.
    #[must_use]
    pub fn is_subscribed(&self, socket_id: &str) -> bool {
        self.subscriptions.contains_key(socket_id)
    }

    /// Insert or replace the subscription for a connection.
    ///
    /// Subscribing the same connection twice is idempotent: the stored data
    /// is replaced and the presence refcount is untouched unless the member
    /// identity changed. Returns the roster transitions the caller must
    /// broadcast.
    pub fn subscribe(&mut self, subscription: Subscription) -> Vec<PresenceEvent> {
        let socket_id = subscription.socket_id.clone();
        let member = subscription.member.clone();
        let previous = self.subscriptions.insert(socket_id.clone(), subscription);

        debug!(channel = %self.name, socket = %socket_id, "Subscribed");

        if !self.kind.is_presence() {
            return Vec::new();
        }

        let mut events = Vec::new();
        let previous_member = previous.and_then(|p| p.member);

        match (previous_member, member) {
            // Fresh subscription carrying a member.
            (None, Some(new)) => events.extend(self.roster_join(new)),
            // Duplicate subscribe under the same identity: refresh info only.
            (Some(old), Some(new)) if old.user_id == new.user_id => {
                if let Some(entry) = self.roster.get_mut(&new.user_id) {
                    entry.info = new.user_info;
                }
            }
            // Identity changed on re-subscribe.
            (Some(old), Some(new)) => {
                events.extend(self.roster_leave(&old.user_id));
                events.extend(self.roster_join(new));
            }
            (Some(old), None) => events.extend(self.roster_leave(&old.user_id)),
            (None, None) => {}
        }

        events
    }

    /// Remove the subscription held by a connection, if any.
    ///
    /// A no-op for connections that are not subscribed. Returns the roster
    /// transitions the caller must broadcast.
    pub fn unsubscribe(&mut self, socket_id: &str) -> Vec<PresenceEvent> {
        let Some(subscription) = self.subscriptions.remove(socket_id) else {
            return Vec::new();
        };

        debug!(channel = %self.name, socket = %socket_id, "Unsubscribed");

        match subscription.member {
            Some(member) if self.kind.is_presence() => self.roster_leave(&member.user_id),
            _ => Vec::new(),
        }
    }

    fn roster_join(&mut self, member: PresenceMember) -> Vec<PresenceEvent> {
        let entry = self
            .roster
            .entry(member.user_id.clone())
            .or_insert(MemberEntry {
                connections: 0,
                info: None,
            });
        entry.connections += 1;
        entry.info = member.user_info.clone();

        if entry.connections == 1 {
            vec![PresenceEvent::MemberAdded {
                user_id: member.user_id,
                user_info: member.user_info,
            }]
        } else {
            Vec::new()
        }
    }

    fn roster_leave(&mut self, user_id: &str) -> Vec<PresenceEvent> {
        let Some(entry) = self.roster.get_mut(user_id) else {
            return Vec::new();
        };
        entry.connections -= 1;
        if entry.connections == 0 {
            self.roster.remove(user_id);
            vec![PresenceEvent::MemberRemoved {
                user_id: user_id.to_string(),
            }]
        } else {
            Vec::new()
        }
    }

    /// Snapshot of the current subscriptions, safe to iterate after the
    /// channel lock is released.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.values().cloned().collect()
    }

    /// Socket IDs of all current subscribers.
    #[must_use]
    pub fn subscriber_ids(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }

    /// Distinct member IDs currently present.
    #[must_use]
    pub fn member_ids(&self) -> Vec<String> {
        self.roster.keys().cloned().collect()
    }

    /// The presence payload sent in `subscription_succeeded`:
    /// `{"ids", "hash", "count"}`.
    #[must_use]
    pub fn presence_roster(&self) -> Value {
        let ids: Vec<&String> = self.roster.keys().collect();
        let hash: serde_json::Map<String, Value> = self
            .roster
            .iter()
            .map(|(id, entry)| (id.clone(), entry.info.clone().unwrap_or(Value::Null)))
            .collect();
        json!({
            "ids": ids,
            "hash": hash,
            "count": self.roster.len(),
        })
    }
}
