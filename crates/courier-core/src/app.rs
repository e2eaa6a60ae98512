//! Application: the tenant boundary.
//!
//! An application owns the channel namespace for one credential pair and
//! the registry of its live connections. All mutation of a channel happens
//! through its `DashMap` entry, so per-channel operations serialize against
//! each other while distinct channels proceed in parallel. Snapshots of the
//! subscriber set are taken before any frame is written, so fan-out never
//! holds a channel lock.
//!
//! Empty channels are pruned immediately: a channel exists exactly while it
//! has subscribers. Re-subscribing recreates it.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelKind, PresenceEvent};
use crate::connection::{Connection, ConnectionRegistry};
use crate::dispatch::{self, Delivery};
use crate::error::Error;
use crate::subscription::Subscription;
use courier_protocol::{PresenceMember, WireEvent};

/// Point-in-time view of one channel, safe to hold after the channel lock
/// is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub kind: ChannelKind,
    pub occupied: bool,
    pub subscription_count: usize,
    /// Distinct member count; `None` for non-presence channels.
    pub user_count: Option<usize>,
}

impl From<&Channel> for ChannelInfo {
    fn from(channel: &Channel) -> Self {
        Self {
            name: channel.name().to_string(),
            kind: channel.kind(),
            occupied: channel.is_occupied(),
            subscription_count: channel.total_subscriptions(),
            user_count: channel.total_users().ok(),
        }
    }
}

/// Result of a successful subscribe.
#[derive(Debug, Clone)]
pub struct SubscribeOutcome {
    pub channel: String,
    pub kind: ChannelKind,
    /// Roster payload for `subscription_succeeded` on presence channels.
    pub presence: Option<Value>,
}

/// A tenant: one API credential pair and its channel namespace.
#[derive(Debug)]
pub struct App {
    app_id: String,
    secret: String,
    enabled: bool,
    channels: DashMap<String, Channel>,
    registry: ConnectionRegistry,
}

impl App {
    /// Create an application shell; connections and channels attach later.
    #[must_use]
    pub fn new(app_id: impl Into<String>, secret: impl Into<String>, enabled: bool) -> Self {
        Self {
            app_id: app_id.into(),
            secret: secret.into(),
            enabled,
            channels: DashMap::new(),
            registry: ConnectionRegistry::new(),
        }
    }

    /// Stable external identifier.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Signing secret. Consumed by the authenticator only, never serialized
    /// outward.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Whether the tenant is administratively enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Accept a new connection around the given outbound sink.
    pub fn connect(&self, sender: mpsc::UnboundedSender<Bytes>) -> Arc<Connection> {
        self.registry.register(sender)
    }

    /// Tear down a connection, cascading the removal of every subscription
    /// it held and broadcasting the resulting presence leaves.
    ///
    /// Idempotent and infallible: cleanup is always best-effort.
    pub fn disconnect(&self, socket_id: &str) {
        let Some((_, channels)) = self.registry.unregister(socket_id) else {
            return;
        };
        debug!(app = %self.app_id, socket = %socket_id, channels = channels.len(), "Disconnect");
        for channel in channels {
            self.remove_subscription(socket_id, &channel);
        }
    }

    /// Subscribe a live connection to a channel, creating the channel on
    /// first reference.
    ///
    /// Presence channels require member data; a first join broadcasts
    /// `member_added` to the other subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty channel name, an unknown socket, or a
    /// presence subscription without member data.
    pub fn subscribe(
        &self,
        socket_id: &str,
        channel_name: &str,
        member: Option<PresenceMember>,
    ) -> Result<SubscribeOutcome, Error> {
        if channel_name.trim().is_empty() {
            return Err(Error::EmptyChannelName);
        }
        if self.registry.lookup(socket_id).is_none() {
            return Err(Error::InvalidRequest(format!(
                "unknown socket_id {socket_id}"
            )));
        }

        let kind = ChannelKind::of(channel_name);
        if kind.is_presence() && member.is_none() {
            return Err(Error::InvalidRequest(
                "presence subscription requires channel_data".to_string(),
            ));
        }

        let mut subscription = Subscription::new(socket_id);
        if let Some(member) = member {
            subscription = subscription.with_member(member);
        }

        let mut entry = self
            .channels
            .entry(channel_name.to_string())
            .or_insert_with(|| {
                debug!(app = %self.app_id, channel = %channel_name, "Creating channel");
                Channel::new(channel_name)
            });
        let events = entry.subscribe(subscription);
        let presence = kind.is_presence().then(|| entry.presence_roster());
        let targets = entry.subscriber_ids();
        drop(entry);

        if !self.commit_subscription(socket_id, channel_name) {
            return Err(Error::InvalidRequest(format!(
                "unknown socket_id {socket_id}"
            )));
        }

        // The joining socket learns the roster from subscription_succeeded,
        // not from its own member_added.
        self.broadcast_presence(channel_name, &targets, events, Some(socket_id));

        Ok(SubscribeOutcome {
            channel: channel_name.to_string(),
            kind,
            presence,
        })
    }

    /// Record the membership, then confirm the socket is still registered.
    ///
    /// A disconnect that ran between the liveness check and the channel
    /// insert could not see this membership, so its cascade misses the
    /// subscription; the rollback for that interleaving happens here,
    /// before any presence event is broadcast.
    fn commit_subscription(&self, socket_id: &str, channel_name: &str) -> bool {
        self.registry.track(socket_id, channel_name);
        if self.registry.lookup(socket_id).is_some() {
            return true;
        }
        debug!(app = %self.app_id, socket = %socket_id, channel = %channel_name,
            "Rolled back subscription for disconnected socket");
        self.registry.untrack(socket_id, channel_name);
        self.rollback_subscription(socket_id, channel_name);
        false
    }

    /// Remove a half-committed subscription without broadcasting: no
    /// member_added went out, so no member_removed may either.
    fn rollback_subscription(&self, socket_id: &str, channel_name: &str) {
        let Some(mut entry) = self.channels.get_mut(channel_name) else {
            return;
        };
        entry.unsubscribe(socket_id);
        let emptied = !entry.is_occupied();
        drop(entry);

        if emptied {
            self.channels
                .remove_if(channel_name, |_, channel| !channel.is_occupied());
        }
    }

    /// Remove a connection's subscription to one channel. No-op if the
    /// connection was not subscribed.
    pub fn unsubscribe(&self, socket_id: &str, channel_name: &str) {
        self.registry.untrack(socket_id, channel_name);
        self.remove_subscription(socket_id, channel_name);
    }

    fn remove_subscription(&self, socket_id: &str, channel_name: &str) {
        let Some(mut entry) = self.channels.get_mut(channel_name) else {
            return;
        };
        let events = entry.unsubscribe(socket_id);
        let targets = entry.subscriber_ids();
        let emptied = !entry.is_occupied();
        drop(entry);

        if emptied {
            // Guard against a concurrent re-subscribe between the check and
            // the removal.
            self.channels
                .remove_if(channel_name, |_, channel| !channel.is_occupied());
            debug!(app = %self.app_id, channel = %channel_name, "Pruned empty channel");
        }

        self.broadcast_presence(channel_name, &targets, events, None);
    }

    /// Publish a triggered event to a channel, excluding the originating
    /// socket if given.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty channel name or an oversized payload;
    /// per-socket delivery failures are absorbed into the [`Delivery`]
    /// counts.
    pub fn publish(
        &self,
        channel_name: &str,
        event_name: &str,
        data: Value,
        exclude: Option<&str>,
    ) -> Result<Delivery, Error> {
        if channel_name.trim().is_empty() {
            return Err(Error::EmptyChannelName);
        }
        let size = dispatch::payload_size(&data);
        if size > dispatch::MAX_EVENT_BYTES {
            return Err(Error::EventDataTooLarge(size));
        }

        let targets = self
            .channels
            .get(channel_name)
            .map(|channel| channel.subscriber_ids())
            .unwrap_or_default();

        if targets.is_empty() {
            debug!(app = %self.app_id, channel = %channel_name, "Publish to unoccupied channel");
            return Ok(Delivery::default());
        }

        let event = WireEvent::channel_event(event_name, channel_name, data);
        dispatch::fan_out(&self.registry, &targets, &event, exclude)
    }

    fn broadcast_presence(
        &self,
        channel_name: &str,
        targets: &[String],
        events: Vec<PresenceEvent>,
        exclude: Option<&str>,
    ) {
        for event in events {
            let frame = match event {
                PresenceEvent::MemberAdded { user_id, user_info } => {
                    WireEvent::member_added(channel_name, &user_id, user_info.as_ref())
                }
                PresenceEvent::MemberRemoved { user_id } => {
                    WireEvent::member_removed(channel_name, &user_id)
                }
            };
            if let Err(e) = dispatch::fan_out(&self.registry, targets, &frame, exclude) {
                warn!(app = %self.app_id, channel = %channel_name, error = %e, "Presence broadcast failed");
            }
        }
    }

    /// Whether a connection currently holds a subscription to a channel.
    #[must_use]
    pub fn is_subscribed(&self, socket_id: &str, channel_name: &str) -> bool {
        self.channels
            .get(channel_name)
            .map(|channel| channel.is_subscribed(socket_id))
            .unwrap_or(false)
    }

    /// Look up one channel without creating it.
    ///
    /// # Errors
    ///
    /// Returns `ChannelNotFound` for unknown names; read-only query paths
    /// must not materialize empty channels.
    pub fn channel_info(&self, channel_name: &str) -> Result<ChannelInfo, Error> {
        if channel_name.trim().is_empty() {
            return Err(Error::EmptyChannelName);
        }
        self.channels
            .get(channel_name)
            .map(|channel| ChannelInfo::from(&*channel))
            .ok_or_else(|| Error::ChannelNotFound(channel_name.to_string()))
    }

    /// Distinct member IDs of a presence channel.
    ///
    /// # Errors
    ///
    /// Returns `PresenceOnly` for non-presence names and `ChannelNotFound`
    /// for unknown channels.
    pub fn channel_members(&self, channel_name: &str) -> Result<Vec<String>, Error> {
        if !ChannelKind::of(channel_name).is_presence() {
            return Err(Error::PresenceOnly);
        }
        self.channels
            .get(channel_name)
            .map(|channel| channel.member_ids())
            .ok_or_else(|| Error::ChannelNotFound(channel_name.to_string()))
    }

    /// Snapshot of every registered channel. Order is unspecified.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.channels
            .iter()
            .map(|entry| ChannelInfo::from(&*entry))
            .collect()
    }

    /// Snapshot of the channels of one kind. Order is unspecified.
    #[must_use]
    pub fn channels_of_kind(&self, kind: ChannelKind) -> Vec<ChannelInfo> {
        self.channels
            .iter()
            .filter(|entry| entry.kind() == kind)
            .map(|entry| ChannelInfo::from(&*entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_protocol::events::names;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn app() -> App {
        App::new("app3", "secret", true)
    }

    fn connect(app: &App) -> (String, UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = app.connect(tx);
        (conn.socket_id().to_string(), rx)
    }

    fn member(id: &str) -> PresenceMember {
        PresenceMember {
            user_id: id.to_string(),
            user_info: None,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Bytes>) -> Vec<WireEvent> {
        let mut frames = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            frames.push(serde_json::from_slice(&bytes).unwrap());
        }
        frames
    }

    #[test]
    fn test_trigger_reaches_both_subscribers() {
        let app = app();
        let (a, mut rx_a) = connect(&app);
        let (b, mut rx_b) = connect(&app);
        app.subscribe(&a, "project-3", None).unwrap();
        app.subscribe(&b, "project-3", None).unwrap();

        let delivery = app
            .publish("project-3", "foo", json!("{\"some\":\"data\"}"), None)
            .unwrap();
        assert_eq!(delivery.delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let frames = drain(rx);
            let event = frames.last().unwrap();
            assert_eq!(event.event, "foo");
            assert_eq!(event.channel.as_deref(), Some("project-3"));
            assert_eq!(event.data, Some(json!("{\"some\":\"data\"}")));
        }
    }

    #[test]
    fn test_publish_excludes_originating_socket() {
        let app = app();
        let (a, mut rx_a) = connect(&app);
        let (b, mut rx_b) = connect(&app);
        app.subscribe(&a, "room", None).unwrap();
        app.subscribe(&b, "room", None).unwrap();

        app.publish("room", "client-typing", json!("{}"), Some(&a))
            .unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn test_oversized_payload_rejected_before_dispatch() {
        let app = app();
        let (a, mut rx_a) = connect(&app);
        app.subscribe(&a, "room", None).unwrap();

        let big = "x".repeat(dispatch::MAX_EVENT_BYTES + 1);
        let err = app.publish("room", "foo", json!(big), None).unwrap_err();
        assert!(matches!(err, Error::EventDataTooLarge(_)));
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_join_leave_symmetry() {
        let app = app();
        let (observer, mut rx_obs) = connect(&app);
        app.subscribe(&observer, "presence-room", Some(member("watcher")))
            .unwrap();

        // Three connections for one logical member
        let mut sockets = Vec::new();
        for _ in 0..3 {
            let (s, rx) = connect(&app);
            app.subscribe(&s, "presence-room", Some(member("u1"))).unwrap();
            sockets.push((s, rx));
        }

        let info = app.channel_info("presence-room").unwrap();
        assert_eq!(info.user_count, Some(2));
        assert_eq!(info.subscription_count, 4);

        for (s, _rx) in &sockets {
            app.disconnect(s);
        }

        let frames = drain(&mut rx_obs);
        let added = frames.iter().filter(|f| f.event == names::MEMBER_ADDED).count();
        let removed = frames
            .iter()
            .filter(|f| f.event == names::MEMBER_REMOVED)
            .count();
        assert_eq!(added, 1);
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_joiner_does_not_see_own_member_added() {
        let app = app();
        let (a, mut rx_a) = connect(&app);
        app.subscribe(&a, "presence-room", Some(member("u1"))).unwrap();

        let frames = drain(&mut rx_a);
        assert!(frames.iter().all(|f| f.event != names::MEMBER_ADDED));
    }

    #[test]
    fn test_cascade_cleanup_on_disconnect() {
        let app = app();
        let (a, _rx_a) = connect(&app);
        let (b, mut rx_b) = connect(&app);
        app.subscribe(&a, "room-1", None).unwrap();
        app.subscribe(&a, "room-2", None).unwrap();
        app.subscribe(&b, "room-1", None).unwrap();

        app.disconnect(&a);

        // Absent from every channel enumeration
        let info = app.channel_info("room-1").unwrap();
        assert_eq!(info.subscription_count, 1);
        assert!(app.channel_info("room-2").is_err());

        // Subsequent dispatch never attempts delivery to the gone socket
        let delivery = app.publish("room-1", "foo", json!("{}"), None).unwrap();
        assert_eq!(delivery.attempted, 1);
        assert_eq!(delivery.failed, 0);
        assert_eq!(drain(&mut rx_b).len(), 1);

        // Disconnect is idempotent
        app.disconnect(&a);
    }

    #[test]
    fn test_mid_flight_disconnect_rolls_subscription_back() {
        let app = app();
        let (observer, mut rx_obs) = connect(&app);
        app.subscribe(&observer, "presence-room", Some(member("watcher")))
            .unwrap();

        // Interleaving under test: the liveness check passes, a disconnect
        // unregisters the socket, then the channel insert lands. The
        // cascade saw no membership, so commit must detect and roll back.
        let (a, _rx_a) = connect(&app);
        app.registry.unregister(&a);
        {
            let mut entry = app.channels.get_mut("presence-room").unwrap();
            entry.subscribe(Subscription::new(&a).with_member(member("u1")));
        }

        assert!(!app.commit_subscription(&a, "presence-room"));

        // The phantom subscription and roster member are gone
        let info = app.channel_info("presence-room").unwrap();
        assert_eq!(info.subscription_count, 1);
        assert_eq!(info.user_count, Some(1));
        assert!(!app.is_subscribed(&a, "presence-room"));
        assert!(app.registry.channels_of(&a).is_empty());

        // Nobody saw the member join, so nobody may see it leave
        let frames = drain(&mut rx_obs);
        assert!(frames
            .iter()
            .all(|f| f.event != names::MEMBER_ADDED && f.event != names::MEMBER_REMOVED));
    }

    #[test]
    fn test_mid_flight_disconnect_prunes_fresh_channel() {
        let app = app();
        let (a, _rx) = connect(&app);
        app.registry.unregister(&a);
        {
            let mut entry = app
                .channels
                .entry("room".to_string())
                .or_insert_with(|| Channel::new("room"));
            entry.subscribe(Subscription::new(&a));
        }

        assert!(!app.commit_subscription(&a, "room"));
        assert_eq!(
            app.channel_info("room"),
            Err(Error::ChannelNotFound("room".to_string()))
        );
    }

    #[test]
    fn test_empty_channel_is_pruned_then_recreatable() {
        let app = app();
        let (a, _rx) = connect(&app);
        app.subscribe(&a, "room", None).unwrap();
        assert!(app.channel_info("room").is_ok());

        app.unsubscribe(&a, "room");
        assert_eq!(
            app.channel_info("room"),
            Err(Error::ChannelNotFound("room".to_string()))
        );

        // Re-subscription recreates the channel
        app.subscribe(&a, "room", None).unwrap();
        assert!(app.channel_info("room").unwrap().occupied);
    }

    #[test]
    fn test_publish_to_unknown_channel_delivers_nothing() {
        let app = app();
        let delivery = app.publish("ghost", "foo", json!("{}"), None).unwrap();
        assert_eq!(delivery, Delivery::default());
        // Read-only queries still miss it
        assert!(app.channel_info("ghost").is_err());
    }

    #[test]
    fn test_subscribe_validation() {
        let app = app();
        let (a, _rx) = connect(&app);

        assert_eq!(
            app.subscribe(&a, "  ", None).unwrap_err(),
            Error::EmptyChannelName
        );
        assert!(matches!(
            app.subscribe("404.404", "room", None).unwrap_err(),
            Error::InvalidRequest(_)
        ));
        assert!(matches!(
            app.subscribe(&a, "presence-room", None).unwrap_err(),
            Error::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_channel_kind_enumeration() {
        let app = app();
        let (a, _rx) = connect(&app);
        app.subscribe(&a, "general", None).unwrap();
        app.subscribe(&a, "private-x", None).unwrap();
        app.subscribe(&a, "presence-y", Some(member("u1"))).unwrap();

        assert_eq!(app.channels().len(), 3);
        assert_eq!(app.channels_of_kind(ChannelKind::Public).len(), 1);
        assert_eq!(app.channels_of_kind(ChannelKind::Private).len(), 1);

        let presence = app.channels_of_kind(ChannelKind::Presence);
        assert_eq!(presence.len(), 1);
        assert_eq!(presence[0].user_count, Some(1));
    }

    #[test]
    fn test_channel_members() {
        let app = app();
        let (a, _rx) = connect(&app);
        app.subscribe(&a, "presence-y", Some(member("u1"))).unwrap();

        assert_eq!(app.channel_members("presence-y").unwrap(), vec!["u1"]);
        assert_eq!(app.channel_members("general"), Err(Error::PresenceOnly));
        assert!(matches!(
            app.channel_members("presence-none"),
            Err(Error::ChannelNotFound(_))
        ));
    }
}
