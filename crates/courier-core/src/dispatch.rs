//! Event fan-out.
//!
//! The dispatcher serializes a frame once and writes it to every target
//! socket except an optionally excluded originator. Targets are a snapshot
//! taken under the channel lock; by the time frames are written the lock is
//! long gone, so a concurrent unsubscribe at worst surfaces as a failed
//! write. Per-socket failures are logged and isolated: one dead socket
//! never affects delivery to its siblings.

use tracing::{trace, warn};

use crate::connection::ConnectionRegistry;
use crate::error::Error;
use courier_protocol::{codec, WireEvent};

/// Maximum triggered event payload: 10 kB, decimal kilobytes.
pub const MAX_EVENT_BYTES: usize = 10 * 1000;

/// Size of a triggered payload as it counts against [`MAX_EVENT_BYTES`].
///
/// String payloads (the common case, pre-encoded JSON) count their raw
/// bytes; structured payloads count their serialized length.
#[must_use]
pub fn payload_size(data: &serde_json::Value) -> usize {
    match data {
        serde_json::Value::String(s) => s.len(),
        other => serde_json::to_string(other).map_or(0, |s| s.len()),
    }
}

/// Outcome of one fan-out pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Sockets the dispatcher attempted to reach (after exclusion).
    pub attempted: usize,
    /// Frames successfully handed to a live outbound queue.
    pub delivered: usize,
    /// Sockets that were gone or refused the write.
    pub failed: usize,
}

/// Fan an event out to the given sockets, skipping `exclude`.
///
/// Delivery is best-effort at-most-once: failures are counted and logged,
/// never propagated.
///
/// # Errors
///
/// Returns an error only if the frame itself cannot be serialized.
pub fn fan_out(
    registry: &ConnectionRegistry,
    targets: &[String],
    event: &WireEvent,
    exclude: Option<&str>,
) -> Result<Delivery, Error> {
    let frame = codec::encode(event).map_err(|e| Error::InvalidRequest(e.to_string()))?;

    let mut delivery = Delivery::default();
    for socket_id in targets {
        if exclude == Some(socket_id.as_str()) {
            continue;
        }
        delivery.attempted += 1;

        let sent = registry
            .lookup(socket_id)
            .is_some_and(|connection| connection.send(frame.clone()));

        if sent {
            delivery.delivered += 1;
        } else {
            delivery.failed += 1;
            warn!(socket = %socket_id, event = %event.event, "Dropped frame for unreachable socket");
        }
    }

    trace!(
        event = %event.event,
        delivered = delivery.delivered,
        failed = delivery.failed,
        "Fan-out complete"
    );

    Ok(delivery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn connect(registry: &ConnectionRegistry) -> (String, UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = registry.register(tx);
        (conn.socket_id().to_string(), rx)
    }

    fn event() -> WireEvent {
        WireEvent::channel_event("foo", "project-3", json!("{\"some\":\"data\"}"))
    }

    #[test]
    fn test_fan_out_reaches_all_targets() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = connect(&registry);
        let (b, mut rx_b) = connect(&registry);

        let delivery = fan_out(&registry, &[a, b], &event(), None).unwrap();
        assert_eq!(delivery.delivered, 2);
        assert_eq!(delivery.failed, 0);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_fan_out_excludes_originator() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = connect(&registry);
        let (b, mut rx_b) = connect(&registry);

        let delivery = fan_out(&registry, &[a.clone(), b], &event(), Some(&a)).unwrap();
        assert_eq!(delivery.attempted, 1);
        assert_eq!(delivery.delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_dead_socket_does_not_affect_siblings() {
        let registry = ConnectionRegistry::new();
        let (a, rx_a) = connect(&registry);
        let (b, mut rx_b) = connect(&registry);
        drop(rx_a);

        let delivery = fan_out(&registry, &[a, b], &event(), None).unwrap();
        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.failed, 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_unknown_socket_counts_as_failure() {
        let registry = ConnectionRegistry::new();
        let delivery =
            fan_out(&registry, &["404.404".to_string()], &event(), None).unwrap();
        assert_eq!(delivery.failed, 1);
        assert_eq!(delivery.delivered, 0);
    }

    #[test]
    fn test_payload_size() {
        assert_eq!(payload_size(&json!("abcd")), 4);
        assert_eq!(payload_size(&json!({"k":"v"})), r#"{"k":"v"}"#.len());
    }
}
