//! Fan-out of notifications to every registered subscriber.

use bytes::Bytes;
use murmur_protocol::{codec, NotificationPayload};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::registry::SubscriberRegistry;

/// Outcome of one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers in the snapshot.
    pub recipients: usize,
    /// Payloads enqueued.
    pub delivered: usize,
    /// Subscribers whose channel was already closed.
    pub anomalies: usize,
}

/// Delivers payloads to the current members of a [`SubscriberRegistry`].
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over a shared registry.
    #[must_use]
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }

    /// Enqueue a serialized payload on every registered channel.
    ///
    /// Never blocks and never fails: a channel whose receiver has already
    /// been dropped is counted as an anomaly and removed from the registry.
    /// Channels deregistered after the snapshot may still receive the
    /// payload; it is never read.
    pub fn publish(&self, payload: Bytes) -> PublishReport {
        let snapshot = self.registry.snapshot();
        let mut report = PublishReport {
            recipients: snapshot.len(),
            ..PublishReport::default()
        };

        for handle in &snapshot {
            match handle.deliver(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(error = %e, "Delivery skipped");
                    report.anomalies += 1;
                    self.registry.deregister(handle.id());
                }
            }
        }

        trace!(
            recipients = report.recipients,
            delivered = report.delivered,
            anomalies = report.anomalies,
            "Published"
        );
        report
    }

    /// Serialize a notification once and publish it.
    pub fn publish_payload(&self, payload: &NotificationPayload) -> PublishReport {
        match codec::encode_payload(payload) {
            Ok(json) => self.publish(json),
            Err(e) => {
                warn!(error = %e, "Failed to encode notification");
                PublishReport::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_all() {
        let registry = Arc::new(SubscriberRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let mut a = registry.register();
        let mut b = registry.register();

        let report = broadcaster.publish(Bytes::from_static(b"hello"));
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.anomalies, 0);

        assert_eq!(a.try_recv(), Some(Bytes::from_static(b"hello")));
        assert_eq!(b.try_recv(), Some(Bytes::from_static(b"hello")));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let broadcaster = Broadcaster::new(Arc::new(SubscriberRegistry::new()));
        assert_eq!(
            broadcaster.publish(Bytes::from_static(b"x")),
            PublishReport::default()
        );
    }

    #[test]
    fn test_no_delivery_after_deregister() {
        let registry = Arc::new(SubscriberRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let mut gone = registry.register();
        let mut stays = registry.register();
        registry.deregister(gone.id());

        let report = broadcaster.publish(Bytes::from_static(b"after"));
        assert_eq!(report.recipients, 1);
        assert_eq!(gone.try_recv(), None);
        assert_eq!(stays.try_recv(), Some(Bytes::from_static(b"after")));
    }

    #[test]
    fn test_closed_receiver_is_an_anomaly() {
        let registry = Arc::new(SubscriberRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let dropped = registry.register();
        let mut live = registry.register();
        drop(dropped);

        let report = broadcaster.publish(Bytes::from_static(b"x"));
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.anomalies, 1);
        assert!(live.try_recv().is_some());

        assert_eq!(registry.len(), 1);
        let report = broadcaster.publish(Bytes::from_static(b"y"));
        assert_eq!(report.recipients, 1);
        assert_eq!(report.anomalies, 0);
    }

    #[test]
    fn test_fifo_per_subscriber() {
        let registry = Arc::new(SubscriberRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let mut sub = registry.register();

        broadcaster.publish(Bytes::from_static(b"A"));
        broadcaster.publish(Bytes::from_static(b"B"));

        assert_eq!(sub.try_recv(), Some(Bytes::from_static(b"A")));
        assert_eq!(sub.try_recv(), Some(Bytes::from_static(b"B")));
    }

    #[test]
    fn test_publish_payload_serializes_once() {
        let registry = Arc::new(SubscriberRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let mut sub = registry.register();

        let payload = NotificationPayload::new("User1", "hi", "2024-05-01 12:00:00");
        broadcaster.publish_payload(&payload);

        let json = sub.try_recv().unwrap();
        let decoded: NotificationPayload = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded, payload);
    }
}
