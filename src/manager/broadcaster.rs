use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

use crate::radio::model::{DeviceListSnapshot, FoundDevice};

/// Identity of one open discovery stream.
pub(crate) type SubscriberId = u64;

/// Fans the current discovered-device snapshot out to every live subscriber.
///
/// Each subscriber owns an independent `watch` channel, which gives the
/// drop-to-latest policy: a slow consumer observes only the newest snapshot
/// and can never block publication. New subscribers see the current snapshot
/// as their stream's first element.
pub(crate) struct DiscoveryBroadcaster {
    snapshot: DeviceListSnapshot,
    subscribers: HashMap<SubscriberId, watch::Sender<DeviceListSnapshot>>,
    next_subscriber_id: SubscriberId,
}

impl DiscoveryBroadcaster {
    pub(crate) fn new() -> Self {
        Self {
            snapshot: Arc::new(Vec::new()),
            subscribers: HashMap::new(),
            next_subscriber_id: 0,
        }
    }

    /// Registers a subscriber seeded with the current snapshot.
    pub(crate) fn open(&mut self) -> (SubscriberId, watch::Receiver<DeviceListSnapshot>) {
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;

        let (tx, rx) = watch::channel(Arc::clone(&self.snapshot));
        self.subscribers.insert(id, tx);
        trace!(subscriber = id, total = self.subscribers.len(), "discovery stream opened");
        (id, rx)
    }

    /// Removes a subscriber. Second and later calls for the same id are
    /// no-ops, so concurrent cancellation paths cannot double-count.
    pub(crate) fn close(&mut self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            trace!(subscriber = id, total = self.subscribers.len(), "discovery stream closed");
        }
        removed
    }

    /// Replaces the stored snapshot and publishes it to every subscriber.
    pub(crate) fn publish(&mut self, devices: Vec<FoundDevice>) {
        let snapshot: DeviceListSnapshot = Arc::new(devices);
        self.snapshot = Arc::clone(&snapshot);
        for tx in self.subscribers.values() {
            // A dead receiver is cleaned up by its drop guard; ignore here.
            let _ = tx.send(Arc::clone(&snapshot));
        }
    }

    pub(crate) fn snapshot(&self) -> DeviceListSnapshot {
        Arc::clone(&self.snapshot)
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
