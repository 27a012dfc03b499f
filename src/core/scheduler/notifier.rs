//! Per-user status fan-out.
//!
//! Every connection of a user subscribes to the same broadcast channel.
//! Publishing to a user with no live connection is a no-op; delivery is
//! best-effort and clients recover through re-requests.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use super::status::StatusUpdate;

pub struct CompletionNotifier {
    channels: DashMap<String, broadcast::Sender<StatusUpdate>>,
    capacity: usize,
}

impl CompletionNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<StatusUpdate> {
        if let Some(sender) = self.channels.get(user_id) {
            return sender.subscribe();
        }
        self.channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver an update to all of the user's connections.
    ///
    /// Returns the number of receivers reached.
    pub fn publish(&self, user_id: &str, update: StatusUpdate) -> usize {
        let Some(sender) = self.channels.get(user_id) else {
            trace!(user_id, block_idx = update.block_idx, "No subscriber for status update");
            return 0;
        };
        sender.send(update).unwrap_or(0)
    }

    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.channels
            .get(user_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drop channels that no longer have receivers. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before.saturating_sub(self.channels.len())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
