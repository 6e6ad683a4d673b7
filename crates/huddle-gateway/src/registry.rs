use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

/// Identifies the bucket a connection lives in: one specific channel, or the
/// distinguished global bucket used for cross-channel notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Global,
    Channel(i64),
}

impl ChannelKey {
    /// Parse the `channelId` query parameter. Absent, non-numeric, or
    /// non-positive values all mean a global-only connection.
    pub fn from_param(raw: Option<&str>) -> ChannelKey {
        match raw {
            Some(s) => match s.trim().parse::<i64>() {
                Ok(n) if n > 0 => ChannelKey::Channel(n),
                _ => ChannelKey::Global,
            },
            None => ChannelKey::Global,
        }
    }

    pub fn channel_id(&self) -> Option<i64> {
        match self {
            ChannelKey::Channel(id) => Some(*id),
            ChannelKey::Global => None,
        }
    }
}

pub type ConnId = Uuid;

/// Outbound half of a connection: pre-serialized envelopes are pushed here
/// and forwarded to the socket by the connection's send task.
pub type OutboundSender = mpsc::UnboundedSender<Utf8Bytes>;

struct ConnectionMeta {
    user_id: Uuid,
    channel_key: ChannelKey,
    sender: OutboundSender,
}

#[derive(Default)]
struct RegistryState {
    buckets: HashMap<ChannelKey, HashSet<ConnId>>,
    connections: HashMap<ConnId, ConnectionMeta>,
}

/// Tracks which live connections belong to which channel bucket.
///
/// The per-connection metadata entry is the single source of truth for
/// cleanup: `leave` uses the stored channel key instead of scanning buckets,
/// and calling it twice (close and error can both fire) is a no-op.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    /// Register a connection into its bucket. Returns the connection id used
    /// for all later registry calls.
    pub async fn join(
        &self,
        user_id: Uuid,
        channel_key: ChannelKey,
        sender: OutboundSender,
    ) -> ConnId {
        let conn_id = Uuid::new_v4();
        let mut state = self.inner.write().await;
        state.buckets.entry(channel_key).or_default().insert(conn_id);
        state.connections.insert(
            conn_id,
            ConnectionMeta {
                user_id,
                channel_key,
                sender,
            },
        );
        debug!("connection {} joined {:?}", conn_id, channel_key);
        conn_id
    }

    /// Remove a connection. Idempotent; empty buckets are pruned immediately
    /// so the map never accumulates dead entries under connection churn.
    pub async fn leave(&self, conn_id: ConnId) {
        let mut state = self.inner.write().await;
        let Some(meta) = state.connections.remove(&conn_id) else {
            return;
        };
        if let Some(bucket) = state.buckets.get_mut(&meta.channel_key) {
            bucket.remove(&conn_id);
            if bucket.is_empty() {
                state.buckets.remove(&meta.channel_key);
            }
        }
        debug!(
            "connection {} (user {}) left {:?}",
            conn_id, meta.user_id, meta.channel_key
        );
    }

    /// Senders for every connection in one bucket.
    pub async fn bucket_senders(&self, key: ChannelKey) -> Vec<OutboundSender> {
        let state = self.inner.read().await;
        collect_senders(&state, key)
    }

    /// Senders for a channel broadcast: the channel's own bucket plus the
    /// global bucket, snapshotted under a single lock acquisition.
    pub async fn fanout_targets(&self, key: ChannelKey) -> Vec<OutboundSender> {
        let state = self.inner.read().await;
        let mut senders = collect_senders(&state, key);
        if key != ChannelKey::Global {
            senders.extend(collect_senders(&state, ChannelKey::Global));
        }
        senders
    }

    pub async fn bucket_len(&self, key: ChannelKey) -> usize {
        let state = self.inner.read().await;
        state.buckets.get(&key).map_or(0, |b| b.len())
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Drop every registered connection. Dropping the senders ends each
    /// connection's send task, which closes the socket.
    pub async fn shutdown(&self) {
        let mut state = self.inner.write().await;
        state.buckets.clear();
        state.connections.clear();
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_senders(state: &RegistryState, key: ChannelKey) -> Vec<OutboundSender> {
    state
        .buckets
        .get(&key)
        .map(|bucket| {
            bucket
                .iter()
                .filter_map(|id| state.connections.get(id))
                .map(|meta| meta.sender.clone())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (OutboundSender, mpsc::UnboundedReceiver<Utf8Bytes>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn channel_key_parses_handshake_param() {
        assert_eq!(ChannelKey::from_param(None), ChannelKey::Global);
        assert_eq!(ChannelKey::from_param(Some("")), ChannelKey::Global);
        assert_eq!(ChannelKey::from_param(Some("abc")), ChannelKey::Global);
        assert_eq!(ChannelKey::from_param(Some("0")), ChannelKey::Global);
        assert_eq!(ChannelKey::from_param(Some("-3")), ChannelKey::Global);
        assert_eq!(ChannelKey::from_param(Some("7")), ChannelKey::Channel(7));
        assert_eq!(ChannelKey::from_param(Some(" 12 ")), ChannelKey::Channel(12));
    }

    #[tokio::test]
    async fn join_places_connection_in_exactly_one_bucket() {
        let registry = ChannelRegistry::new();
        let (tx, _rx) = sender();
        registry.join(Uuid::new_v4(), ChannelKey::Channel(7), tx).await;

        assert_eq!(registry.bucket_len(ChannelKey::Channel(7)).await, 1);
        assert_eq!(registry.bucket_len(ChannelKey::Global).await, 0);
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_prunes_empty_buckets() {
        let registry = ChannelRegistry::new();
        let (tx, _rx) = sender();
        let conn = registry.join(Uuid::new_v4(), ChannelKey::Channel(7), tx).await;

        // Close and error both fire for the same connection.
        registry.leave(conn).await;
        registry.leave(conn).await;

        assert_eq!(registry.connection_count().await, 0);
        assert_eq!(registry.bucket_len(ChannelKey::Channel(7)).await, 0);
        // The bucket entry itself is gone, not just empty.
        assert!(registry.fanout_targets(ChannelKey::Channel(7)).await.is_empty());
    }

    #[tokio::test]
    async fn leave_removes_only_the_target_connection() {
        let registry = ChannelRegistry::new();
        let (tx_a, _rx_a) = sender();
        let (tx_b, _rx_b) = sender();
        let a = registry.join(Uuid::new_v4(), ChannelKey::Channel(7), tx_a).await;
        let _b = registry.join(Uuid::new_v4(), ChannelKey::Channel(7), tx_b).await;

        registry.leave(a).await;

        assert_eq!(registry.bucket_len(ChannelKey::Channel(7)).await, 1);
    }

    #[tokio::test]
    async fn fanout_targets_cover_channel_and_global_buckets() {
        let registry = ChannelRegistry::new();
        let (tx_chan, _rx1) = sender();
        let (tx_global, _rx2) = sender();
        registry.join(Uuid::new_v4(), ChannelKey::Channel(7), tx_chan).await;
        registry.join(Uuid::new_v4(), ChannelKey::Global, tx_global).await;

        assert_eq!(registry.fanout_targets(ChannelKey::Channel(7)).await.len(), 2);
        // A different channel reaches only the global listener.
        assert_eq!(registry.fanout_targets(ChannelKey::Channel(8)).await.len(), 1);
        // A global broadcast does not double-count the global bucket.
        assert_eq!(registry.fanout_targets(ChannelKey::Global).await.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_drops_every_connection() {
        let registry = ChannelRegistry::new();
        let (tx_a, mut rx_a) = sender();
        let (tx_b, _rx_b) = sender();
        registry.join(Uuid::new_v4(), ChannelKey::Channel(7), tx_a).await;
        registry.join(Uuid::new_v4(), ChannelKey::Global, tx_b).await;

        registry.shutdown().await;

        assert_eq!(registry.connection_count().await, 0);
        // The registry dropped its sender, so the receiving side sees EOF.
        assert!(rx_a.recv().await.is_none());
    }
}
