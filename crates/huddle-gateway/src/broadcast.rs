use axum::extract::ws::Utf8Bytes;
use tracing::warn;

use huddle_types::events::RealtimeEvent;

use crate::registry::{ChannelKey, ChannelRegistry};

/// Pushes event envelopes to every live listener of a channel.
///
/// The envelope is serialized exactly once per broadcast; every recipient
/// gets the same bytes. Channel events additionally reach the global bucket
/// so cross-channel listeners (unread badges) see them without holding one
/// connection per channel.
#[derive(Clone)]
pub struct Broadcaster {
    registry: ChannelRegistry,
}

impl Broadcaster {
    pub fn new(registry: ChannelRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Deliver an event to a channel's bucket and the global bucket.
    pub async fn broadcast_to_channel(&self, channel_id: i64, event: &RealtimeEvent) {
        self.broadcast(ChannelKey::Channel(channel_id), event).await;
    }

    /// Deliver an event to the global bucket only.
    pub async fn broadcast_global(&self, event: &RealtimeEvent) {
        self.broadcast(ChannelKey::Global, event).await;
    }

    async fn broadcast(&self, key: ChannelKey, event: &RealtimeEvent) {
        // Realtime delivery is best-effort: a serialization failure is logged
        // and the triggering request proceeds untouched.
        let payload: Utf8Bytes = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!("failed to serialize realtime event: {}", e);
                return;
            }
        };

        for sender in self.registry.fanout_targets(key).await {
            // A closed receiver means the connection is on its way out; the
            // registry's close/error hook does the cleanup, not the broadcast.
            let _ = sender.send(payload.clone());
        }
    }
}
