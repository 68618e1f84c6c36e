//! User-facing event types.
//!
//! All cluster activity flows to the receiver returned by
//! [`Rias::new`](crate::Rias::new) as one tagged union. Handle what you
//! need and ignore the rest; the enum is `#[non_exhaustive]` so new
//! variants are not breaking.

use serde_json::Value;

use crate::types::{
    LavalinkInfo, NodeStats, PlayerUpdateState, PluginMeta, Track, TrackException,
};
use crate::protocol::TrackEndReason;

/// Events emitted by the cluster, its nodes, and its players.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RiasEvent {
    // === Node lifecycle ===
    /// A node's event stream opened.
    NodeConnect { node_id: String },
    /// A node issued (or resumed) a session.
    NodeReady {
        node_id: String,
        session_id: String,
        resumed: bool,
    },
    /// A node's event stream closed.
    NodeDisconnect {
        node_id: String,
        code: u16,
        reason: String,
    },
    /// Background node failure (transport, discovery, reconnect budget).
    NodeError { node_id: String, message: String },
    /// Fresh statistics from a node.
    NodeStats { node_id: String, stats: NodeStats },
    /// A node's info cache was refreshed.
    NodeInfoUpdate {
        node_id: String,
        info: LavalinkInfo,
    },
    /// A plugin was discovered on a node.
    PluginLoaded {
        node_id: String,
        plugin: PluginMeta,
    },
    /// Frame with an op this client does not know.
    RawFrame { node_id: String, payload: Value },

    // === Player playback ===
    TrackStart { guild_id: String, track: Track },
    TrackEnd {
        guild_id: String,
        track: Track,
        reason: TrackEndReason,
    },
    TrackStuck {
        guild_id: String,
        track: Track,
        threshold_ms: u64,
    },
    TrackException {
        guild_id: String,
        track: Track,
        exception: TrackException,
    },
    /// The node's own voice connection for this guild closed.
    WebSocketClosed {
        guild_id: String,
        code: u16,
        reason: String,
        by_remote: bool,
    },
    /// Position/connection sample for a player.
    PlayerUpdate {
        guild_id: String,
        state: PlayerUpdateState,
    },
    /// A user-initiated player operation failed.
    PlayerError { guild_id: String, message: String },
    /// The player was destroyed.
    PlayerDestroy { guild_id: String },

    // === Queue ===
    /// Tracks were appended to a player's queue.
    QueueAdd { guild_id: String, count: usize },
    /// A track was removed from a player's queue.
    QueueRemove { guild_id: String, track: Track },
    QueueClear { guild_id: String },
    QueueShuffle { guild_id: String },
    /// Playback ran out of tracks.
    QueueEnd { guild_id: String },
}
