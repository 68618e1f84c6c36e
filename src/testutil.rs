//! Shared test fixtures.

use serde_json::Value;

use crate::types::{CpuStats, MemoryStats, NodeStats, Track, TrackInfo};

/// Build a track with the given identifier and author.
pub(crate) fn track(identifier: &str, author: &str) -> Track {
    Track {
        encoded: format!("enc:{identifier}"),
        info: TrackInfo {
            identifier: identifier.to_string(),
            is_seekable: true,
            author: author.to_string(),
            length: 180_000,
            is_stream: false,
            position: 0,
            title: format!("title {identifier}"),
            source_name: "youtube".to_string(),
            uri: None,
            artwork_url: None,
            isrc: None,
        },
        plugin_info: Value::Null,
    }
}

/// Build stats with the given player count and lavalink load.
pub(crate) fn stats(players: u32, lavalink_load: f64) -> NodeStats {
    NodeStats {
        players,
        playing_players: players,
        uptime: 1_000,
        memory: MemoryStats {
            free: 256,
            used: 512,
            allocated: 1024,
            reservable: 2048,
        },
        cpu: CpuStats {
            cores: 4,
            system_load: 0.25,
            lavalink_load,
        },
        frame_stats: None,
    }
}
