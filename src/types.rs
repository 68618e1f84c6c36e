//! Core data types exchanged with audio nodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A playable track as resolved by a node.
///
/// The `encoded` blob is the only field a node needs to play the track;
/// `info` is display metadata decoded from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Opaque base64 blob addressing the track on the node.
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default)]
    pub plugin_info: Value,
}

impl PartialEq for Track {
    /// Tracks are value objects; deduplication compares identifiers.
    fn eq(&self, other: &Self) -> bool {
        self.info.identifier == other.info.identifier
    }
}

impl Eq for Track {}

/// Track metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Track length in milliseconds.
    pub length: u64,
    pub is_stream: bool,
    /// Starting position in milliseconds.
    pub position: u64,
    pub title: String,
    pub source_name: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
}

/// Result of a `loadtracks` request, discriminated by `loadType`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    /// A single track was resolved.
    Track(Track),
    /// A playlist was resolved.
    Playlist(Playlist),
    /// A search produced zero or more tracks.
    Search(Vec<Track>),
    /// Nothing matched.
    Empty(Option<Value>),
    /// The node failed to load the identifier.
    Error(LoadError),
}

impl LoadResult {
    /// Flatten into the loaded tracks, empty on `Empty` and `Error`.
    pub fn tracks(self) -> Vec<Track> {
        match self {
            LoadResult::Track(track) => vec![track],
            LoadResult::Playlist(playlist) => playlist.tracks,
            LoadResult::Search(tracks) => tracks,
            LoadResult::Empty(_) | LoadResult::Error(_) => Vec::new(),
        }
    }
}

/// A resolved playlist.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub info: PlaylistInfo,
    #[serde(default)]
    pub plugin_info: Value,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// Index of the selected track, -1 or absent when none.
    #[serde(default)]
    pub selected_track: Option<i64>,
}

/// Failure payload of a `loadtracks` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadError {
    #[serde(default)]
    pub message: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub cause: String,
}

/// How worried the node is about an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    /// Known, user-visible cause (e.g. video unavailable).
    Common,
    /// Cause is known but unexpected.
    Suspicious,
    /// Node-side fault.
    Fault,
}

/// Exception attached to track events and load failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    #[serde(default)]
    pub message: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub cause: String,
}

/// Periodic node statistics pushed over the event stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    /// Players the node hosts.
    pub players: u32,
    /// Players currently playing.
    pub playing_players: u32,
    /// Node uptime in milliseconds.
    pub uptime: u64,
    pub memory: MemoryStats,
    pub cpu: CpuStats,
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

/// Node build and capability report from `GET /v4/info`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LavalinkInfo {
    pub version: VersionInfo,
    #[serde(default)]
    pub build_time: u64,
    #[serde(default)]
    pub git: Option<GitInfo>,
    #[serde(default)]
    pub jvm: String,
    #[serde(default)]
    pub lavaplayer: String,
    #[serde(default)]
    pub source_managers: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<PluginMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub semver: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    #[serde(default)]
    pub pre_release: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitInfo {
    pub branch: String,
    pub commit: String,
    pub commit_time: u64,
}

/// A plugin installed on a node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMeta {
    pub name: String,
    pub version: String,
}

/// Live player state pushed in `playerUpdate` frames.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateState {
    /// Unix timestamp of the sample, milliseconds.
    pub time: u64,
    /// Playback position, milliseconds.
    #[serde(default)]
    pub position: u64,
    /// Whether the node holds a live voice connection for the guild.
    pub connected: bool,
    /// Voice gateway ping, -1 when not connected.
    pub ping: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::track;

    #[test]
    fn track_equality_uses_identifier() {
        let a = track("abc", "artist one");
        let mut b = track("abc", "artist two");
        b.encoded = "different".to_string();
        assert_eq!(a, b);
        assert_ne!(a, track("xyz", "artist one"));
    }

    #[test]
    fn load_result_track() {
        let json = r#"{
            "loadType": "track",
            "data": {
                "encoded": "QAAA",
                "info": {
                    "identifier": "dQw4w9WgXcQ",
                    "isSeekable": true,
                    "author": "Rick Astley",
                    "length": 212000,
                    "isStream": false,
                    "position": 0,
                    "title": "Never Gonna Give You Up",
                    "uri": "https://youtu.be/dQw4w9WgXcQ",
                    "sourceName": "youtube"
                }
            }
        }"#;
        let result: LoadResult = serde_json::from_str(json).unwrap();
        match result {
            LoadResult::Track(t) => assert_eq!(t.info.author, "Rick Astley"),
            other => panic!("expected track result, got {other:?}"),
        }
    }

    #[test]
    fn load_result_empty_and_error() {
        let empty: LoadResult = serde_json::from_str(r#"{"loadType":"empty","data":null}"#).unwrap();
        assert!(empty.tracks().is_empty());

        let error: LoadResult = serde_json::from_str(
            r#"{"loadType":"error","data":{"message":"bad id","severity":"common","cause":"x"}}"#,
        )
        .unwrap();
        match error {
            LoadResult::Error(e) => assert_eq!(e.severity, Severity::Common),
            other => panic!("expected error result, got {other:?}"),
        }
    }

    #[test]
    fn stats_roundtrip() {
        let json = r#"{
            "players": 3, "playingPlayers": 2, "uptime": 123456,
            "memory": {"free": 1, "used": 2, "allocated": 3, "reservable": 4},
            "cpu": {"cores": 8, "systemLoad": 0.5, "lavalinkLoad": 0.1}
        }"#;
        let stats: NodeStats = serde_json::from_str(json).unwrap();
        assert_eq!(stats.playing_players, 2);
        assert!(stats.frame_stats.is_none());
        assert_eq!(stats.cpu.cores, 8);
    }
}
