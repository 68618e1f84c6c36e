//! # Rias
//!
//! Client library for Lavalink v4 audio nodes: one [`Rias`] cluster
//! multiplexes per-guild [`Player`]s across a set of [`Node`]s, keeps each
//! node session alive (resume keys, exponential backoff), and reconciles
//! client state with node-pushed events.
//!
//! The chat platform stays outside the library: raw voice packets come in
//! through [`Rias::handle_raw`], and outbound voice-join payloads leave
//! through the `send` callback given to [`Rias::new`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use rias::{NodeConfig, PlayOptions, Rias, RiasConfig, RiasEvent};
//!
//! #[tokio::main]
//! async fn main() -> rias::Result<()> {
//!     let config = RiasConfig::new(vec![
//!         NodeConfig::new("main", "localhost", 2333, "youshallnotpass"),
//!     ]);
//!     let (rias, mut events) = Rias::new(config, |guild_id, payload| {
//!         // hand the opcode-4 payload to your gateway shard
//!     })?;
//!     rias.connect("1234567890123456789");
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             RiasEvent::NodeReady { node_id, .. } => {
//!                 let player = rias.create("123456789012345678", None)?;
//!                 player.play(PlayOptions::new("encoded-track-blob")).await?;
//!             }
//!             RiasEvent::TrackStart { guild_id, track } => {
//!                 println!("{guild_id}: now playing {}", track.info.title);
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod filters;
pub mod node;
pub mod player;
pub mod protocol;
pub mod queue;
pub mod routing;
pub mod types;
pub mod validate;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export the main public API.
pub use cluster::{ClusterStats, Rias};
pub use config::{NodeConfig, RiasConfig};
pub use error::Error;
pub use events::RiasEvent;
pub use filters::{BassBoost, FilterBuilder, Filters};
pub use node::{ConnectionState, Node, PluginRequestOptions};
pub use player::{ConnectOptions, PlayOptions, PlayTarget, Player};
pub use protocol::{TrackEndReason, UpdatePlayer, VoiceServerUpdate, VoiceStateUpdate};
pub use queue::{LoopMode, Queue, QueueSummary};
pub use routing::SelectionStrategy;
pub use types::{LavalinkInfo, LoadResult, NodeStats, PluginMeta, Track, TrackInfo};

/// Result type for rias operations.
pub type Result<T> = std::result::Result<T, Error>;
