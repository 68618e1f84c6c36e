//! The cluster client: node and player registries, routing, demux.
//!
//! [`Rias`] is the single anchor of the library. It owns both registries,
//! mediates node-to-player event delivery by guild lookup, translates
//! player voice intents into gateway payloads for the user-supplied send
//! callback, and fans cluster-wide plugin queries out across nodes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RiasConfig;
use crate::events::RiasEvent;
use crate::node::{Node, NodeEvent, PluginRequestOptions};
use crate::player::{Player, SendFn};
use crate::protocol::{self, RawVoicePacket, VoiceServerUpdate, VoiceStateUpdate};
use crate::routing::{self, NodeSnapshot, SelectionStrategy};
use crate::types::{LavalinkInfo, LoadResult, PluginMeta};
use crate::validate;
use crate::{Error, Result};

/// Default budget for [`Rias::shutdown`].
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Aggregate view over every node's last reported statistics.
#[derive(Debug, Clone, Default)]
pub struct ClusterStats {
    pub nodes: usize,
    pub ready_nodes: usize,
    pub players: u32,
    pub playing_players: u32,
}

struct RiasInner {
    config: RiasConfig,
    nodes: RwLock<Vec<Node>>,
    players: RwLock<HashMap<String, Player>>,
    node_events: mpsc::UnboundedSender<NodeEvent>,
    events: mpsc::UnboundedSender<RiasEvent>,
    send: SendFn,
    http: reqwest::Client,
    client_id: Mutex<Option<String>>,
    shutdown: AtomicBool,
}

/// The cluster client. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Rias {
    inner: Arc<RiasInner>,
}

impl std::fmt::Debug for Rias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rias")
            .field("nodes", &self.inner.nodes.read().unwrap().len())
            .field("players", &self.inner.players.read().unwrap().len())
            .finish()
    }
}

impl Rias {
    /// Build the cluster and return it with the event receiver.
    ///
    /// `send` delivers outbound voice-join payloads (gateway opcode 4) to
    /// the chat platform. Nothing connects until [`connect`](Self::connect)
    /// is called with the bot's user id.
    pub fn new(
        config: RiasConfig,
        send: impl Fn(&str, Value) + Send + Sync + 'static,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RiasEvent>)> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        let (node_events_tx, node_events_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let nodes = config
            .nodes
            .iter()
            .map(|node_config| {
                Node::new(
                    node_config.clone(),
                    config.user_agent.clone(),
                    http.clone(),
                    node_events_tx.clone(),
                    config.debug,
                )
            })
            .collect();

        let inner = Arc::new(RiasInner {
            config,
            nodes: RwLock::new(nodes),
            players: RwLock::new(HashMap::new()),
            node_events: node_events_tx,
            events: events_tx,
            send: Arc::new(send),
            http,
            client_id: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn(route_node_events(Arc::downgrade(&inner), node_events_rx));

        Ok((Self { inner }, events_rx))
    }

    /// Open the event stream of every configured node.
    ///
    /// `client_id` is the bot's own user id; it authenticates the streams
    /// and filters inbound voice-state packets.
    pub fn connect(&self, client_id: impl Into<String>) {
        let client_id = client_id.into();
        *self.inner.client_id.lock().unwrap() = Some(client_id.clone());
        info!(nodes = self.inner.nodes.read().unwrap().len(), "connecting cluster");
        for node in self.nodes() {
            node.connect(client_id.clone());
        }
    }

    /// All node handles, in configuration order.
    pub fn nodes(&self) -> Vec<Node> {
        self.inner.nodes.read().unwrap().clone()
    }

    pub fn node(&self, node_id: &str) -> Option<Node> {
        self.inner
            .nodes
            .read()
            .unwrap()
            .iter()
            .find(|node| node.id() == node_id)
            .cloned()
    }

    /// Register and connect an additional node at runtime.
    pub fn add_node(&self, config: crate::config::NodeConfig) -> Node {
        let node = Node::new(
            config,
            self.inner.config.user_agent.clone(),
            self.inner.http.clone(),
            self.inner.node_events.clone(),
            self.inner.config.debug,
        );
        self.inner.nodes.write().unwrap().push(node.clone());
        if let Some(client_id) = self.inner.client_id.lock().unwrap().clone() {
            node.connect(client_id);
        }
        node
    }

    /// Disconnect and forget a node. Players pinned to it keep failing
    /// until destroyed; they are never re-pinned.
    pub fn remove_node(&self, node_id: &str) -> Result<()> {
        let node = {
            let mut nodes = self.inner.nodes.write().unwrap();
            let index = nodes
                .iter()
                .position(|node| node.id() == node_id)
                .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
            nodes.remove(index)
        };
        node.disconnect();
        Ok(())
    }

    /// The node the current strategy would pick for a new player.
    pub fn best_node(&self, region: Option<&str>) -> Result<Node> {
        let snapshots = self.snapshots();
        let id = routing::select(
            &snapshots,
            self.inner.config.node_selection_strategy,
            region,
        )?;
        self.node(&id).ok_or(Error::NoAvailableNodes)
    }

    // ========================================================================
    // Players
    // ========================================================================

    /// Get or create the player for a guild, selecting a node by the
    /// configured strategy (`region` biases the `Regional` strategy).
    pub fn create(&self, guild_id: &str, region: Option<&str>) -> Result<Player> {
        validate::validate_guild_id(guild_id)?;
        if let Some(player) = self.get(guild_id) {
            return Ok(player);
        }

        let node = self.best_node(region)?;
        debug!(guild = %guild_id, node = %node.id(), "creating player");

        let inner = Arc::downgrade(&self.inner);
        let guild = guild_id.to_string();
        let on_destroy = Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.players.write().unwrap().remove(&guild);
            }
        });

        let player = Player::new(
            guild_id.to_string(),
            node,
            self.inner.events.clone(),
            Arc::clone(&self.inner.send),
            on_destroy,
        );
        self.inner
            .players
            .write()
            .unwrap()
            .insert(guild_id.to_string(), player.clone());
        Ok(player)
    }

    pub fn get(&self, guild_id: &str) -> Option<Player> {
        self.inner.players.read().unwrap().get(guild_id).cloned()
    }

    /// Destroy the guild's player and drop it from the registry.
    pub async fn destroy(&self, guild_id: &str) -> Result<()> {
        let player = self
            .get(guild_id)
            .ok_or_else(|| Error::PlayerNotFound(guild_id.to_string()))?;
        player.destroy().await;
        Ok(())
    }

    pub async fn destroy_all(&self) {
        let players: Vec<Player> = self.inner.players.read().unwrap().values().cloned().collect();
        for player in players {
            player.destroy().await;
        }
    }

    pub fn player_count(&self) -> usize {
        self.inner.players.read().unwrap().len()
    }

    /// Resolve a search query or URL on the best available node.
    ///
    /// Bare queries are trimmed, capped, and prefixed with the configured
    /// search source (`ytsearch` by default).
    pub async fn search(&self, query: &str) -> Result<LoadResult> {
        let node = self.best_node(None)?;
        let identifier = validate::normalize_search_query(
            query,
            self.inner.config.default_search_source.as_deref(),
        );
        node.load_tracks(&identifier).await
    }

    // ========================================================================
    // Gateway demux
    // ========================================================================

    /// Feed one raw gateway packet (`{t, d}` record).
    ///
    /// Anything other than `VOICE_SERVER_UPDATE` / `VOICE_STATE_UPDATE`, or
    /// packets for guilds without a player, is ignored.
    pub async fn handle_raw(&self, packet: &Value) -> Result<()> {
        match protocol::parse_raw_packet(packet)? {
            Some(RawVoicePacket::Server(update)) => self.handle_voice_server_update(update).await,
            Some(RawVoicePacket::State(update)) => self.handle_voice_state_update(update).await,
            None => Ok(()),
        }
    }

    pub async fn handle_voice_server_update(&self, update: VoiceServerUpdate) -> Result<()> {
        let Some(player) = self.get(&update.guild_id) else {
            return Ok(());
        };
        player.handle_voice_server(update).await
    }

    /// Apply a voice-state packet; packets for other users are dropped.
    pub async fn handle_voice_state_update(&self, update: VoiceStateUpdate) -> Result<()> {
        {
            let client_id = self.inner.client_id.lock().unwrap();
            if client_id.as_deref() != Some(update.user_id.as_str()) {
                return Ok(());
            }
        }
        let Some(player) = self.get(&update.guild_id) else {
            return Ok(());
        };
        player.handle_voice_state(update).await
    }

    // ========================================================================
    // Cluster-wide plugin queries
    // ========================================================================

    /// Info from every ready node, best effort: failures are logged and
    /// the node is left out of the result.
    pub async fn get_info(&self, force_refresh: bool) -> HashMap<String, LavalinkInfo> {
        let nodes: Vec<Node> = self.nodes().into_iter().filter(Node::is_ready).collect();
        let results = join_all(nodes.iter().map(|node| async move {
            (node.id().to_string(), node.get_info(force_refresh).await)
        }))
        .await;

        let mut info = HashMap::new();
        for (node_id, result) in results {
            match result {
                Ok(node_info) => {
                    info.insert(node_id, node_info);
                }
                Err(err) => warn!(node = %node_id, error = %err, "info fan-out failed"),
            }
        }
        info
    }

    /// Plugins per ready node, best effort.
    pub async fn get_all_plugins(&self, force_refresh: bool) -> HashMap<String, Vec<PluginMeta>> {
        self.get_info(force_refresh)
            .await
            .into_iter()
            .map(|(node_id, info)| (node_id, info.plugins))
            .collect()
    }

    /// Deduplicated plugin list across the cluster; the first node
    /// reporting a name wins.
    pub async fn get_unique_plugins(&self, force_refresh: bool) -> Vec<PluginMeta> {
        let by_node = self.get_all_plugins(force_refresh).await;
        let mut seen = HashMap::new();
        // Walk configured node order so "first wins" is deterministic.
        for node in self.nodes() {
            if let Some(plugins) = by_node.get(node.id()) {
                for plugin in plugins {
                    seen.entry(plugin.name.clone()).or_insert_with(|| plugin.clone());
                }
            }
        }
        let mut unique: Vec<PluginMeta> = seen.into_values().collect();
        unique.sort_by(|a, b| a.name.cmp(&b.name));
        unique
    }

    pub async fn has_plugin(&self, name: &str) -> bool {
        !self.get_nodes_with_plugin(name).await.is_empty()
    }

    /// Ids of ready nodes carrying the named plugin.
    pub async fn get_nodes_with_plugin(&self, name: &str) -> Vec<String> {
        self.get_all_plugins(false)
            .await
            .into_iter()
            .filter(|(_, plugins)| plugins.iter().any(|plugin| plugin.name == name))
            .map(|(node_id, _)| node_id)
            .collect()
    }

    /// Call a plugin endpoint, load-balancing across the nodes that carry
    /// the plugin.
    pub async fn plugin_request(
        &self,
        name: &str,
        endpoint: &str,
        options: &PluginRequestOptions,
    ) -> Result<Value> {
        let carriers = self.get_nodes_with_plugin(name).await;
        let node = self
            .nodes()
            .into_iter()
            .filter(|node| carriers.iter().any(|id| id == node.id()))
            .min_by(|a, b| {
                a.snapshot()
                    .load_balanced_key()
                    .total_cmp(&b.snapshot().load_balanced_key())
            })
            .ok_or_else(|| Error::PluginNotAvailable(name.to_string()))?;
        node.plugin_request(name, endpoint, options).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Aggregate statistics over the cluster's cached node stats.
    pub fn stats(&self) -> ClusterStats {
        let nodes = self.nodes();
        let mut stats = ClusterStats {
            nodes: nodes.len(),
            ..ClusterStats::default()
        };
        for node in &nodes {
            if node.is_ready() {
                stats.ready_nodes += 1;
            }
            if let Some(node_stats) = node.stats() {
                stats.players += node_stats.players;
                stats.playing_players += node_stats.playing_players;
            }
        }
        stats
    }

    /// Destroy every player (bounded by `timeout`, default 30 s), then
    /// close every node socket. Idempotent.
    pub async fn shutdown(&self, timeout: Option<Duration>) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(players = self.player_count(), "shutting down");

        let budget = timeout.unwrap_or(SHUTDOWN_TIMEOUT);
        if tokio::time::timeout(budget, self.destroy_all()).await.is_err() {
            warn!(budget_ms = budget.as_millis() as u64, "shutdown timed out destroying players");
        }

        for node in self.nodes() {
            node.disconnect();
        }
    }

    fn snapshots(&self) -> Vec<NodeSnapshot> {
        self.inner
            .nodes
            .read()
            .unwrap()
            .iter()
            .map(Node::snapshot)
            .collect()
    }

    /// The configured selection strategy.
    pub fn strategy(&self) -> SelectionStrategy {
        self.inner.config.node_selection_strategy
    }
}

/// Router task: deliver node events to the owning player and forward the
/// user-facing view. Ends when the cluster is dropped.
async fn route_node_events(
    inner: Weak<RiasInner>,
    mut events: mpsc::UnboundedReceiver<NodeEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else { return };
        let emit = |event: RiasEvent| {
            let _ = inner.events.send(event);
        };

        match event {
            NodeEvent::PlayerEvent { guild_id, event, .. } => {
                let player = inner.players.read().unwrap().get(&guild_id).cloned();
                match player {
                    Some(player) => player.handle_event(event).await,
                    None => debug!(guild = %guild_id, "event for unknown player"),
                }
            }
            NodeEvent::PlayerUpdate { guild_id, state, .. } => {
                let player = inner.players.read().unwrap().get(&guild_id).cloned();
                if let Some(player) = player {
                    player.handle_player_update(state);
                }
            }
            NodeEvent::Connect { node_id } => emit(RiasEvent::NodeConnect { node_id }),
            NodeEvent::Ready {
                node_id,
                session_id,
                resumed,
            } => emit(RiasEvent::NodeReady {
                node_id,
                session_id,
                resumed,
            }),
            NodeEvent::Disconnect {
                node_id,
                code,
                reason,
            } => emit(RiasEvent::NodeDisconnect {
                node_id,
                code,
                reason,
            }),
            NodeEvent::Error { node_id, message } => {
                emit(RiasEvent::NodeError { node_id, message })
            }
            NodeEvent::Stats { node_id, stats } => emit(RiasEvent::NodeStats { node_id, stats }),
            NodeEvent::InfoUpdate { node_id, info } => {
                emit(RiasEvent::NodeInfoUpdate { node_id, info })
            }
            NodeEvent::PluginLoaded { node_id, plugin } => {
                emit(RiasEvent::PluginLoaded { node_id, plugin })
            }
            NodeEvent::Raw { node_id, payload } => {
                emit(RiasEvent::RawFrame { node_id, payload })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    fn cluster() -> (Rias, mpsc::UnboundedReceiver<RiasEvent>) {
        let config = RiasConfig::new(vec![NodeConfig::new("main", "localhost", 2333, "pw")]);
        Rias::new(config, |_, _| {}).unwrap()
    }

    fn ready_cluster() -> (Rias, mpsc::UnboundedReceiver<RiasEvent>) {
        let (rias, events) = cluster();
        *rias.inner.client_id.lock().unwrap() = Some("999999999999999999".to_string());
        rias.node("main").unwrap().force_ready_for_tests("S");
        (rias, events)
    }

    #[tokio::test]
    async fn create_validates_guild_id() {
        let (rias, _events) = ready_cluster();
        let err = rias.create("not-a-guild", None).unwrap_err();
        assert!(matches!(err, Error::InvalidGuild(_)));
    }

    #[tokio::test]
    async fn create_without_ready_nodes_fails() {
        let (rias, _events) = cluster();
        let err = rias.create("123456789012345678", None).unwrap_err();
        assert!(matches!(err, Error::NoAvailableNodes));
    }

    #[tokio::test]
    async fn create_is_idempotent_per_guild() {
        let (rias, _events) = ready_cluster();
        let first = rias.create("123456789012345678", None).unwrap();
        let second = rias.create("123456789012345678", None).unwrap();
        assert_eq!(first.guild_id(), second.guild_id());
        assert_eq!(rias.player_count(), 1);
        assert_eq!(first.node().id(), "main");
    }

    #[tokio::test]
    async fn destroy_removes_registry_entry() {
        let (rias, _events) = ready_cluster();
        rias.create("123456789012345678", None).unwrap();
        assert_eq!(rias.player_count(), 1);

        rias.destroy("123456789012345678").await.unwrap();
        assert_eq!(rias.player_count(), 0);
        assert!(rias.get("123456789012345678").is_none());

        let err = rias.destroy("123456789012345678").await.unwrap_err();
        assert!(matches!(err, Error::PlayerNotFound(_)));
    }

    #[tokio::test]
    async fn voice_state_for_other_users_is_dropped() {
        let (rias, _events) = ready_cluster();
        let player = rias.create("123456789012345678", None).unwrap();

        rias.handle_voice_state_update(VoiceStateUpdate {
            guild_id: "123456789012345678".to_string(),
            user_id: "111111111111111111".to_string(),
            session_id: "other".to_string(),
            channel_id: Some("876543210987654321".to_string()),
        })
        .await
        .unwrap();
        assert!(player.voice_channel().is_none());
    }

    #[tokio::test]
    async fn raw_packets_for_unknown_guilds_are_ignored() {
        let (rias, _events) = ready_cluster();
        rias.handle_raw(&serde_json::json!({
            "t": "VOICE_SERVER_UPDATE",
            "d": {"token": "tk", "guild_id": "222222222222222222", "endpoint": "e"}
        }))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn add_and_remove_node() {
        let (rias, _events) = cluster();
        rias.add_node(NodeConfig::new("backup", "localhost", 2334, "pw"));
        assert_eq!(rias.nodes().len(), 2);
        assert!(rias.node("backup").is_some());

        rias.remove_node("backup").unwrap();
        assert_eq!(rias.nodes().len(), 1);
        assert!(matches!(
            rias.remove_node("backup").unwrap_err(),
            Error::NodeNotFound(_)
        ));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (rias, _events) = ready_cluster();
        rias.create("123456789012345678", None).unwrap();
        rias.shutdown(Some(Duration::from_secs(2))).await;
        assert_eq!(rias.player_count(), 0);
        rias.shutdown(Some(Duration::from_secs(2))).await;
    }

    #[tokio::test]
    async fn stats_aggregates_ready_nodes() {
        let (rias, _events) = ready_cluster();
        let stats = rias.stats();
        assert_eq!(stats.nodes, 1);
        assert_eq!(stats.ready_nodes, 1);
        assert_eq!(stats.players, 0);
    }
}
