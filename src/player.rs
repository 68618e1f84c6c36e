//! Per-guild playback controller.
//!
//! A [`Player`] is pinned to one [`Node`] at creation and never migrates.
//! It composes the two independently-arriving voice packets into a single
//! voice update for the node, drives its [`Queue`], and reconciles local
//! state with node-pushed events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::events::RiasEvent;
use crate::filters::Filters;
use crate::node::Node;
use crate::protocol::{
    self, TrackEvent, UpdatePlayer, VoicePayload, VoiceServerUpdate, VoiceStateUpdate,
};
use crate::queue::{LoopMode, Queue};
use crate::types::{PlayerUpdateState, Track};
use crate::validate;
use crate::{Error, Result};

/// Callback handing a voice-join payload to the chat platform.
pub(crate) type SendFn = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Hook invoked once when the player is destroyed.
pub(crate) type DestroyHook = Box<dyn Fn() + Send + Sync>;

/// What to play: an already-encoded blob or a resolved track.
#[derive(Debug, Clone)]
pub enum PlayTarget {
    Encoded(String),
    Track(Track),
}

impl From<Track> for PlayTarget {
    fn from(track: Track) -> Self {
        PlayTarget::Track(track)
    }
}

impl From<String> for PlayTarget {
    fn from(encoded: String) -> Self {
        PlayTarget::Encoded(encoded)
    }
}

impl From<&str> for PlayTarget {
    fn from(encoded: &str) -> Self {
        PlayTarget::Encoded(encoded.to_string())
    }
}

/// Options for [`Player::play`].
#[derive(Debug, Clone)]
pub struct PlayOptions {
    pub track: PlayTarget,
    /// Starting position, milliseconds.
    pub position: Option<i64>,
    /// Stop playback at this position, milliseconds.
    pub end_time: Option<i64>,
    /// Player volume to apply, `0..=1000`.
    pub volume: Option<i64>,
    pub paused: Option<bool>,
    /// Ask the node to keep the current track if one is playing.
    pub no_replace: bool,
}

impl PlayOptions {
    pub fn new(track: impl Into<PlayTarget>) -> Self {
        Self {
            track: track.into(),
            position: None,
            end_time: None,
            volume: None,
            paused: None,
            no_replace: false,
        }
    }
}

impl From<Track> for PlayOptions {
    fn from(track: Track) -> Self {
        PlayOptions::new(track)
    }
}

impl From<&str> for PlayOptions {
    fn from(encoded: &str) -> Self {
        PlayOptions::new(encoded)
    }
}

impl From<String> for PlayOptions {
    fn from(encoded: String) -> Self {
        PlayOptions::new(encoded)
    }
}

/// Options for [`Player::connect`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions {
    /// Join muted; defaults to false.
    pub mute: Option<bool>,
    /// Join deafened; defaults to true (the bot never listens).
    pub deaf: Option<bool>,
}

struct PlayerState {
    track: Option<Track>,
    voice_channel: Option<String>,
    text_channel: Option<String>,
    volume: u16,
    paused: bool,
    playing: bool,
    position: u64,
    connected: bool,
    queue: Queue,
    autoplay: bool,
    voice_server: Option<VoiceServerUpdate>,
    voice_state: Option<VoiceStateUpdate>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            track: None,
            voice_channel: None,
            text_channel: None,
            volume: 100,
            paused: false,
            playing: false,
            position: 0,
            connected: false,
            queue: Queue::new(),
            autoplay: true,
            voice_server: None,
            voice_state: None,
        }
    }
}

struct PlayerInner {
    guild_id: String,
    node: Node,
    state: Mutex<PlayerState>,
    destroyed: AtomicBool,
    events: mpsc::UnboundedSender<RiasEvent>,
    send: SendFn,
    on_destroy: DestroyHook,
}

/// Playback controller for one guild. Cheap to clone.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("guild_id", &self.inner.guild_id)
            .field("node", &self.inner.node.id())
            .finish()
    }
}

impl Player {
    pub(crate) fn new(
        guild_id: String,
        node: Node,
        events: mpsc::UnboundedSender<RiasEvent>,
        send: SendFn,
        on_destroy: DestroyHook,
    ) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                guild_id,
                node,
                state: Mutex::new(PlayerState::default()),
                destroyed: AtomicBool::new(false),
                events,
                send,
                on_destroy,
            }),
        }
    }

    pub fn guild_id(&self) -> &str {
        &self.inner.guild_id
    }

    /// The node this player was pinned to at creation.
    pub fn node(&self) -> &Node {
        &self.inner.node
    }

    pub fn track(&self) -> Option<Track> {
        self.inner.state.lock().unwrap().track.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.state.lock().unwrap().playing
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().unwrap().paused
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().unwrap().connected
    }

    /// Last reported playback position, milliseconds.
    pub fn position(&self) -> u64 {
        self.inner.state.lock().unwrap().position
    }

    pub fn volume(&self) -> u16 {
        self.inner.state.lock().unwrap().volume
    }

    pub fn voice_channel(&self) -> Option<String> {
        self.inner.state.lock().unwrap().voice_channel.clone()
    }

    pub fn text_channel(&self) -> Option<String> {
        self.inner.state.lock().unwrap().text_channel.clone()
    }

    pub fn set_text_channel(&self, channel_id: Option<String>) {
        self.inner.state.lock().unwrap().text_channel = channel_id;
    }

    pub fn autoplay(&self) -> bool {
        self.inner.state.lock().unwrap().autoplay
    }

    /// Advance the queue automatically when a track finishes or fails.
    pub fn set_autoplay(&self, autoplay: bool) {
        self.inner.state.lock().unwrap().autoplay = autoplay;
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Voice
    // ========================================================================

    /// Ask the chat platform to join a voice channel.
    ///
    /// Emits the opcode-4 payload through the cluster's send callback; the
    /// node learns the credentials once the gateway answers with its
    /// voice-server and voice-state packets.
    pub fn connect(&self, channel_id: &str, options: ConnectOptions) -> Result<()> {
        self.ensure_alive()?;
        validate::validate_channel_id(channel_id)?;

        self.inner.state.lock().unwrap().voice_channel = Some(channel_id.to_string());
        let payload = protocol::voice_join_payload(
            &self.inner.guild_id,
            Some(channel_id),
            options.mute.unwrap_or(false),
            options.deaf.unwrap_or(true),
        );
        (self.inner.send)(&self.inner.guild_id, payload);
        Ok(())
    }

    /// Ask the chat platform to leave voice. The node-side player survives.
    pub fn disconnect(&self) -> Result<()> {
        self.ensure_alive()?;
        {
            let mut state = self.inner.state.lock().unwrap();
            state.voice_channel = None;
            state.connected = false;
        }
        let payload = protocol::voice_join_payload(&self.inner.guild_id, None, false, true);
        (self.inner.send)(&self.inner.guild_id, payload);
        Ok(())
    }

    pub(crate) async fn handle_voice_server(&self, update: VoiceServerUpdate) -> Result<()> {
        self.inner.state.lock().unwrap().voice_server = Some(update);
        self.flush_voice().await
    }

    pub(crate) async fn handle_voice_state(&self, update: VoiceStateUpdate) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match &update.channel_id {
                // The bot left voice; drop local connection state but keep
                // the node-side player addressable.
                None => {
                    state.voice_channel = None;
                    state.connected = false;
                    state.voice_state = None;
                    return Ok(());
                }
                Some(channel) => {
                    state.voice_channel = Some(channel.clone());
                    state.voice_state = Some(update);
                }
            }
        }
        self.flush_voice().await
    }

    /// Issue the voice update once both packets are present and the
    /// endpoint survived region migration.
    async fn flush_voice(&self) -> Result<()> {
        let voice = {
            let state = self.inner.state.lock().unwrap();
            match (&state.voice_server, &state.voice_state) {
                (Some(server), Some(voice_state)) => match &server.endpoint {
                    Some(endpoint) => Some(VoicePayload {
                        token: server.token.clone(),
                        endpoint: endpoint.clone(),
                        session_id: voice_state.session_id.clone(),
                    }),
                    None => None,
                },
                _ => None,
            }
        };
        let Some(voice) = voice else {
            return Ok(());
        };

        let update = UpdatePlayer {
            voice: Some(voice),
            ..Default::default()
        };
        self.inner
            .node
            .update_player(&self.inner.guild_id, &update, false)
            .await?;
        self.inner.state.lock().unwrap().connected = true;
        debug!(guild = %self.inner.guild_id, "voice handshake complete");
        Ok(())
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Start playing a track, replacing the current one unless
    /// `no_replace` is set.
    pub async fn play(&self, options: impl Into<PlayOptions>) -> Result<()> {
        let options = options.into();
        self.ensure_alive()?;

        let position = options.position.map(validate::validate_position).transpose()?;
        let end_time = options.end_time.map(validate::validate_position).transpose()?;
        let volume = options.volume.map(validate::validate_volume).transpose()?;

        let (encoded, track) = match options.track {
            PlayTarget::Encoded(encoded) => (encoded, None),
            PlayTarget::Track(track) => (track.encoded.clone(), Some(track)),
        };

        let update = UpdatePlayer {
            encoded_track: Some(Some(encoded)),
            position,
            end_time,
            volume,
            paused: options.paused,
            ..Default::default()
        };
        self.surface(
            self.inner
                .node
                .update_player(&self.inner.guild_id, &update, options.no_replace)
                .await,
        )?;

        let mut state = self.inner.state.lock().unwrap();
        state.playing = true;
        if let Some(track) = track {
            state.track = Some(track);
        }
        if let Some(volume) = volume {
            state.volume = volume;
        }
        if let Some(paused) = options.paused {
            state.paused = paused;
        }
        Ok(())
    }

    /// Stop the current track without touching the queue.
    pub async fn stop(&self) -> Result<()> {
        self.ensure_alive()?;
        let update = UpdatePlayer {
            encoded_track: Some(None),
            ..Default::default()
        };
        self.surface(
            self.inner
                .node
                .update_player(&self.inner.guild_id, &update, false)
                .await,
        )?;
        let mut state = self.inner.state.lock().unwrap();
        state.track = None;
        state.playing = false;
        Ok(())
    }

    pub async fn pause(&self, paused: bool) -> Result<()> {
        self.ensure_alive()?;
        let update = UpdatePlayer {
            paused: Some(paused),
            ..Default::default()
        };
        self.surface(
            self.inner
                .node
                .update_player(&self.inner.guild_id, &update, false)
                .await,
        )?;
        self.inner.state.lock().unwrap().paused = paused;
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.pause(false).await
    }

    /// Seek within the current track.
    pub async fn seek(&self, position_ms: i64) -> Result<()> {
        self.ensure_alive()?;
        let position = validate::validate_position(position_ms)?;
        {
            let state = self.inner.state.lock().unwrap();
            let track = state
                .track
                .as_ref()
                .ok_or_else(|| Error::NoTrackPlaying(self.inner.guild_id.clone()))?;
            if !track.info.is_seekable {
                return Err(Error::TrackNotSeekable);
            }
        }
        let update = UpdatePlayer {
            position: Some(position),
            ..Default::default()
        };
        self.surface(
            self.inner
                .node
                .update_player(&self.inner.guild_id, &update, false)
                .await,
        )?;
        self.inner.state.lock().unwrap().position = position;
        Ok(())
    }

    pub async fn set_volume(&self, volume: i64) -> Result<()> {
        self.ensure_alive()?;
        let volume = validate::validate_volume(volume)?;
        let update = UpdatePlayer {
            volume: Some(volume),
            ..Default::default()
        };
        self.surface(
            self.inner
                .node
                .update_player(&self.inner.guild_id, &update, false)
                .await,
        )?;
        self.inner.state.lock().unwrap().volume = volume;
        Ok(())
    }

    pub async fn set_filters(&self, filters: Filters) -> Result<()> {
        self.ensure_alive()?;
        let update = UpdatePlayer {
            filters: Some(filters),
            ..Default::default()
        };
        self.surface(
            self.inner
                .node
                .update_player(&self.inner.guild_id, &update, false)
                .await,
        )
    }

    /// Reset every filter to the node default.
    pub async fn clear_filters(&self) -> Result<()> {
        self.set_filters(Filters::empty()).await
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Copy of the queue as it stands.
    pub fn queue(&self) -> Queue {
        self.inner.state.lock().unwrap().queue.clone()
    }

    /// Run positional edits (insert, move, swap, ...) against the live queue.
    pub fn edit_queue<R>(&self, edit: impl FnOnce(&mut Queue) -> R) -> R {
        edit(&mut self.inner.state.lock().unwrap().queue)
    }

    pub fn add_track(&self, track: Track) {
        self.inner.state.lock().unwrap().queue.add(track);
        self.emit(RiasEvent::QueueAdd {
            guild_id: self.inner.guild_id.clone(),
            count: 1,
        });
    }

    pub fn add_tracks(&self, tracks: Vec<Track>) {
        let count = tracks.len();
        self.inner.state.lock().unwrap().queue.add_many(tracks);
        self.emit(RiasEvent::QueueAdd {
            guild_id: self.inner.guild_id.clone(),
            count,
        });
    }

    pub fn remove_track(&self, index: usize) -> Option<Track> {
        let removed = self.inner.state.lock().unwrap().queue.remove(index);
        if let Some(track) = &removed {
            self.emit(RiasEvent::QueueRemove {
                guild_id: self.inner.guild_id.clone(),
                track: track.clone(),
            });
        }
        removed
    }

    pub fn clear_queue(&self) {
        self.inner.state.lock().unwrap().queue.clear();
        self.emit(RiasEvent::QueueClear {
            guild_id: self.inner.guild_id.clone(),
        });
    }

    pub fn shuffle_queue(&self) {
        self.inner.state.lock().unwrap().queue.shuffle();
        self.emit(RiasEvent::QueueShuffle {
            guild_id: self.inner.guild_id.clone(),
        });
    }

    /// Shuffle while spreading each author's tracks apart.
    pub fn smart_shuffle_queue(&self) {
        self.inner.state.lock().unwrap().queue.smart_shuffle();
        self.emit(RiasEvent::QueueShuffle {
            guild_id: self.inner.guild_id.clone(),
        });
    }

    pub fn set_loop(&self, mode: LoopMode) {
        self.inner.state.lock().unwrap().queue.set_loop_mode(mode);
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.inner.state.lock().unwrap().queue.loop_mode()
    }

    /// Play the next queued track, or stop when the queue ran dry.
    /// Returns whether another track started.
    pub async fn skip(&self) -> Result<bool> {
        self.ensure_alive()?;
        let next = {
            let mut state = self.inner.state.lock().unwrap();
            if state.queue.is_empty() {
                None
            } else {
                state.queue.poll()
            }
        };
        match next {
            Some(track) => {
                self.play(PlayOptions::new(track)).await?;
                Ok(true)
            }
            None => {
                self.stop().await?;
                self.emit(RiasEvent::QueueEnd {
                    guild_id: self.inner.guild_id.clone(),
                });
                Ok(false)
            }
        }
    }

    /// Replay the previously played track. Returns whether one existed.
    pub async fn previous(&self) -> Result<bool> {
        self.ensure_alive()?;
        let previous = self.inner.state.lock().unwrap().queue.previous().cloned();
        match previous {
            Some(track) => {
                self.play(PlayOptions::new(track)).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Tear down the player. Idempotent; node-side failures are swallowed.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(err) = self.inner.node.destroy_player(&self.inner.guild_id).await {
            debug!(guild = %self.inner.guild_id, error = %err,
                "destroy_player failed, continuing teardown");
        }

        {
            let mut state = self.inner.state.lock().unwrap();
            state.track = None;
            state.playing = false;
            state.paused = false;
            state.connected = false;
            state.voice_channel = None;
            state.voice_server = None;
            state.voice_state = None;
            state.queue.clear();
            state.queue.reset_position();
        }

        self.emit(RiasEvent::PlayerDestroy {
            guild_id: self.inner.guild_id.clone(),
        });
        (self.inner.on_destroy)();
    }

    // ========================================================================
    // Node event reconciliation
    // ========================================================================

    pub(crate) async fn handle_event(&self, event: TrackEvent) {
        let guild_id = self.inner.guild_id.clone();
        match event {
            TrackEvent::TrackStart { track } => {
                {
                    let mut state = self.inner.state.lock().unwrap();
                    state.track = Some(track.clone());
                    state.playing = true;
                }
                self.emit(RiasEvent::TrackStart { guild_id, track });
            }
            TrackEvent::TrackEnd { track, reason } => {
                self.inner.state.lock().unwrap().playing = false;
                self.emit(RiasEvent::TrackEnd {
                    guild_id: guild_id.clone(),
                    track,
                    reason,
                });
                if reason.may_start_next() && self.autoplay() {
                    self.advance_queue().await;
                }
            }
            TrackEvent::TrackStuck {
                track,
                threshold_ms,
            } => {
                self.emit(RiasEvent::TrackStuck {
                    guild_id,
                    track,
                    threshold_ms,
                });
            }
            TrackEvent::TrackException { track, exception } => {
                self.emit(RiasEvent::TrackException {
                    guild_id,
                    track,
                    exception,
                });
            }
            TrackEvent::WebSocketClosed {
                code,
                reason,
                by_remote,
            } => {
                self.inner.state.lock().unwrap().connected = false;
                self.emit(RiasEvent::WebSocketClosed {
                    guild_id,
                    code,
                    reason,
                    by_remote,
                });
            }
        }
    }

    pub(crate) fn handle_player_update(&self, update: PlayerUpdateState) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.position = update.position;
            state.connected = update.connected;
        }
        self.emit(RiasEvent::PlayerUpdate {
            guild_id: self.inner.guild_id.clone(),
            state: update,
        });
    }

    /// Autoplay step: poll the queue and start the next track.
    async fn advance_queue(&self) {
        let next = self.inner.state.lock().unwrap().queue.poll();
        match next {
            Some(track) => {
                if let Err(err) = self.play(PlayOptions::new(track)).await {
                    warn!(guild = %self.inner.guild_id, error = %err, "autoplay failed");
                }
            }
            None => {
                self.emit(RiasEvent::QueueEnd {
                    guild_id: self.inner.guild_id.clone(),
                });
            }
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            Err(Error::PlayerDestroyed(self.inner.guild_id.clone()))
        } else {
            Ok(())
        }
    }

    /// Surface a user-initiated failure as an event as well as an error.
    fn surface<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.emit(RiasEvent::PlayerError {
                guild_id: self.inner.guild_id.clone(),
                message: err.to_string(),
            });
        }
        result
    }

    fn emit(&self, event: RiasEvent) {
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::testutil::track;

    struct Harness {
        player: Player,
        events: mpsc::UnboundedReceiver<RiasEvent>,
        sent: Arc<Mutex<Vec<(String, Value)>>>,
    }

    fn harness() -> Harness {
        let (node_tx, _node_rx) = mpsc::unbounded_channel();
        let node = Node::new(
            NodeConfig::new("test", "localhost", 2333, "pw"),
            "Rias".to_string(),
            reqwest::Client::new(),
            node_tx,
            false,
        );
        let (events_tx, events) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&sent);
        let send: SendFn = Arc::new(move |guild: &str, payload: Value| {
            captured.lock().unwrap().push((guild.to_string(), payload));
        });
        let player = Player::new(
            "123456789012345678".to_string(),
            node,
            events_tx,
            send,
            Box::new(|| {}),
        );
        Harness {
            player,
            events,
            sent,
        }
    }

    #[test]
    fn connect_rejects_bad_channel_without_sending() {
        let h = harness();
        let err = h
            .player
            .connect("not-a-channel-id", ConnectOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidChannel(_)));
        assert!(h.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn connect_emits_voice_join_payload() {
        let h = harness();
        h.player
            .connect("876543210987654321", ConnectOptions::default())
            .unwrap();

        let sent = h.sent.lock().unwrap();
        let (guild, payload) = &sent[0];
        assert_eq!(guild, "123456789012345678");
        assert_eq!(payload["op"], 4);
        assert_eq!(payload["d"]["channel_id"], "876543210987654321");
        assert_eq!(payload["d"]["self_mute"], false);
        assert_eq!(payload["d"]["self_deaf"], true);
        assert_eq!(
            h.player.voice_channel().as_deref(),
            Some("876543210987654321")
        );
    }

    #[tokio::test]
    async fn voice_update_waits_for_both_packets() {
        let h = harness();

        // Server packet alone: stored, no REST attempted.
        h.player
            .handle_voice_server(VoiceServerUpdate {
                token: "tk".to_string(),
                guild_id: "123456789012345678".to_string(),
                endpoint: Some("voice.example.com:443".to_string()),
            })
            .await
            .unwrap();

        // Null endpoint with both present: still no REST.
        h.player
            .handle_voice_server(VoiceServerUpdate {
                token: "tk".to_string(),
                guild_id: "123456789012345678".to_string(),
                endpoint: None,
            })
            .await
            .unwrap();
        h.player
            .handle_voice_state(VoiceStateUpdate {
                guild_id: "123456789012345678".to_string(),
                user_id: "1".to_string(),
                session_id: "vs".to_string(),
                channel_id: Some("876543210987654321".to_string()),
            })
            .await
            .unwrap();
        assert!(!h.player.is_connected());

        // Endpoint restored: the REST call is finally attempted, and fails
        // here only because the test node never became ready.
        let err = h
            .player
            .handle_voice_server(VoiceServerUpdate {
                token: "tk".to_string(),
                guild_id: "123456789012345678".to_string(),
                endpoint: Some("voice.example.com:443".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeNotReady(_)));
    }

    #[tokio::test]
    async fn null_channel_clears_voice_state() {
        let h = harness();
        h.player
            .connect("876543210987654321", ConnectOptions::default())
            .unwrap();
        h.player
            .handle_voice_state(VoiceStateUpdate {
                guild_id: "123456789012345678".to_string(),
                user_id: "1".to_string(),
                session_id: "vs".to_string(),
                channel_id: None,
            })
            .await
            .unwrap();
        assert!(h.player.voice_channel().is_none());
        assert!(!h.player.is_connected());
    }

    #[test]
    fn queue_ops_emit_events() {
        let mut h = harness();
        h.player.add_track(track("a", "x"));
        h.player.add_tracks(vec![track("b", "y"), track("c", "z")]);
        assert!(matches!(
            h.events.try_recv().unwrap(),
            RiasEvent::QueueAdd { count: 1, .. }
        ));
        assert!(matches!(
            h.events.try_recv().unwrap(),
            RiasEvent::QueueAdd { count: 2, .. }
        ));

        let removed = h.player.remove_track(1).unwrap();
        assert_eq!(removed.info.identifier, "b");
        assert!(matches!(
            h.events.try_recv().unwrap(),
            RiasEvent::QueueRemove { .. }
        ));

        h.player.clear_queue();
        assert!(matches!(
            h.events.try_recv().unwrap(),
            RiasEvent::QueueClear { .. }
        ));
        assert!(h.player.queue().is_empty());
    }

    #[tokio::test]
    async fn track_events_reconcile_state() {
        let mut h = harness();
        h.player.set_autoplay(false);

        h.player
            .handle_event(TrackEvent::TrackStart {
                track: track("a", "x"),
            })
            .await;
        assert!(h.player.is_playing());
        assert_eq!(h.player.track().unwrap().info.identifier, "a");
        assert!(matches!(
            h.events.try_recv().unwrap(),
            RiasEvent::TrackStart { .. }
        ));

        h.player
            .handle_event(TrackEvent::WebSocketClosed {
                code: 4006,
                reason: "session invalid".to_string(),
                by_remote: true,
            })
            .await;
        assert!(!h.player.is_connected());
        assert!(matches!(
            h.events.try_recv().unwrap(),
            RiasEvent::WebSocketClosed { code: 4006, .. }
        ));
    }

    #[tokio::test]
    async fn player_update_frame_moves_position() {
        let mut h = harness();
        h.player.handle_player_update(PlayerUpdateState {
            time: 1,
            position: 42_000,
            connected: true,
            ping: 12,
        });
        assert_eq!(h.player.position(), 42_000);
        assert!(h.player.is_connected());
        assert!(matches!(
            h.events.try_recv().unwrap(),
            RiasEvent::PlayerUpdate { .. }
        ));
    }

    #[tokio::test]
    async fn destroy_is_an_idempotent_latch() {
        let mut h = harness();
        h.player.add_track(track("a", "x"));
        let _ = h.events.try_recv();

        h.player.destroy().await;
        h.player.destroy().await;

        assert!(h.player.is_destroyed());
        assert!(h.player.queue().is_empty());
        assert!(matches!(
            h.events.try_recv().unwrap(),
            RiasEvent::PlayerDestroy { .. }
        ));
        // Only one destroy event despite two calls.
        assert!(h.events.try_recv().is_err());

        let err = h.player.play("ENC").await.unwrap_err();
        assert!(matches!(err, Error::PlayerDestroyed(_)));
        let err = h
            .player
            .connect("876543210987654321", ConnectOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::PlayerDestroyed(_)));
    }

    #[tokio::test]
    async fn play_validates_before_touching_the_node() {
        let h = harness();
        let mut options = PlayOptions::new("ENC");
        options.volume = Some(2000);
        assert!(matches!(
            h.player.play(options).await.unwrap_err(),
            Error::InvalidVolume(2000)
        ));

        let mut options = PlayOptions::new("ENC");
        options.position = Some(-1);
        assert!(matches!(
            h.player.play(options).await.unwrap_err(),
            Error::InvalidPosition(-1)
        ));
    }
}
