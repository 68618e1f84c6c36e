//! Wire protocol: event-stream frames, REST payloads, gateway packets.
//!
//! Inbound frames are dispatched in two steps (read `op`, then parse the
//! typed frame) so unknown ops can be surfaced raw instead of dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::filters::Filters;
use crate::types::{PlayerUpdateState, Track, TrackException};
use crate::{Error, Result};

// ============================================================================
// Inbound frames (node -> client)
// ============================================================================

/// A parsed frame from the node event stream.
#[derive(Debug, Clone)]
pub enum NodeFrame {
    Ready(ReadyFrame),
    Stats(crate::types::NodeStats),
    PlayerUpdate(PlayerUpdateFrame),
    Event(EventFrame),
    /// Frame with an op this client does not know.
    Unknown(Value),
}

impl NodeFrame {
    /// Parse one JSON text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let op = value.get("op").and_then(Value::as_str).unwrap_or_default();
        let frame = match op {
            "ready" => NodeFrame::Ready(serde_json::from_value(value)?),
            "stats" => NodeFrame::Stats(serde_json::from_value(value)?),
            "playerUpdate" => NodeFrame::PlayerUpdate(serde_json::from_value(value)?),
            "event" => NodeFrame::Event(serde_json::from_value(value)?),
            _ => NodeFrame::Unknown(value),
        };
        Ok(frame)
    }
}

/// First frame after the socket opens; carries the session id.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyFrame {
    pub session_id: String,
    /// True when the node resumed the previous session under a resume key.
    pub resumed: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateFrame {
    pub guild_id: String,
    pub state: PlayerUpdateState,
}

/// A per-guild event frame, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    pub guild_id: String,
    #[serde(flatten)]
    pub event: TrackEvent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum TrackEvent {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart { track: Track },
    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd { track: Track, reason: TrackEndReason },
    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        track: Track,
        exception: TrackException,
    },
    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck { track: Track, threshold_ms: u64 },
    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebSocketClosed {
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

/// Why a track stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether the queue should advance to the next track.
    pub fn may_start_next(self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }
}

// ============================================================================
// Outbound frames (client -> node)
// ============================================================================

/// Build the `configureResuming` frame sent after a resumable socket opens.
pub fn configure_resuming(key: &str, timeout_secs: u64) -> Value {
    json!({
        "op": "configureResuming",
        "key": key,
        "timeout": timeout_secs,
    })
}

// ============================================================================
// REST payloads
// ============================================================================

/// Voice credentials forwarded to the node once the handshake completes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicePayload {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// Body of `PATCH /v4/sessions/{sid}/players/{guild}`.
///
/// Only fields the caller supplied are serialized. `encoded_track`
/// distinguishes "omitted" (`None`) from "explicit null" (`Some(None)`),
/// which tells the node to stop the current track.
#[derive(Debug, Clone, Default)]
pub struct UpdatePlayer {
    pub encoded_track: Option<Option<String>>,
    pub identifier: Option<String>,
    pub position: Option<u64>,
    pub end_time: Option<u64>,
    pub volume: Option<u16>,
    pub paused: Option<bool>,
    pub filters: Option<Filters>,
    pub voice: Option<VoicePayload>,
}

impl UpdatePlayer {
    /// Serialize into a JSON body containing only the supplied fields.
    pub fn to_body(&self) -> Result<Value> {
        let mut body = Map::new();
        if let Some(encoded) = &self.encoded_track {
            let value = match encoded {
                Some(track) => Value::String(track.clone()),
                None => Value::Null,
            };
            body.insert("encodedTrack".to_string(), value);
        }
        if let Some(identifier) = &self.identifier {
            body.insert("identifier".to_string(), json!(identifier));
        }
        if let Some(position) = self.position {
            body.insert("position".to_string(), json!(position));
        }
        if let Some(end_time) = self.end_time {
            body.insert("endTime".to_string(), json!(end_time));
        }
        if let Some(volume) = self.volume {
            body.insert("volume".to_string(), json!(volume));
        }
        if let Some(paused) = self.paused {
            body.insert("paused".to_string(), json!(paused));
        }
        if let Some(filters) = &self.filters {
            body.insert("filters".to_string(), serde_json::to_value(filters)?);
        }
        if let Some(voice) = &self.voice {
            body.insert("voice".to_string(), serde_json::to_value(voice)?);
        }
        Ok(Value::Object(body))
    }

    /// True when no field was supplied.
    pub fn is_empty(&self) -> bool {
        self.encoded_track.is_none()
            && self.identifier.is_none()
            && self.position.is_none()
            && self.end_time.is_none()
            && self.volume.is_none()
            && self.paused.is_none()
            && self.filters.is_none()
            && self.voice.is_none()
    }
}

// ============================================================================
// Chat-platform gateway packets
// ============================================================================

/// `VOICE_SERVER_UPDATE` packet payload.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: String,
    /// Null while the platform migrates the guild between voice regions.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// `VOICE_STATE_UPDATE` packet payload, reduced to the fields we consume.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceStateUpdate {
    pub guild_id: String,
    pub user_id: String,
    pub session_id: String,
    /// Null when the user left voice.
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Build the gateway opcode-4 payload asking the platform to join or leave
/// a voice channel (`channel_id: None` leaves).
pub fn voice_join_payload(
    guild_id: &str,
    channel_id: Option<&str>,
    self_mute: bool,
    self_deaf: bool,
) -> Value {
    json!({
        "op": 4,
        "d": {
            "guild_id": guild_id,
            "channel_id": channel_id,
            "self_mute": self_mute,
            "self_deaf": self_deaf,
        }
    })
}

/// Parse a raw gateway record; returns `Err` when the payload shape is off.
pub fn parse_raw_packet(packet: &Value) -> Result<Option<RawVoicePacket>> {
    let kind = packet.get("t").and_then(Value::as_str).unwrap_or_default();
    let data = packet.get("d").cloned().unwrap_or(Value::Null);
    match kind {
        "VOICE_SERVER_UPDATE" => {
            let update = serde_json::from_value(data).map_err(Error::Json)?;
            Ok(Some(RawVoicePacket::Server(update)))
        }
        "VOICE_STATE_UPDATE" => {
            let update = serde_json::from_value(data).map_err(Error::Json)?;
            Ok(Some(RawVoicePacket::State(update)))
        }
        _ => Ok(None),
    }
}

/// The two raw packet kinds the cluster consumes.
#[derive(Debug, Clone)]
pub enum RawVoicePacket {
    Server(VoiceServerUpdate),
    State(VoiceStateUpdate),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ready_frame() {
        let frame = NodeFrame::parse(r#"{"op":"ready","resumed":true,"sessionId":"la3kfz"}"#)
            .unwrap();
        match frame {
            NodeFrame::Ready(ready) => {
                assert_eq!(ready.session_id, "la3kfz");
                assert!(ready.resumed);
            }
            other => panic!("expected ready frame, got {other:?}"),
        }
    }

    #[test]
    fn parse_event_frame() {
        let text = r#"{
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "123456789012345678",
            "track": {
                "encoded": "QAAA",
                "info": {
                    "identifier": "x", "isSeekable": true, "author": "a",
                    "length": 1000, "isStream": false, "position": 0,
                    "title": "t", "sourceName": "youtube"
                }
            },
            "reason": "loadFailed"
        }"#;
        match NodeFrame::parse(text).unwrap() {
            NodeFrame::Event(event) => {
                assert_eq!(event.guild_id, "123456789012345678");
                match event.event {
                    TrackEvent::TrackEnd { reason, .. } => {
                        assert_eq!(reason, TrackEndReason::LoadFailed);
                        assert!(reason.may_start_next());
                    }
                    other => panic!("expected track end, got {other:?}"),
                }
            }
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[test]
    fn unknown_op_is_surfaced_raw() {
        match NodeFrame::parse(r#"{"op":"warmup","data":1}"#).unwrap() {
            NodeFrame::Unknown(value) => assert_eq!(value["op"], "warmup"),
            other => panic!("expected unknown frame, got {other:?}"),
        }
    }

    #[test]
    fn update_player_omits_absent_fields() {
        let update = UpdatePlayer {
            encoded_track: Some(Some("ENC".to_string())),
            paused: Some(false),
            ..Default::default()
        };
        let body = update.to_body().unwrap();
        assert_eq!(body, serde_json::json!({"encodedTrack": "ENC", "paused": false}));
    }

    #[test]
    fn update_player_stop_sends_explicit_null() {
        let update = UpdatePlayer {
            encoded_track: Some(None),
            ..Default::default()
        };
        let body = update.to_body().unwrap();
        assert!(body.get("encodedTrack").unwrap().is_null());
    }

    #[test]
    fn voice_join_payload_shape() {
        let payload = voice_join_payload("123", Some("456"), false, true);
        assert_eq!(payload["op"], 4);
        assert_eq!(payload["d"]["channel_id"], "456");
        assert_eq!(payload["d"]["self_deaf"], true);

        let leave = voice_join_payload("123", None, false, true);
        assert!(leave["d"]["channel_id"].is_null());
    }

    #[test]
    fn parse_raw_packet_filters_types() {
        let server = serde_json::json!({
            "t": "VOICE_SERVER_UPDATE",
            "d": {"token": "tk", "guild_id": "1", "endpoint": "voice.example.com:443"}
        });
        assert!(matches!(
            parse_raw_packet(&server).unwrap(),
            Some(RawVoicePacket::Server(_))
        ));

        let other = serde_json::json!({"t": "MESSAGE_CREATE", "d": {}});
        assert!(parse_raw_packet(&other).unwrap().is_none());
    }
}
