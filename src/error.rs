//! Error types for rias.

use thiserror::Error;

/// Main error type for rias operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The node's event stream dropped mid-operation.
    #[error("node {0} is not connected")]
    NodeNotConnected(String),

    /// The node cannot take REST commands: no open connection, or no
    /// session id issued yet.
    #[error("node {0} is not ready")]
    NodeNotReady(String),

    /// No node with that id exists in the cluster registry.
    #[error("no node with id {0}")]
    NodeNotFound(String),

    /// No node in the cluster is eligible to host a player.
    #[error("no available nodes")]
    NoAvailableNodes,

    /// No player exists for the guild.
    #[error("no player for guild {0}")]
    PlayerNotFound(String),

    /// The player was destroyed; the handle is dead.
    #[error("player for guild {0} was destroyed")]
    PlayerDestroyed(String),

    /// An operation needed a current track and there is none.
    #[error("no track playing in guild {0}")]
    NoTrackPlaying(String),

    /// The current track does not support seeking.
    #[error("current track is not seekable")]
    TrackNotSeekable,

    /// Volume outside the accepted range.
    #[error("invalid volume {0}, expected 0..=1000")]
    InvalidVolume(i64),

    /// Position or end time outside the accepted range.
    #[error("invalid position {0}, expected a non-negative integer")]
    InvalidPosition(i64),

    /// Channel id is not a snowflake.
    #[error("invalid channel id: {0:?}")]
    InvalidChannel(String),

    /// Guild id is not a snowflake.
    #[error("invalid guild id: {0:?}")]
    InvalidGuild(String),

    /// Filter parameter outside its accepted range.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The node answered a load request with an error result.
    #[error("track load failed: {0}")]
    TrackLoadFailed(String),

    /// No connected node carries the requested plugin.
    #[error("plugin {0} is not available on any ready node")]
    PluginNotAvailable(String),

    /// A REST call exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// The node answered REST with a non-2xx status.
    #[error("REST error {status}: {message}")]
    Rest { status: u16, message: String },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else {
            Error::Http(err)
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}
