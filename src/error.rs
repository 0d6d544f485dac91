//! Error types for the meeting client

use crate::peer::state::PeerState;
use crate::peer::types::RoomId;

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session, the negotiation engine and its collaborators
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera/microphone/screen capture refused or hardware absent
    #[error("Media access failed: {0}")]
    MediaAccess(String),

    /// Screen-capture picker dismissed
    #[error("Screen capture cancelled by user")]
    UserCancelled,

    /// Relay link lost
    #[error("Signaling channel disconnected")]
    SignalingDisconnected,

    /// Description or candidate rejected by the underlying connection
    #[error("Negotiation failed: {0}")]
    NegotiationFailure(String),

    /// Inbound event not valid for the current negotiation state
    #[error("{event} is not valid in state {state:?}")]
    InvalidTransition {
        state: PeerState,
        event: &'static str,
    },

    #[error("Already joined room {0}")]
    AlreadyJoined(RoomId),

    #[error("Not joined to any room")]
    NotJoined,

    #[error("A screen-share request is already pending")]
    ToggleInProgress,

    #[error("Session has ended")]
    SessionEnded,

    #[error("Signaling transport error: {0}")]
    Transport(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Terminal errors end the session; everything else is a local, transient notice.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::SignalingDisconnected | Error::NegotiationFailure(_)
        )
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::NegotiationFailure(e.to_string())
    }
}

/// Capture failures reported by a [`crate::media::MediaSource`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    AccessDenied(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("capture cancelled by user")]
    UserCancelled,
}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::UserCancelled => Error::UserCancelled,
            other => Error::MediaAccess(other.to_string()),
        }
    }
}
