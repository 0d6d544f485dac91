//! Session lifecycle: one room, one connection, one set of local tracks.
//!
//! A [`SessionCoordinator`] runs as a single task. User commands arrive from
//! [`SessionHandle`]s; connection callbacks, relay traffic and finished media
//! requests are posted to one event queue. Both are handled one at a time, so
//! no two handlers ever interleave.

mod command;
mod coordinator;
mod handle;

pub use coordinator::{SessionCoordinator, SessionDeps};
pub use handle::SessionHandle;

use crate::chat::ChatEntry;
use crate::peer::state::{PeerState, Role};
use crate::peer::types::{RemoteTrack, RoomId};
use serde::Serialize;
use std::fmt;

/// Latest view of the session, published on every change
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub room: Option<RoomId>,
    pub state: PeerState,
    pub role: Option<Role>,
    pub muted: bool,
    pub camera_off: bool,
    /// Also true while a screen-capture request is pending
    pub screen_sharing: bool,
    pub remote_tracks: usize,
    /// Offer/answer rounds so far
    pub rounds: u64,
    pub media_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Left,
    PeerLeft,
    SignalingLost,
    /// Every handle was dropped
    Unloaded,
    Failure(String),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Left => f.write_str("left the room"),
            EndReason::PeerLeft => f.write_str("peer left"),
            EndReason::SignalingLost => f.write_str("signaling connection lost"),
            EndReason::Unloaded => f.write_str("session dropped"),
            EndReason::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// User-visible events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    StateChanged(PeerState),
    /// Camera/microphone could not be acquired; the session carries on without them
    MediaUnavailable(String),
    ScreenShareStarted,
    ScreenShareFailed(String),
    ScreenShareEnded,
    RemoteTrack(RemoteTrack),
    PeerLeft,
    ChatReceived(ChatEntry),
    ConnectionProblem,
    ConnectionRecovered,
    Ended(EndReason),
}
