//! Relay link: a room-keyed bidirectional message bus
//!
//! A [`SignalingChannel`] carries [`SignalMessage`]s to the relay. Inbound
//! traffic arrives on the [`ChannelEvents`] receiver handed out when the
//! channel is connected, and is fanned out by a [`SignalRouter`].

pub mod memory;
pub mod message;
pub mod router;
pub mod websocket;

pub use memory::{MemoryChannel, MemoryRelay};
pub use message::{CandidatePayload, DescriptionPayload, JoinPayload, SignalEvent, SignalMessage};
pub use router::SignalRouter;
pub use websocket::WsSignaling;

use crate::error::Result;
use crate::peer::types::RoomId;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// What a channel delivers inbound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(SignalMessage),
    /// The relay link is gone; nothing more will arrive
    Disconnected,
}

pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

/// Link to the relay. One room membership at a time.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Joins `room`. Joining the current room again is a no-op; joining a
    /// different one fails with [`crate::Error::AlreadyJoined`].
    async fn join(&self, room: &RoomId) -> Result<()>;

    /// Sends one message. Fails with [`crate::Error::SignalingDisconnected`] once the link is down.
    async fn send(&self, message: SignalMessage) -> Result<()>;

    /// Closes the link. Safe to call more than once.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn room(&self) -> Option<RoomId>;
}
