//! In-process bus for tests and local demos.
//!
//! Behaves like the relay the clients expect: messages are forwarded to the
//! other members of the sender's room in send order, and a member that goes
//! away produces `peer-left` for the rest of the room.

use super::{ChannelEvent, ChannelEvents, SignalMessage, SignalingChannel};
use crate::error::{Error, Result};
use crate::peer::types::RoomId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct Member {
    room: Option<RoomId>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    connected: Arc<AtomicBool>,
}

#[derive(Default)]
struct RelayState {
    next_id: u64,
    members: HashMap<u64, Member>,
}

#[derive(Default)]
pub struct MemoryRelay {
    state: Mutex<RelayState>,
}

impl MemoryRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(self: &Arc<Self>) -> (Arc<MemoryChannel>, ChannelEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.members.insert(
                id,
                Member {
                    room: None,
                    events: events_tx,
                    connected: connected.clone(),
                },
            );
            id
        };
        debug!("Memory relay client {} connected", id);
        let channel = Arc::new(MemoryChannel {
            id,
            relay: self.clone(),
            connected,
            room: Mutex::new(None),
        });
        (channel, events_rx)
    }

    /// Number of connected members in `room`
    pub fn members(&self, room: &RoomId) -> usize {
        self.lock()
            .members
            .values()
            .filter(|m| m.room.as_ref() == Some(room))
            .count()
    }

    /// Drops the relay side of `channel` as if the link had failed.
    pub fn sever(&self, channel: &MemoryChannel) {
        if let Some(member) = self.remove(channel.id) {
            let _ = member.events.send(ChannelEvent::Disconnected);
        }
    }

    fn join(&self, id: u64, room: &RoomId) -> Result<()> {
        let mut state = self.lock();
        let member = state
            .members
            .get_mut(&id)
            .ok_or(Error::SignalingDisconnected)?;
        member.room = Some(room.clone());
        Ok(())
    }

    fn forward(&self, from: u64, msg: SignalMessage) -> Result<()> {
        let state = self.lock();
        let sender = state
            .members
            .get(&from)
            .ok_or(Error::SignalingDisconnected)?;
        let Some(room) = sender.room.as_ref() else {
            warn!("Client {} sent {} before joining a room", from, msg.event());
            return Ok(());
        };
        if msg.room_id().is_some_and(|r| r != room) {
            warn!("Client {} sent {} for a room it has not joined", from, msg.event());
            return Ok(());
        }
        for (id, member) in state.members.iter() {
            if *id != from && member.room.as_ref() == Some(room) {
                let _ = member.events.send(ChannelEvent::Message(msg.clone()));
            }
        }
        Ok(())
    }

    fn remove(&self, id: u64) -> Option<Member> {
        let mut state = self.lock();
        let member = state.members.remove(&id)?;
        member.connected.store(false, Ordering::SeqCst);
        if let Some(room) = member.room.as_ref() {
            for other in state.members.values() {
                if other.room.as_ref() == Some(room) {
                    let _ = other.events.send(ChannelEvent::Message(SignalMessage::PeerLeft));
                }
            }
        }
        debug!("Memory relay client {} removed", id);
        Some(member)
    }
}

pub struct MemoryChannel {
    id: u64,
    relay: Arc<MemoryRelay>,
    connected: Arc<AtomicBool>,
    room: Mutex<Option<RoomId>>,
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    async fn join(&self, room: &RoomId) -> Result<()> {
        {
            let mut current = self.room.lock().unwrap_or_else(PoisonError::into_inner);
            match current.as_ref() {
                Some(joined) if joined == room => return Ok(()),
                Some(joined) => return Err(Error::AlreadyJoined(joined.clone())),
                None => *current = Some(room.clone()),
            }
        }
        self.relay.join(self.id, room)
    }

    async fn send(&self, message: SignalMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::SignalingDisconnected);
        }
        self.relay.forward(self.id, message)
    }

    async fn disconnect(&self) {
        if self.connected.load(Ordering::SeqCst) {
            self.relay.remove(self.id);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn room(&self) -> Option<RoomId> {
        self.room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
