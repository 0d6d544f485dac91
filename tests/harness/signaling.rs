use async_trait::async_trait;
use peermeet::peer::types::RoomId;
use peermeet::signaling::{SignalEvent, SignalMessage, SignalingChannel};
use peermeet::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Channel that keeps everything it is asked to send
pub struct RecordingSignaling {
    sent: Mutex<Vec<SignalMessage>>,
    connected: AtomicBool,
    room: Mutex<Option<RoomId>>,
}

impl RecordingSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            room: Mutex::new(None),
        })
    }

    pub fn sent(&self) -> Vec<SignalMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<SignalEvent> {
        self.sent().iter().map(|m| m.event()).collect()
    }

    pub fn count(&self, event: SignalEvent) -> usize {
        self.events().into_iter().filter(|e| *e == event).count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl SignalingChannel for RecordingSignaling {
    async fn join(&self, room: &RoomId) -> Result<()> {
        *self.room.lock().unwrap() = Some(room.clone());
        Ok(())
    }

    async fn send(&self, message: SignalMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::SignalingDisconnected);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn room(&self) -> Option<RoomId> {
        self.room.lock().unwrap().clone()
    }
}
