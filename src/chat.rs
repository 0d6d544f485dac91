//! Text chat over the signaling bus

use crate::peer::types::RoomId;
use crate::signaling::{SignalMessage, SignalingChannel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Wire form of one chat line
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub text: String,
    pub room_id: RoomId,
    pub author: String,
}

/// One line of the session's chat log
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub text: String,
    pub author: String,
    pub at: DateTime<Utc>,
}

type ReceiveHandler = Box<dyn Fn(&ChatEntry) + Send + Sync>;

pub struct ChatChannel {
    room: RoomId,
    signaling: Arc<dyn SignalingChannel>,
    local_author: String,
    remote_author: String,
    log: Vec<ChatEntry>,
    on_receive: Option<ReceiveHandler>,
}

impl ChatChannel {
    pub fn new(
        room: RoomId,
        signaling: Arc<dyn SignalingChannel>,
        local_author: impl Into<String>,
        remote_author: impl Into<String>,
    ) -> Self {
        Self {
            room,
            signaling,
            local_author: local_author.into(),
            remote_author: remote_author.into(),
            log: Vec::new(),
            on_receive: None,
        }
    }

    pub fn on_receive<F>(&mut self, handler: F)
    where
        F: Fn(&ChatEntry) + Send + Sync + 'static,
    {
        self.on_receive = Some(Box::new(handler));
    }

    /// Sends `text` to the room and appends it to the local log.
    ///
    /// Blank input is ignored. Messages that cannot be sent are dropped
    /// without an error; `None` is returned in both cases.
    pub async fn send(&mut self, text: &str) -> Option<&ChatEntry> {
        if text.trim().is_empty() {
            return None;
        }
        let msg = ChatMessage {
            text: text.to_string(),
            room_id: self.room.clone(),
            author: self.local_author.clone(),
        };
        if let Err(e) = self.signaling.send(SignalMessage::ChatMessage(msg)).await {
            debug!("Chat message dropped: {}", e);
            return None;
        }
        self.log.push(ChatEntry {
            text: text.to_string(),
            author: self.local_author.clone(),
            at: Utc::now(),
        });
        self.log.last()
    }

    /// Records a message from the remote peer under the remote author label.
    pub fn receive(&mut self, msg: ChatMessage) -> Option<&ChatEntry> {
        if msg.room_id != self.room {
            warn!("Ignoring chat message for room {}", msg.room_id);
            return None;
        }
        let entry = ChatEntry {
            text: msg.text,
            author: self.remote_author.clone(),
            at: Utc::now(),
        };
        if let Some(handler) = &self.on_receive {
            handler(&entry);
        }
        self.log.push(entry);
        self.log.last()
    }

    pub fn log(&self) -> &[ChatEntry] {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{ChannelEvent, MemoryRelay};

    #[tokio::test]
    async fn send_reaches_room_and_logs_locally() {
        let relay = MemoryRelay::new();
        let (a, _a_rx) = relay.connect();
        let (b, mut b_rx) = relay.connect();
        let room = RoomId::from("R1");
        a.join(&room).await.unwrap();
        b.join(&room).await.unwrap();

        let mut chat = ChatChannel::new(room.clone(), a, "Me", "Peer");
        let entry = chat.send("hi").await.unwrap().clone();
        assert_eq!(entry.author, "Me");

        let expected = SignalMessage::ChatMessage(ChatMessage {
            text: "hi".into(),
            room_id: room,
            author: "Me".into(),
        });
        assert_eq!(b_rx.recv().await, Some(ChannelEvent::Message(expected)));
    }

    #[tokio::test]
    async fn blank_and_disconnected_sends_are_silent() {
        let relay = MemoryRelay::new();
        let (a, _rx) = relay.connect();
        let room = RoomId::from("R1");
        a.join(&room).await.unwrap();
        let mut chat = ChatChannel::new(room, a.clone(), "Me", "Peer");

        assert!(chat.send("   ").await.is_none());
        a.disconnect().await;
        assert!(chat.send("lost").await.is_none());
        assert!(chat.log().is_empty());
    }

    #[tokio::test]
    async fn receive_remaps_author() {
        let relay = MemoryRelay::new();
        let (a, _rx) = relay.connect();
        let room = RoomId::from("R1");
        let mut chat = ChatChannel::new(room.clone(), a, "Me", "Peer");
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        chat.on_receive({
            let seen = seen.clone();
            move |e| seen.lock().unwrap().push(e.text.clone())
        });

        let entry = chat
            .receive(ChatMessage {
                text: "hi".into(),
                room_id: room,
                author: "Me".into(),
            })
            .unwrap();
        assert_eq!(entry.author, "Peer");
        assert_eq!(entry.text, "hi");
        assert_eq!(*seen.lock().unwrap(), vec!["hi".to_string()]);

        assert!(chat
            .receive(ChatMessage {
                text: "elsewhere".into(),
                room_id: "R2".into(),
                author: "Me".into(),
            })
            .is_none());
        assert_eq!(chat.log().len(), 1);
    }
}
