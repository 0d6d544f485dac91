//! WebSocket relay link: JSON text frames, one message per frame

use super::{ChannelEvent, ChannelEvents, JoinPayload, SignalMessage, SignalingChannel};
use crate::error::{Error, Result};
use crate::peer::types::RoomId;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct WsSignaling {
    url: String,

    /// Outgoing frames, drained by the sender task
    tx: mpsc::UnboundedSender<Message>,

    connected: Arc<AtomicBool>,

    room: Mutex<Option<RoomId>>,

    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl WsSignaling {
    /// Connects to the relay at `url` (ws:// or wss://).
    pub async fn connect(url: &str) -> Result<(Arc<Self>, ChannelEvents)> {
        info!("Connecting to signaling server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::sender_task(write, rx));
        let receiver = tokio::spawn(Self::receiver_task(read, events_tx, connected.clone()));

        let channel = Arc::new(Self {
            url: url.to_string(),
            tx,
            connected,
            room: Mutex::new(None),
            receiver: Mutex::new(Some(receiver)),
        });
        Ok((channel, events_rx))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn sender_task(
        mut write: SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }

        debug!("Sender task terminated");
    }

    async fn receiver_task(
        mut read: SplitStream<WsStream>,
        events: mpsc::UnboundedSender<ChannelEvent>,
        connected: Arc<AtomicBool>,
    ) {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match SignalMessage::from_json(&text) {
                    Ok(msg) => {
                        debug!("Received signaling message: {}", msg.event());
                        if events.send(ChannelEvent::Message(msg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to parse signaling message: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        connected.store(false, Ordering::SeqCst);
        let _ = events.send(ChannelEvent::Disconnected);
        debug!("Receiver task terminated");
    }

    fn push(&self, msg: Message) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::SignalingDisconnected);
        }
        self.tx.send(msg).map_err(|_| Error::SignalingDisconnected)
    }
}

#[async_trait]
impl SignalingChannel for WsSignaling {
    async fn join(&self, room: &RoomId) -> Result<()> {
        {
            let mut current = self.room.lock().unwrap_or_else(PoisonError::into_inner);
            match current.as_ref() {
                Some(joined) if joined == room => return Ok(()),
                Some(joined) => return Err(Error::AlreadyJoined(joined.clone())),
                None => *current = Some(room.clone()),
            }
        }
        info!("Joining room {}", room);
        let msg = SignalMessage::Join(JoinPayload {
            room_id: room.clone(),
        });
        self.push(Message::Text(msg.to_json()?))
    }

    async fn send(&self, message: SignalMessage) -> Result<()> {
        debug!("Sending signaling message: {}", message.event());
        self.push(Message::Text(message.to_json()?))
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Disconnecting from signaling server {}", self.url);
            let _ = self.tx.send(Message::Close(None));
        }
        if let Some(handle) = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
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
