use super::command::{Command, Reply};
use super::SessionSnapshot;
use crate::chat::ChatEntry;
use crate::error::{Error, Result};
use crate::peer::types::RoomId;
use tokio::sync::{mpsc, oneshot, watch};

/// Cheap, cloneable front end of a running session.
///
/// Dropping the last handle tears the session down.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        snapshot: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self { commands, snapshot }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| Error::SessionEnded)?;
        rx.await.map_err(|_| Error::SessionEnded)?
    }

    /// Joins `room` and starts acquiring local media.
    pub async fn join(&self, room: RoomId) -> Result<()> {
        self.request(|reply| Command::Join { room, reply }).await
    }

    /// Returns whether the microphone is now muted.
    pub async fn toggle_mute(&self) -> Result<bool> {
        self.request(Command::ToggleMute).await
    }

    /// Returns whether the camera is now off.
    pub async fn toggle_camera(&self) -> Result<bool> {
        self.request(Command::ToggleCamera).await
    }

    /// Returns whether the screen is now being shared. Starting a share
    /// resolves once screen capture was granted or refused.
    pub async fn toggle_screen_share(&self) -> Result<bool> {
        self.request(Command::ToggleScreenShare).await
    }

    /// `Ok(None)` when the text was blank or could not be delivered.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<Option<ChatEntry>> {
        let text = text.into();
        self.request(|reply| Command::SendChat { text, reply }).await
    }

    pub async fn chat_log(&self) -> Result<Vec<ChatEntry>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::ChatLog(tx))
            .map_err(|_| Error::SessionEnded)?;
        rx.await.map_err(|_| Error::SessionEnded)
    }

    /// Sends an offer now. Only needed when automatic offers are disabled.
    pub async fn offer(&self) -> Result<()> {
        self.request(Command::Offer).await
    }

    /// Ends the session. Leaving a session that is already over succeeds.
    pub async fn leave(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Leave(tx)).is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that sees every published snapshot
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.snapshot.borrow().state.is_ended()
    }
}
