use crate::chat::ChatEntry;
use crate::error::Result;
use crate::peer::types::RoomId;
use tokio::sync::oneshot;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Requests from a [`super::SessionHandle`] to the coordinator task
pub(crate) enum Command {
    Join { room: RoomId, reply: Reply<()> },
    ToggleMute(Reply<bool>),
    ToggleCamera(Reply<bool>),
    ToggleScreenShare(Reply<bool>),
    SendChat { text: String, reply: Reply<Option<ChatEntry>> },
    ChatLog(oneshot::Sender<Vec<ChatEntry>>),
    Offer(Reply<()>),
    Leave(oneshot::Sender<()>),
}
