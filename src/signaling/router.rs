use super::{ChannelEvent, ChannelEvents, SignalEvent, SignalMessage};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::debug;

type Handler = Box<dyn Fn(SignalMessage) + Send + Sync>;
type DisconnectHandler = Box<dyn Fn() + Send + Sync>;

/// Handler map keyed by event name.
///
/// Messages are dispatched one at a time in arrival order, so per-event
/// ordering from the channel is kept.
#[derive(Default)]
pub struct SignalRouter {
    handlers: HashMap<SignalEvent, Handler>,
    on_disconnect: Option<DisconnectHandler>,
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `event`, replacing any previous one.
    pub fn on<F>(mut self, event: SignalEvent, handler: F) -> Self
    where
        F: Fn(SignalMessage) + Send + Sync + 'static,
    {
        self.handlers.insert(event, Box::new(handler));
        self
    }

    pub fn on_disconnect<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Box::new(handler));
        self
    }

    /// Dispatches one channel event. Returns `false` once the channel is gone.
    pub fn dispatch(&self, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Message(msg) => {
                let name = msg.event();
                match self.handlers.get(&name) {
                    Some(handler) => handler(msg),
                    None => debug!("No handler for signaling event {}", name),
                }
                true
            }
            ChannelEvent::Disconnected => {
                if let Some(handler) = &self.on_disconnect {
                    handler();
                }
                false
            }
        }
    }

    /// Drives the router from `events` until the channel disconnects.
    pub fn spawn(self, mut events: ChannelEvents) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !self.dispatch(event) {
                    break;
                }
            }
            debug!("Signal router terminated");
        })
    }
}
