use super::command::{Command, Reply};
use super::handle::SessionHandle;
use super::{EndReason, SessionNotice, SessionSnapshot};
use crate::chat::ChatChannel;
use crate::config::{PeerLeftPolicy, SessionConfig};
use crate::error::{Error, MediaError, Result};
use crate::media::{MediaSource, MediaStreamHandle, TrackHandle};
use crate::peer::connection::{PeerConnector, PeerEvent, PeerEventHandler, PeerEventKind, TransportState};
use crate::peer::negotiation::NegotiationController;
use crate::peer::state::PeerState;
use crate::peer::types::RoomId;
use crate::signaling::{ChannelEvents, SignalEvent, SignalMessage, SignalRouter, SignalingChannel};
use crate::utils::new_tiebreak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

type MediaResult = std::result::Result<MediaStreamHandle, MediaError>;

/// Collaborators a session drives
pub struct SessionDeps {
    pub media: Arc<dyn MediaSource>,
    pub connector: Arc<dyn PeerConnector>,
    pub signaling: Arc<dyn SignalingChannel>,
    /// Inbound side of `signaling`
    pub signaling_events: ChannelEvents,
    /// Settles colliding offers, higher wins. Random when `None`.
    pub tiebreak: Option<u64>,
}

enum SessionEvent {
    Signal(SignalMessage),
    SignalingLost,
    Peer(PeerEvent),
    MediaReady(MediaResult),
    ScreenReady(MediaResult),
    /// Screen capture stopped outside the session, e.g. permission revoked
    ScreenEnded(String),
    GraceExpired(u64),
}

pub struct SessionCoordinator {
    config: SessionConfig,
    media: Arc<dyn MediaSource>,
    connector: Arc<dyn PeerConnector>,
    signaling: Arc<dyn SignalingChannel>,
    router: JoinHandle<()>,

    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    notices: mpsc::UnboundedSender<SessionNotice>,
    snapshot: watch::Sender<SessionSnapshot>,

    /// Set once teardown starts; late media results release themselves
    cancelled: Arc<AtomicBool>,
    ended: bool,

    tiebreak: u64,
    generation: u64,
    controller: Option<NegotiationController>,
    chat: Option<ChatChannel>,

    local: Option<MediaStreamHandle>,
    media_available: bool,
    muted: bool,
    camera_off: bool,
    screen: Option<TrackHandle>,
    screen_requested: bool,
    pending_screen: Option<Reply<bool>>,

    grace: Option<JoinHandle<()>>,
    grace_epoch: u64,
}

fn end_reason(e: &Error) -> EndReason {
    match e {
        Error::SignalingDisconnected => EndReason::SignalingLost,
        other => EndReason::Failure(other.to_string()),
    }
}

/// Hands a finished acquisition to the session, or releases it if nobody is listening anymore.
fn deliver(
    media: &dyn MediaSource,
    events: &mpsc::UnboundedSender<SessionEvent>,
    cancelled: &AtomicBool,
    event: SessionEvent,
) {
    let undelivered = if cancelled.load(Ordering::SeqCst) {
        Some(event)
    } else {
        events.send(event).err().map(|e| e.0)
    };
    if let Some(SessionEvent::MediaReady(Ok(stream)) | SessionEvent::ScreenReady(Ok(stream))) = undelivered {
        debug!("Session gone, releasing late stream {}", stream.id);
        media.release(&stream);
    }
}

impl SessionCoordinator {
    /// Starts the session task. Nothing happens until [`SessionHandle::join`].
    pub fn spawn(
        config: SessionConfig,
        deps: SessionDeps,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionNotice>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let router = Self::router(events_tx.clone()).spawn(deps.signaling_events);

        let coordinator = Self {
            config,
            media: deps.media,
            connector: deps.connector,
            signaling: deps.signaling,
            router,
            commands: commands_rx,
            events_tx,
            events_rx,
            notices: notices_tx,
            snapshot: snapshot_tx,
            cancelled: Arc::new(AtomicBool::new(false)),
            ended: false,
            tiebreak: deps.tiebreak.unwrap_or_else(new_tiebreak),
            generation: 0,
            controller: None,
            chat: None,
            local: None,
            media_available: false,
            muted: false,
            camera_off: false,
            screen: None,
            screen_requested: false,
            pending_screen: None,
            grace: None,
            grace_epoch: 0,
        };
        tokio::spawn(coordinator.run());

        (SessionHandle::new(commands_tx, snapshot_rx), notices_rx)
    }

    fn router(events: mpsc::UnboundedSender<SessionEvent>) -> SignalRouter {
        let mut router = SignalRouter::new();
        for event in SignalEvent::ALL {
            if event == SignalEvent::Join {
                continue;
            }
            let tx = events.clone();
            router = router.on(event, move |msg| {
                let _ = tx.send(SessionEvent::Signal(msg));
            });
        }
        router.on_disconnect(move || {
            let _ = events.send(SessionEvent::SignalingLost);
        })
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        info!("All session handles dropped");
                        self.teardown(EndReason::Unloaded).await;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
            if self.ended {
                break;
            }
        }
        debug!("Session task finished");
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }

    fn snapshot_now(&self) -> SessionSnapshot {
        let controller = self.controller.as_ref();
        let state = if self.ended {
            PeerState::Ended
        } else {
            controller.map_or(PeerState::Idle, |c| c.state())
        };
        SessionSnapshot {
            room: controller.map(|c| c.room().clone()),
            state,
            role: controller.and_then(|c| c.role()),
            muted: self.muted,
            camera_off: self.camera_off,
            screen_sharing: self.screen_requested,
            remote_tracks: controller.map_or(0, |c| c.remote_tracks().len()),
            rounds: controller.map_or(0, |c| c.rounds()),
            media_available: self.media_available,
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot_now();
        if snapshot.state != self.snapshot.borrow().state {
            self.notify(SessionNotice::StateChanged(snapshot.state));
        }
        self.snapshot.send_replace(snapshot);
    }

    /// Terminal errors end the session; the rest are logged and dropped.
    async fn absorb(&mut self, result: Result<()>) {
        match result {
            Ok(()) => {}
            Err(e) if e.is_terminal() => {
                error!("Session failed: {}", e);
                self.teardown(end_reason(&e)).await;
            }
            Err(e) => warn!("Ignoring event: {}", e),
        }
    }

    async fn settle<T>(&mut self, reply: Reply<T>, result: Result<T>) {
        if let Err(e) = &result {
            if e.is_terminal() {
                error!("Session failed: {}", e);
                self.teardown(end_reason(e)).await;
            }
        }
        self.publish();
        let _ = reply.send(result);
    }

    fn peer_events(&self) -> PeerEventHandler {
        let events = self.events_tx.clone();
        Arc::new(move |event| {
            let _ = events.send(SessionEvent::Peer(event));
        })
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join { room, reply } => {
                let result = self.join(room).await;
                self.settle(reply, result).await;
            }
            Command::ToggleMute(reply) => {
                let result = self.toggle_mute();
                self.settle(reply, result).await;
            }
            Command::ToggleCamera(reply) => {
                let result = self.toggle_camera();
                self.settle(reply, result).await;
            }
            Command::ToggleScreenShare(reply) => self.toggle_screen_share(reply).await,
            Command::SendChat { text, reply } => {
                let result = match self.chat.as_mut() {
                    Some(chat) => Ok(chat.send(&text).await.cloned()),
                    None => Err(Error::NotJoined),
                };
                let _ = reply.send(result);
            }
            Command::ChatLog(reply) => {
                let log = self
                    .chat
                    .as_ref()
                    .map(|chat| chat.log().to_vec())
                    .unwrap_or_default();
                let _ = reply.send(log);
            }
            Command::Offer(reply) => {
                let result = match self.controller.as_mut() {
                    Some(controller) => controller.create_offer().await,
                    None => Err(Error::NotJoined),
                };
                self.settle(reply, result).await;
            }
            Command::Leave(reply) => {
                self.teardown(EndReason::Left).await;
                let _ = reply.send(());
            }
        }
        self.publish();
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Signal(msg) => self.on_signal(msg).await,
            SessionEvent::SignalingLost => {
                warn!("Signaling connection lost");
                self.teardown(EndReason::SignalingLost).await;
            }
            SessionEvent::Peer(event) => self.on_peer_event(event).await,
            SessionEvent::MediaReady(result) => self.on_media(result).await,
            SessionEvent::ScreenReady(result) => self.on_screen(result).await,
            SessionEvent::ScreenEnded(id) => {
                if self.screen.as_ref().is_some_and(|track| track.id() == id) {
                    info!("Screen capture ended by the source");
                    self.stop_screen_share().await;
                    self.notify(SessionNotice::ScreenShareEnded);
                }
            }
            SessionEvent::GraceExpired(epoch) => {
                if epoch == self.grace_epoch && self.grace.take().is_some() {
                    error!("Connection did not recover within the grace period");
                    self.teardown(EndReason::Failure("connection lost".into())).await;
                }
            }
        }
        self.publish();
    }

    async fn join(&mut self, room: RoomId) -> Result<()> {
        if let Some(controller) = &self.controller {
            if *controller.room() == room {
                return Ok(());
            }
            return Err(Error::AlreadyJoined(controller.room().clone()));
        }

        self.signaling.join(&room).await?;
        self.generation += 1;
        let peer = self
            .connector
            .connect(self.generation, self.peer_events())
            .await?;
        let mut controller = NegotiationController::new(
            room.clone(),
            self.signaling.clone(),
            peer,
            self.generation,
            self.tiebreak,
        );
        controller.start()?;
        self.controller = Some(controller);

        let mut chat = ChatChannel::new(
            room.clone(),
            self.signaling.clone(),
            &self.config.local_author,
            &self.config.remote_author,
        );
        let notices = self.notices.clone();
        chat.on_receive(move |entry| {
            let _ = notices.send(SessionNotice::ChatReceived(entry.clone()));
        });
        self.chat = Some(chat);

        info!("Joined room {}", room);
        self.acquire_media();
        Ok(())
    }

    fn acquire_media(&self) {
        let media = self.media.clone();
        let events = self.events_tx.clone();
        let cancelled = self.cancelled.clone();
        let constraints = self.config.constraints;
        tokio::spawn(async move {
            let result = media.acquire(constraints).await;
            deliver(media.as_ref(), &events, &cancelled, SessionEvent::MediaReady(result));
        });
    }

    async fn on_media(&mut self, result: MediaResult) {
        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Local media unavailable: {}", e);
                self.notify(SessionNotice::MediaUnavailable(e.to_string()));
                return;
            }
        };
        let Some(controller) = self.controller.as_mut() else {
            self.media.release(&stream);
            return;
        };
        if controller.state() != PeerState::AwaitingMedia {
            debug!("Local media arrived in state {:?}, releasing", controller.state());
            self.media.release(&stream);
            return;
        }

        let tracks = stream.tracks.clone();
        self.local = Some(stream);
        self.media_available = true;

        if let Err(e) = controller.attach_tracks(&tracks).await {
            self.absorb(Err(e)).await;
            return;
        }
        let result = match controller.take_deferred_offer() {
            Some(offer) => controller.handle_offer(offer).await,
            None if self.config.auto_offer => controller.create_offer().await,
            None => Ok(()),
        };
        self.absorb(result).await;
    }

    async fn on_signal(&mut self, msg: SignalMessage) {
        match msg {
            SignalMessage::ChatMessage(message) => {
                if let Some(chat) = self.chat.as_mut() {
                    chat.receive(message);
                }
            }
            SignalMessage::PeerLeft => self.on_peer_left().await,
            SignalMessage::Join(_) => {}
            msg => {
                let Some(controller) = self.controller.as_mut() else {
                    debug!("Not in a room, dropping {}", msg.event());
                    return;
                };
                let result = controller.handle_signal(msg).await;
                self.absorb(result).await;
            }
        }
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        let Some(controller) = self.controller.as_mut() else {
            return;
        };
        let current = event.generation == controller.generation();
        match event.kind {
            PeerEventKind::IceCandidate(candidate) => {
                let result = controller
                    .handle_local_candidate(event.generation, candidate)
                    .await;
                self.absorb(result).await;
            }
            PeerEventKind::GatheringComplete => {
                if let Some(summary) = controller.gathering_complete(event.generation) {
                    debug!("Candidate gathering complete: {:?}", summary);
                }
            }
            PeerEventKind::Track(track) => {
                match controller.handle_track(event.generation, track.clone()) {
                    Ok(_) if current => self.notify(SessionNotice::RemoteTrack(track)),
                    Ok(_) => {}
                    Err(e) => self.absorb(Err(e)).await,
                }
            }
            PeerEventKind::TransportState(state) if current => self.on_transport(state).await,
            PeerEventKind::TransportState(_) => {}
        }
    }

    async fn on_transport(&mut self, state: TransportState) {
        match state {
            TransportState::Disconnected => {
                if self.grace.is_some() {
                    return;
                }
                let period = self.config.grace_period();
                warn!(
                    "Connection disrupted, waiting {} seconds for it to recover",
                    period.as_secs()
                );
                self.grace_epoch += 1;
                let epoch = self.grace_epoch;
                let events = self.events_tx.clone();
                self.grace = Some(tokio::spawn(async move {
                    sleep(period).await;
                    let _ = events.send(SessionEvent::GraceExpired(epoch));
                }));
                self.notify(SessionNotice::ConnectionProblem);
            }
            TransportState::Connected => {
                if let Some(timer) = self.grace.take() {
                    timer.abort();
                    info!("Connection recovered within the grace period");
                    self.notify(SessionNotice::ConnectionRecovered);
                }
            }
            TransportState::Failed => {
                error!("Peer connection failed");
                self.teardown(EndReason::Failure("peer connection failed".into()))
                    .await;
            }
            _ => {}
        }
    }

    fn cancel_grace(&mut self) {
        if let Some(timer) = self.grace.take() {
            timer.abort();
        }
    }

    async fn on_peer_left(&mut self) {
        if self.controller.is_none() {
            return;
        }
        info!("Remote peer left the room");
        self.notify(SessionNotice::PeerLeft);
        self.cancel_grace();
        match self.config.peer_left {
            PeerLeftPolicy::End => self.teardown(EndReason::PeerLeft).await,
            PeerLeftPolicy::Rearm => {
                let result = self.rearm().await;
                self.absorb(result).await;
            }
        }
    }

    /// Fresh connection for the next peer, local media kept.
    async fn rearm(&mut self) -> Result<()> {
        if self.screen.is_some() {
            self.stop_screen_share().await;
            self.notify(SessionNotice::ScreenShareEnded);
        }
        self.generation += 1;
        let peer = self
            .connector
            .connect(self.generation, self.peer_events())
            .await?;
        let Some(controller) = self.controller.as_mut() else {
            return Ok(());
        };
        controller.reset(peer, self.generation).await?;
        controller.start()?;
        if let Some(stream) = &self.local {
            controller.attach_tracks(&stream.tracks).await?;
        }
        info!("Waiting for a peer in room {}", controller.room());
        Ok(())
    }

    fn toggle_mute(&mut self) -> Result<bool> {
        if self.controller.is_none() {
            return Err(Error::NotJoined);
        }
        // mute keeps the track attached; only the enabled flag changes
        if let Some(audio) = self.local.as_ref().and_then(|s| s.audio()) {
            self.muted = !audio.toggle_enabled();
        }
        Ok(self.muted)
    }

    fn toggle_camera(&mut self) -> Result<bool> {
        if self.controller.is_none() {
            return Err(Error::NotJoined);
        }
        if let Some(camera) = self.local.as_ref().and_then(|s| s.video()) {
            self.camera_off = !camera.toggle_enabled();
        }
        Ok(self.camera_off)
    }

    async fn toggle_screen_share(&mut self, reply: Reply<bool>) {
        if self.pending_screen.is_some() {
            let _ = reply.send(Err(Error::ToggleInProgress));
            return;
        }
        let Some(controller) = self.controller.as_ref() else {
            let _ = reply.send(Err(Error::NotJoined));
            return;
        };
        if self.screen.is_some() {
            self.stop_screen_share().await;
            self.notify(SessionNotice::ScreenShareEnded);
            self.publish();
            let _ = reply.send(Ok(false));
            return;
        }
        if !controller.has_video_sender() {
            debug!("No outbound video sender, ignoring screen share");
            let _ = reply.send(Ok(false));
            return;
        }

        self.screen_requested = true;
        self.pending_screen = Some(reply);

        let media = self.media.clone();
        let events = self.events_tx.clone();
        let cancelled = self.cancelled.clone();
        tokio::spawn(async move {
            let result = media.acquire_screen().await;
            deliver(media.as_ref(), &events, &cancelled, SessionEvent::ScreenReady(result));
        });
    }

    async fn on_screen(&mut self, result: MediaResult) {
        let reply = self.pending_screen.take();
        let outcome = self.start_screen_share(result).await;
        match &outcome {
            Ok(()) => self.notify(SessionNotice::ScreenShareStarted),
            Err(e) => {
                warn!("Screen share failed: {}", e);
                self.screen_requested = false;
                self.notify(SessionNotice::ScreenShareFailed(e.to_string()));
            }
        }
        self.publish();
        if let Some(reply) = reply {
            let _ = reply.send(outcome.map(|()| true));
        }
    }

    async fn start_screen_share(&mut self, result: MediaResult) -> Result<()> {
        let stream = result?;
        let Some(track) = stream.video().cloned() else {
            self.media.release(&stream);
            return Err(Error::MediaAccess("screen capture has no video track".into()));
        };
        let replaced = match self.controller.as_ref() {
            Some(controller) => controller.replace_video_track(&track).await,
            None => Err(Error::NotJoined),
        };
        match replaced {
            Ok(true) => {}
            Ok(false) => {
                self.media.release(&stream);
                return Err(Error::MediaAccess("no outbound video sender".into()));
            }
            Err(e) => {
                self.media.release(&stream);
                return Err(e);
            }
        }

        let watched = track.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            watched.ended().await;
            let _ = events.send(SessionEvent::ScreenEnded(watched.id().to_string()));
        });
        info!("Screen share started with track {}", track.id());
        self.screen = Some(track);
        Ok(())
    }

    /// Puts the camera back on the video sender and stops the screen track.
    async fn stop_screen_share(&mut self) {
        let Some(screen) = self.screen.take() else {
            return;
        };
        let camera = self.local.as_ref().and_then(|s| s.video()).cloned();
        if let (Some(camera), Some(controller)) = (camera, self.controller.as_ref()) {
            if let Err(e) = controller.replace_video_track(&camera).await {
                warn!("Failed to restore camera track: {}", e);
            }
        }
        screen.stop();
        self.screen_requested = false;
        info!("Screen share stopped");
    }

    /// Releases everything the session owns. Runs once; later calls return immediately.
    async fn teardown(&mut self, reason: EndReason) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.cancelled.store(true, Ordering::SeqCst);
        info!("Ending session: {}", reason);

        self.events_rx.close();
        while let Ok(event) = self.events_rx.try_recv() {
            if let SessionEvent::MediaReady(Ok(stream)) | SessionEvent::ScreenReady(Ok(stream)) = event {
                self.media.release(&stream);
            }
        }
        if let Some(reply) = self.pending_screen.take() {
            let _ = reply.send(Err(Error::SessionEnded));
        }
        self.cancel_grace();

        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        self.screen_requested = false;
        if let Some(stream) = self.local.take() {
            self.media.release(&stream);
        }
        if let Some(controller) = self.controller.as_mut() {
            controller.close().await;
        }
        self.signaling.disconnect().await;
        self.router.abort();

        self.publish();
        self.notify(SessionNotice::Ended(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StaticMediaSource;

    struct NullConnector;

    #[async_trait::async_trait]
    impl PeerConnector for NullConnector {
        async fn connect(
            &self,
            _generation: u64,
            _events: PeerEventHandler,
        ) -> Result<Arc<dyn crate::peer::PeerConnection>> {
            Err(Error::NegotiationFailure("no connections in this test".into()))
        }
    }

    #[test]
    fn end_reason_for_errors() {
        assert_eq!(end_reason(&Error::SignalingDisconnected), EndReason::SignalingLost);
        assert!(matches!(
            end_reason(&Error::NegotiationFailure("x".into())),
            EndReason::Failure(_)
        ));
    }

    #[tokio::test]
    async fn late_stream_is_released_once_cancelled() {
        let media = StaticMediaSource::default();
        let (events, _rx) = mpsc::unbounded_channel();
        let cancelled = AtomicBool::new(true);
        let stream = media.acquire_screen().await.unwrap();
        deliver(&media, &events, &cancelled, SessionEvent::ScreenReady(Ok(stream.clone())));
        assert!(stream.tracks.iter().all(|t| t.is_stopped()));
    }

    #[tokio::test]
    async fn failed_connect_on_join_ends_session() {
        let relay = crate::signaling::MemoryRelay::new();
        let (channel, events) = relay.connect();
        let (handle, mut notices) = SessionCoordinator::spawn(
            SessionConfig::default(),
            SessionDeps {
                media: Arc::new(StaticMediaSource::default()),
                connector: Arc::new(NullConnector),
                signaling: channel.clone(),
                signaling_events: events,
                tiebreak: None,
            },
        );

        let err = handle.join("R1".into()).await.unwrap_err();
        assert!(matches!(err, Error::NegotiationFailure(_)));
        assert!(handle.is_ended());
        assert!(!channel.is_connected());

        let mut saw_end = false;
        while let Some(notice) = notices.recv().await {
            if matches!(notice, SessionNotice::Ended(EndReason::Failure(_))) {
                saw_end = true;
            }
        }
        assert!(saw_end);
        assert!(matches!(handle.toggle_mute().await, Err(Error::SessionEnded)));
        handle.leave().await.unwrap();
    }
}

