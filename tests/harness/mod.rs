//! Test harness for meeting sessions
//!
//! - [`FakePeer`]/[`FakeConnector`]: scripted connections that record every call
//! - [`RecordingSignaling`]: a channel that keeps what it was asked to send
//! - [`ScriptedMedia`]: capture with scripted failures and a record of issued tracks
//!
//! Two-peer tests run two sessions over a [`MemoryRelay`].

#![allow(dead_code)]

pub mod media;
pub mod peer;
pub mod signaling;

pub use media::ScriptedMedia;
pub use peer::{FakeConnector, FakePeer, PeerCall};
pub use signaling::RecordingSignaling;

use peermeet::config::SessionConfig;
use peermeet::peer::PeerState;
use peermeet::signaling::{MemoryChannel, MemoryRelay};
use peermeet::{SessionCoordinator, SessionDeps, SessionHandle, SessionNotice, SessionSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Long enough for any grace period used in tests; time is paused in those.
pub const WAIT: Duration = Duration::from_secs(60);

pub fn init_logging() {
    peermeet::logger::init("peermeet=debug");
}

/// One meeting participant wired to a shared relay
pub struct Participant {
    pub session: SessionHandle,
    pub notices: mpsc::UnboundedReceiver<SessionNotice>,
    pub connector: Arc<FakeConnector>,
    pub media: Arc<ScriptedMedia>,
    pub channel: Arc<MemoryChannel>,
}

impl Participant {
    pub fn spawn(relay: &Arc<MemoryRelay>, config: SessionConfig, media: ScriptedMedia) -> Self {
        Self::spawn_with(relay, config, media, FakeConnector::new())
    }

    pub fn spawn_with(
        relay: &Arc<MemoryRelay>,
        config: SessionConfig,
        media: ScriptedMedia,
        connector: Arc<FakeConnector>,
    ) -> Self {
        Self::build(relay, config, media, connector, None)
    }

    /// Fixes the offer tiebreak so collisions resolve the same way every run.
    pub fn spawn_with_tiebreak(relay: &Arc<MemoryRelay>, config: SessionConfig, tiebreak: u64) -> Self {
        Self::build(relay, config, ScriptedMedia::new(), FakeConnector::new(), Some(tiebreak))
    }

    fn build(
        relay: &Arc<MemoryRelay>,
        config: SessionConfig,
        media: ScriptedMedia,
        connector: Arc<FakeConnector>,
        tiebreak: Option<u64>,
    ) -> Self {
        init_logging();
        let (channel, events) = relay.connect();
        let media = Arc::new(media);
        let (session, notices) = SessionCoordinator::spawn(
            config,
            SessionDeps {
                media: media.clone(),
                connector: connector.clone(),
                signaling: channel.clone(),
                signaling_events: events,
                tiebreak,
            },
        );
        Self {
            session,
            notices,
            connector,
            media,
            channel,
        }
    }

    pub fn peer(&self) -> Arc<FakePeer> {
        self.connector.latest()
    }

    pub async fn wait_until(&self, pred: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
        let mut rx = self.session.watch();
        let snap = timeout(WAIT, rx.wait_for(pred))
            .await
            .expect("timed out waiting for session state")
            .expect("session dropped");
        snap.clone()
    }

    pub async fn wait_state(&self, state: PeerState) -> SessionSnapshot {
        self.wait_until(|s| s.state == state).await
    }

    /// Skips notices until one matches.
    pub async fn notice(&mut self, pred: impl Fn(&SessionNotice) -> bool) -> SessionNotice {
        timeout(WAIT, async {
            loop {
                match self.notices.recv().await {
                    Some(n) if pred(&n) => return n,
                    Some(_) => continue,
                    None => panic!("notice stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for notice")
    }
}

/// Two participants in `room`, both connected.
pub async fn connected_pair(
    relay: &Arc<MemoryRelay>,
    room: &str,
    config_a: SessionConfig,
    config_b: SessionConfig,
) -> (Participant, Participant) {
    let a = Participant::spawn(relay, config_a, ScriptedMedia::new());
    let b = Participant::spawn(relay, config_b, ScriptedMedia::new());
    a.session.join(room.into()).await.unwrap();
    a.wait_until(|s| s.media_available).await;
    b.session.join(room.into()).await.unwrap();
    a.wait_state(PeerState::Connected).await;
    b.wait_state(PeerState::Connected).await;
    (a, b)
}
