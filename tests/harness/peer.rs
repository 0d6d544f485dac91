//! Scripted peer connection
//!
//! Behaves like a strict connection: answers need a remote description,
//! candidates are refused until the remote description is set. The first
//! local description surfaces one host candidate with an address unique to
//! this connection; later descriptions gather nothing, as with a real ICE
//! agent. Once both descriptions are set a remote video track is reported
//! (unless built silent).

use async_trait::async_trait;
use peermeet::media::TrackHandle;
use peermeet::peer::connection::{PeerConnection, PeerConnector, PeerEvent, PeerEventHandler, PeerEventKind};
use peermeet::peer::types::{IceCandidate, RemoteKind, RemoteTrack, SdpKind, SenderId, SessionDescription};
use peermeet::{Error, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static NEXT_HOST: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    Rollback,
    AddCandidate(String),
    AddTrack(String),
    ReplaceTrack(SenderId, String),
    Close,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<PeerCall>,
    local_set: bool,
    remote_set: bool,
    senders: Vec<TrackHandle>,
    closed: bool,
    track_fired: bool,
    gathered: Vec<String>,
    reject_remote: bool,
}

pub struct FakePeer {
    generation: u64,
    host: u32,
    events: PeerEventHandler,
    auto_track: bool,
    state: Mutex<FakeState>,
}

impl FakePeer {
    pub fn new(generation: u64, events: PeerEventHandler, auto_track: bool) -> Self {
        Self {
            generation,
            host: NEXT_HOST.fetch_add(1, Ordering::SeqCst),
            events,
            auto_track,
            state: Mutex::new(FakeState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Raises an event as if the connection had produced it.
    pub fn emit(&self, kind: PeerEventKind) {
        (self.events)(PeerEvent {
            generation: self.generation,
            kind,
        });
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&PeerCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Descriptions created, i.e. negotiation rounds this connection took part in
    pub fn descriptions_created(&self) -> usize {
        self.count(|c| matches!(c, PeerCall::CreateOffer | PeerCall::CreateAnswer))
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                PeerCall::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// Candidates this connection surfaced locally
    pub fn gathered_candidates(&self) -> Vec<String> {
        self.lock().gathered.clone()
    }

    pub fn senders(&self) -> Vec<TrackHandle> {
        self.lock().senders.clone()
    }

    pub fn video_sender(&self) -> Option<TrackHandle> {
        self.lock()
            .senders
            .iter()
            .find(|t| t.kind().is_video())
            .cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn reject_remote_descriptions(&self) {
        self.lock().reject_remote = true;
    }

    fn after_description(&self, gathered: Option<String>) {
        if let Some(candidate) = gathered {
            self.emit(PeerEventKind::IceCandidate(IceCandidate {
                candidate,
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            }));
        }

        let fire = {
            let mut st = self.lock();
            let ready = self.auto_track && st.local_set && st.remote_set && !st.track_fired;
            if ready {
                st.track_fired = true;
            }
            ready
        };
        if fire {
            self.emit(PeerEventKind::Track(RemoteTrack {
                id: format!("remote-video-{}", self.generation),
                kind: RemoteKind::Video,
            }));
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut st = self.lock();
        if st.closed {
            return Err(Error::NegotiationFailure("connection closed".into()));
        }
        st.calls.push(PeerCall::CreateOffer);
        Ok(SessionDescription::offer(format!("v=0 offer gen {}", self.generation)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut st = self.lock();
        if !st.remote_set {
            return Err(Error::NegotiationFailure("no remote offer".into()));
        }
        st.calls.push(PeerCall::CreateAnswer);
        Ok(SessionDescription::answer(format!("v=0 answer gen {}", self.generation)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let gathered = {
            let mut st = self.lock();
            st.calls.push(PeerCall::SetLocal(desc.kind));
            st.local_set = true;
            if st.gathered.is_empty() {
                let candidate = format!(
                    "candidate:1 1 udp 2130706431 10.{}.{}.1 5000 typ host",
                    self.host, self.generation
                );
                st.gathered.push(candidate.clone());
                Some(candidate)
            } else {
                None
            }
        };
        self.after_description(gathered);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        {
            let mut st = self.lock();
            if st.reject_remote {
                return Err(Error::NegotiationFailure("remote description rejected".into()));
            }
            st.calls.push(PeerCall::SetRemote(desc.kind));
            st.remote_set = true;
        }
        self.after_description(None);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut st = self.lock();
        st.calls.push(PeerCall::Rollback);
        st.local_set = false;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut st = self.lock();
        if !st.remote_set {
            return Err(Error::NegotiationFailure(
                "candidate applied without a remote description".into(),
            ));
        }
        st.calls.push(PeerCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, track: &TrackHandle) -> Result<SenderId> {
        let mut st = self.lock();
        st.calls.push(PeerCall::AddTrack(track.id().to_string()));
        st.senders.push(track.clone());
        Ok(SenderId(st.senders.len() - 1))
    }

    async fn replace_track(&self, sender: SenderId, track: &TrackHandle) -> Result<()> {
        let mut st = self.lock();
        st.calls
            .push(PeerCall::ReplaceTrack(sender, track.id().to_string()));
        match st.senders.get_mut(sender.0) {
            Some(slot) => {
                *slot = track.clone();
                Ok(())
            }
            None => Err(Error::NegotiationFailure(format!("no sender {}", sender.0))),
        }
    }

    async fn close(&self) -> Result<()> {
        let mut st = self.lock();
        st.calls.push(PeerCall::Close);
        st.closed = true;
        Ok(())
    }
}

/// Hands out [`FakePeer`]s and remembers every one of them
pub struct FakeConnector {
    auto_track: bool,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            auto_track: true,
            peers: Mutex::new(Vec::new()),
        })
    }

    /// Connections that never report a remote track
    pub fn silent() -> Arc<Self> {
        Arc::new(Self {
            auto_track: false,
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Arc<FakePeer> {
        self.peers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connection created yet")
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, generation: u64, events: PeerEventHandler) -> Result<Arc<dyn PeerConnection>> {
        let peer = Arc::new(FakePeer::new(generation, events, self.auto_track));
        self.peers.lock().unwrap().push(peer.clone());
        Ok(peer as Arc<dyn PeerConnection>)
    }
}
