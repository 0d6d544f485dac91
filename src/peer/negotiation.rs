//! Offer/answer state machine driving one [`PeerConnection`]
//!
//! Every inbound event is checked against the current [`PeerState`] before
//! anything is applied to the connection. Rejected events come back as
//! [`Error::InvalidTransition`] and leave the controller untouched.

use crate::error::{Error, Result};
use crate::media::TrackHandle;
use crate::peer::connection::PeerConnection;
use crate::peer::ice::{analyze_candidates, CandidateQueue, CandidateSummary};
use crate::peer::state::{PeerState, Role, Transition};
use crate::peer::types::{IceCandidate, RemoteTrack, RoomId, SdpKind, SenderId, SessionDescription};
use crate::signaling::{CandidatePayload, DescriptionPayload, SignalMessage, SignalingChannel};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct NegotiationController {
    room: RoomId,
    signaling: Arc<dyn SignalingChannel>,
    peer: Arc<dyn PeerConnection>,
    /// Bumped for every new connection; events from older ones are stale
    generation: u64,
    tiebreak: u64,
    state: PeerState,
    role: Option<Role>,
    local_set: bool,
    remote_set: bool,
    local_offer: Option<SessionDescription>,
    remote_candidates: CandidateQueue,
    /// Local candidates surfaced before this round's local description was set
    unsent_candidates: Vec<IceCandidate>,
    sent_candidates: Vec<IceCandidate>,
    deferred_offer: Option<DescriptionPayload>,
    audio_sender: Option<SenderId>,
    video_sender: Option<SenderId>,
    remote_tracks: Vec<RemoteTrack>,
    rounds: u64,
}

impl NegotiationController {
    pub fn new(
        room: RoomId,
        signaling: Arc<dyn SignalingChannel>,
        peer: Arc<dyn PeerConnection>,
        generation: u64,
        tiebreak: u64,
    ) -> Self {
        Self {
            room,
            signaling,
            peer,
            generation,
            tiebreak,
            state: PeerState::Idle,
            role: None,
            local_set: false,
            remote_set: false,
            local_offer: None,
            remote_candidates: CandidateQueue::new(),
            unsent_candidates: Vec::new(),
            sent_candidates: Vec::new(),
            deferred_offer: None,
            audio_sender: None,
            video_sender: None,
            remote_tracks: Vec::new(),
            rounds: 0,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Offer/answer rounds created locally since the session started
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn remote_tracks(&self) -> &[RemoteTrack] {
        &self.remote_tracks
    }

    pub fn pending_remote_candidates(&self) -> usize {
        self.remote_candidates.len()
    }

    pub fn local_description_set(&self) -> bool {
        self.local_set
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_set
    }

    pub fn has_video_sender(&self) -> bool {
        self.video_sender.is_some()
    }

    pub fn has_deferred_offer(&self) -> bool {
        self.deferred_offer.is_some()
    }

    fn check(&self, input: Transition) -> Result<PeerState> {
        self.state.next(input).ok_or(Error::InvalidTransition {
            state: self.state,
            event: input.name(),
        })
    }

    fn transition(&mut self, input: Transition) -> Result<()> {
        let next = self.check(input)?;
        if next != self.state {
            info!("Negotiation state {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        Ok(())
    }

    fn invalid(&self, event: &'static str) -> Error {
        Error::InvalidTransition {
            state: self.state,
            event,
        }
    }

    /// Idle -> AwaitingMedia
    pub fn start(&mut self) -> Result<()> {
        self.transition(Transition::Start)
    }

    /// Adds the local tracks to the connection. AwaitingMedia -> ReadyToOffer.
    pub async fn attach_tracks(&mut self, tracks: &[TrackHandle]) -> Result<()> {
        self.check(Transition::MediaAttached)?;
        for track in tracks {
            let sender = self.peer.add_track(track).await?;
            if track.kind().is_video() {
                self.video_sender = Some(sender);
            } else {
                self.audio_sender = Some(sender);
            }
        }
        self.transition(Transition::MediaAttached)
    }

    /// Offer that arrived while local media was still pending
    pub fn take_deferred_offer(&mut self) -> Option<DescriptionPayload> {
        self.deferred_offer.take()
    }

    /// Initiator path. ReadyToOffer -> Negotiating.
    pub async fn create_offer(&mut self) -> Result<()> {
        self.check(Transition::OfferSent)?;

        let offer = self.peer.create_offer().await?;
        self.peer.set_local_description(offer.clone()).await?;
        self.local_set = true;
        self.role = Some(Role::Initiator);
        self.local_offer = Some(offer);
        self.rounds += 1;
        self.transition(Transition::OfferSent)?;

        self.send_local_offer().await?;
        self.flush_unsent_candidates().await
    }

    async fn send_local_offer(&self) -> Result<()> {
        let Some(offer) = self.local_offer.clone() else {
            return Ok(());
        };
        debug!("Sending offer to room {}", self.room);
        self.signaling
            .send(SignalMessage::LocalDescription(DescriptionPayload {
                description: offer,
                room_id: self.room.clone(),
                tiebreak: Some(self.tiebreak),
            }))
            .await
    }

    /// Routes a relay message to the matching handler. Non-negotiation events are ignored.
    pub async fn handle_signal(&mut self, msg: SignalMessage) -> Result<()> {
        if msg.room_id().is_some_and(|r| *r != self.room) {
            debug!("Ignoring {} for another room", msg.event());
            return Ok(());
        }
        match msg {
            SignalMessage::LocalDescription(payload) => self.handle_offer(payload).await,
            SignalMessage::RemoteDescription(payload) => {
                self.handle_answer(payload.description).await
            }
            SignalMessage::IceCandidate(payload) | SignalMessage::IceCandidateReply(payload) => {
                self.handle_remote_candidate(payload.candidate).await
            }
            _ => Ok(()),
        }
    }

    /// Responder path: apply the offer, flush queued candidates, answer.
    pub async fn handle_offer(&mut self, payload: DescriptionPayload) -> Result<()> {
        if self.state.is_ended() {
            debug!("Session ended, dropping offer");
            return Ok(());
        }
        if payload.description.kind != SdpKind::Offer {
            return Err(self.invalid("localDescription"));
        }
        if self.state == PeerState::AwaitingMedia {
            info!("Local media pending, deferring remote offer");
            self.deferred_offer = Some(payload);
            return Ok(());
        }
        self.check(Transition::OfferAnswered)?;
        if self.remote_set {
            return Err(self.invalid("localDescription"));
        }

        if self.role == Some(Role::Initiator) && self.local_set {
            let theirs = payload.tiebreak.unwrap_or(0);
            if self.tiebreak > theirs {
                info!("Offer collision, keeping local offer and re-sending it");
                self.send_local_offer().await?;
                // candidates trickled with the first copy may have been lost too
                for candidate in self.sent_candidates.clone() {
                    self.signaling
                        .send(SignalMessage::IceCandidate(CandidatePayload {
                            candidate,
                            room_id: self.room.clone(),
                        }))
                        .await?;
                }
                return Ok(());
            }
            info!("Offer collision, rolling back local offer");
            self.peer.rollback().await?;
            self.local_set = false;
            self.local_offer = None;
            self.role = None;
            // no new gathering after a rollback; candidates sent with the dropped offer follow the answer
            let mut resend = std::mem::take(&mut self.sent_candidates);
            resend.append(&mut self.unsent_candidates);
            self.unsent_candidates = resend;
        }

        self.peer.set_remote_description(payload.description).await?;
        self.remote_set = true;
        let applied = self.remote_candidates.flush(self.peer.as_ref()).await?;
        if applied > 0 {
            debug!("Applied {} queued remote candidates", applied);
        }

        let answer = self.peer.create_answer().await?;
        self.peer.set_local_description(answer.clone()).await?;
        self.local_set = true;
        self.role = Some(Role::Responder);
        self.rounds += 1;
        self.transition(Transition::OfferAnswered)?;

        debug!("Sending answer to room {}", self.room);
        self.signaling
            .send(SignalMessage::RemoteDescription(DescriptionPayload {
                description: answer,
                room_id: self.room.clone(),
                tiebreak: None,
            }))
            .await?;
        self.flush_unsent_candidates().await
    }

    /// Initiator receives the answer to its offer.
    pub async fn handle_answer(&mut self, description: SessionDescription) -> Result<()> {
        if self.state.is_ended() {
            debug!("Session ended, dropping answer");
            return Ok(());
        }
        let awaiting_answer = self.state == PeerState::Negotiating
            && self.role == Some(Role::Initiator)
            && self.local_set
            && !self.remote_set;
        if description.kind != SdpKind::Answer || !awaiting_answer {
            return Err(self.invalid("remoteDescription"));
        }

        self.peer.set_remote_description(description).await?;
        self.remote_set = true;
        let applied = self.remote_candidates.flush(self.peer.as_ref()).await?;
        if applied > 0 {
            debug!("Applied {} queued remote candidates", applied);
        }
        Ok(())
    }

    /// Applies a remote candidate, or queues it until the remote description is set.
    pub async fn handle_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.state.is_ended() {
            return Ok(());
        }
        if self.remote_set {
            self.peer.add_ice_candidate(candidate).await
        } else {
            self.remote_candidates.push(candidate);
            Ok(())
        }
    }

    /// Trickles a locally gathered candidate to the remote peer.
    pub async fn handle_local_candidate(&mut self, generation: u64, candidate: IceCandidate) -> Result<()> {
        if generation != self.generation {
            debug!("Discarding candidate from stale connection {}", generation);
            return Ok(());
        }
        if self.state.is_ended() {
            return Ok(());
        }
        if !self.local_set {
            self.unsent_candidates.push(candidate);
            return Ok(());
        }
        self.send_candidate(candidate).await
    }

    async fn send_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        let payload = CandidatePayload {
            candidate: candidate.clone(),
            room_id: self.room.clone(),
        };
        let msg = match self.role {
            Some(Role::Responder) => SignalMessage::IceCandidateReply(payload),
            _ => SignalMessage::IceCandidate(payload),
        };
        self.signaling.send(msg).await?;
        self.sent_candidates.push(candidate);
        Ok(())
    }

    async fn flush_unsent_candidates(&mut self) -> Result<()> {
        for candidate in std::mem::take(&mut self.unsent_candidates) {
            self.send_candidate(candidate).await?;
        }
        Ok(())
    }

    /// End of local candidates for `generation`
    pub fn gathering_complete(&self, generation: u64) -> Option<CandidateSummary> {
        if generation != self.generation {
            return None;
        }
        Some(analyze_candidates(&self.sent_candidates))
    }

    /// Media started flowing. Negotiating -> Connected once both descriptions are set.
    ///
    /// Returns `true` when this event completed the connection.
    pub fn handle_track(&mut self, generation: u64, track: RemoteTrack) -> Result<bool> {
        if generation != self.generation || self.state.is_ended() {
            debug!("Ignoring track from stale connection {}", generation);
            return Ok(false);
        }
        if !(self.local_set && self.remote_set) {
            return Err(self.invalid("track"));
        }
        let was_connected = self.state == PeerState::Connected;
        self.transition(Transition::MediaFlowing)?;
        self.remote_tracks.push(track);
        Ok(!was_connected)
    }

    /// Puts `track` on the outbound video sender in place. Returns `false`
    /// when there is no video sender to swap on.
    pub async fn replace_video_track(&self, track: &TrackHandle) -> Result<bool> {
        if self.state.is_ended() {
            return Err(Error::SessionEnded);
        }
        let Some(sender) = self.video_sender else {
            return Ok(false);
        };
        self.peer.replace_track(sender, track).await?;
        Ok(true)
    }

    /// Swaps in a fresh connection after the remote peer left. Any state except Ended -> Idle.
    pub async fn reset(&mut self, peer: Arc<dyn PeerConnection>, generation: u64) -> Result<()> {
        self.check(Transition::Reset)?;
        if let Err(e) = self.peer.close().await {
            warn!("Failed to close previous connection: {}", e);
        }
        self.peer = peer;
        self.generation = generation;
        self.role = None;
        self.local_set = false;
        self.remote_set = false;
        self.local_offer = None;
        self.remote_candidates.clear();
        self.unsent_candidates.clear();
        self.sent_candidates.clear();
        self.deferred_offer = None;
        self.audio_sender = None;
        self.video_sender = None;
        self.remote_tracks.clear();
        self.transition(Transition::Reset)
    }

    /// Closes the connection. Safe to call repeatedly; failures are logged, not returned.
    pub async fn close(&mut self) {
        if self.state.is_ended() {
            return;
        }
        if let Err(e) = self.peer.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
        self.remote_candidates.clear();
        self.unsent_candidates.clear();
        self.deferred_offer = None;
        self.state = PeerState::Ended;
        info!("Negotiation ended for room {}", self.room);
    }
}
