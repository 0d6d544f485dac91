use crate::error::{Error, Result};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::media::TrackHandle;
use crate::peer::types::{IceCandidate, RemoteKind, RemoteTrack, SenderId, ServerConfig, SdpKind, SessionDescription};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Transport-level connection state reported by the underlying connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEventKind {
    /// A locally gathered candidate, to be trickled to the remote peer
    IceCandidate(IceCandidate),
    /// End of local candidates
    GatheringComplete,
    /// Media from the remote peer started arriving
    Track(RemoteTrack),
    TransportState(TransportState),
}

/// Event raised by a connection, tagged with the generation it was created for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub generation: u64,
    pub kind: PeerEventKind,
}

pub type PeerEventHandler = Arc<dyn Fn(PeerEvent) + Send + Sync>;

/// The negotiation engine capability driven by the controller
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Discards an outstanding local offer
    async fn rollback(&self) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn add_track(&self, track: &TrackHandle) -> Result<SenderId>;

    /// Swaps the track on an existing sender without renegotiating
    async fn replace_track(&self, sender: SenderId, track: &TrackHandle) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates connections; called once per connection generation
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, generation: u64, events: PeerEventHandler) -> Result<Arc<dyn PeerConnection>>;
}

/// Connector backed by webrtc-rs
pub struct RtcConnector {
    ice_servers: Vec<ServerConfig>,
}

impl RtcConnector {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn connect(&self, generation: u64, events: PeerEventHandler) -> Result<Arc<dyn PeerConnection>> {
        let pc: Arc<dyn PeerConnection> =
            Arc::new(RtcPeerConnection::new(&self.ice_servers, generation, events).await?);
        Ok(pc)
    }
}

/// Creates the configuration for a peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(rtc)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(Error::NegotiationFailure(format!(
            "unexpected description type {other}"
        ))),
    }
}

fn transport_state(st: RTCPeerConnectionState) -> TransportState {
    match st {
        RTCPeerConnectionState::Connecting => TransportState::Connecting,
        RTCPeerConnectionState::Connected => TransportState::Connected,
        RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
        RTCPeerConnectionState::Failed => TransportState::Failed,
        RTCPeerConnectionState::Closed => TransportState::Closed,
        _ => TransportState::New,
    }
}

pub struct RtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
}

impl RtcPeerConnection {
    pub async fn new(servers: &[ServerConfig], generation: u64, events: PeerEventHandler) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(servers)).await?);
        info!("Created peer connection, generation {}", generation);

        let on_candidate = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let kind = match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        };
                        dump_candidate("LOCAL", &candidate);
                        Some(PeerEventKind::IceCandidate(candidate))
                    }
                    Err(e) => {
                        warn!("Failed to serialize local candidate: {}", e);
                        None
                    }
                },
                // None means gathering is over
                None => Some(PeerEventKind::GatheringComplete),
            };
            if let Some(kind) = kind {
                on_candidate(PeerEvent { generation, kind });
            }
            Box::pin(async {})
        }));

        let on_track = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => RemoteKind::Audio,
                    _ => RemoteKind::Video,
                };
                let remote = RemoteTrack {
                    id: track.id(),
                    kind,
                };
                debug!("Remote track arrived: {:?}", remote);
                on_track(PeerEvent {
                    generation,
                    kind: PeerEventKind::Track(remote),
                });
                Box::pin(async {})
            },
        ));

        let on_state = events;
        let pc_stats = Arc::downgrade(&pc);
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!("Peer connection state changed to: {:?}", st);
            if matches!(
                st,
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
            ) {
                if let Some(pc) = pc_stats.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                    });
                }
            }
            on_state(PeerEvent {
                generation,
                kind: PeerEventKind::TransportState(transport_state(st)),
            });
            Box::pin(async {})
        }));

        Ok(Self {
            pc,
            senders: Mutex::new(Vec::new()),
        })
    }

    async fn sender(&self, id: SenderId) -> Result<Arc<RTCRtpSender>> {
        self.senders
            .lock()
            .await
            .get(id.0)
            .cloned()
            .ok_or_else(|| Error::NegotiationFailure(format!("no sender {}", id.0)))
    }
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut rollback = RTCSessionDescription::default();
        rollback.sdp_type = RTCSdpType::Rollback;
        self.pc.set_local_description(rollback).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        dump_candidate("REMOTE", &candidate);
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn add_track(&self, track: &TrackHandle) -> Result<SenderId> {
        let sender = self.pc.add_track(track.local()).await?;
        let mut senders = self.senders.lock().await;
        senders.push(sender);
        debug!("Added {:?} track {}", track.kind(), track.id());
        Ok(SenderId(senders.len() - 1))
    }

    async fn replace_track(&self, sender: SenderId, track: &TrackHandle) -> Result<()> {
        let sender = self.sender(sender).await?;
        sender.replace_track(Some(track.local())).await?;
        debug!("Sender now carries {:?} track {}", track.kind(), track.id());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}
