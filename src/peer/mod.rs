pub mod connection;
pub mod ice;
pub mod negotiation;
pub mod state;
pub mod types;

pub use connection::{
    PeerConnection, PeerConnector, PeerEvent, PeerEventHandler, PeerEventKind, RtcConnector,
    RtcPeerConnection, TransportState,
};
pub use ice::{CandidateQueue, CandidateSummary};
pub use negotiation::NegotiationController;
pub use state::{PeerState, Role, Transition};
pub use types::{IceCandidate, RemoteKind, RemoteTrack, RoomId, SdpKind, SenderId, ServerConfig, SessionDescription};
