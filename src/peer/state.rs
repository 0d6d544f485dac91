use serde::Serialize;

/// Negotiation state of one session
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    #[default]
    Idle,
    AwaitingMedia,
    ReadyToOffer,
    Negotiating,
    Connected,
    Ended,
}

/// Which side of the offer/answer exchange this peer played in the current round
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Inputs that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Session started, local media being acquired
    Start,
    /// Local tracks attached to the connection
    MediaAttached,
    /// Local offer set and sent
    OfferSent,
    /// Remote offer applied and answer sent
    OfferAnswered,
    /// The connection reported a received track
    MediaFlowing,
    /// Leave, peer gone, channel lost or unrecoverable failure
    End,
    /// Fresh connection after the remote peer left
    Reset,
}

impl Transition {
    pub fn name(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::MediaAttached => "media-attached",
            Transition::OfferSent => "offer",
            Transition::OfferAnswered => "answer",
            Transition::MediaFlowing => "track",
            Transition::End => "end",
            Transition::Reset => "reset",
        }
    }
}

impl PeerState {
    /// Transition table. `None` means the input is rejected in this state.
    pub fn next(self, input: Transition) -> Option<PeerState> {
        use PeerState::*;
        use Transition::*;
        match (self, input) {
            (_, End) => Some(Ended),
            (Ended, _) => None,
            (_, Reset) => Some(Idle),
            (Idle, Start) => Some(AwaitingMedia),
            (AwaitingMedia, MediaAttached) => Some(ReadyToOffer),
            (ReadyToOffer, OfferSent) => Some(Negotiating),
            (ReadyToOffer | Negotiating, OfferAnswered) => Some(Negotiating),
            (Negotiating | Connected, MediaFlowing) => Some(Connected),
            _ => None,
        }
    }

    pub fn is_ended(self) -> bool {
        self == PeerState::Ended
    }
}
