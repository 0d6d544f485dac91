use crate::chat::ChatMessage;
use crate::peer::types::{IceCandidate, RoomId, SessionDescription};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub room_id: RoomId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionPayload {
    pub description: SessionDescription,
    pub room_id: RoomId,
    /// Only set on offers; settles simultaneous offers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiebreak: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub candidate: IceCandidate,
    pub room_id: RoomId,
}

/// Every message carried over the relay, encoded as `{"event": ..., "data": ...}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum SignalMessage {
    #[serde(rename = "join")]
    Join(JoinPayload),
    /// Offer path
    #[serde(rename = "localDescription")]
    LocalDescription(DescriptionPayload),
    /// Answer path
    #[serde(rename = "remoteDescription")]
    RemoteDescription(DescriptionPayload),
    #[serde(rename = "iceCandidate")]
    IceCandidate(CandidatePayload),
    #[serde(rename = "iceCandidateReply")]
    IceCandidateReply(CandidatePayload),
    #[serde(rename = "chat-message")]
    ChatMessage(ChatMessage),
    #[serde(rename = "peer-left")]
    PeerLeft,
}

impl SignalMessage {
    pub fn event(&self) -> SignalEvent {
        match self {
            SignalMessage::Join(_) => SignalEvent::Join,
            SignalMessage::LocalDescription(_) => SignalEvent::LocalDescription,
            SignalMessage::RemoteDescription(_) => SignalEvent::RemoteDescription,
            SignalMessage::IceCandidate(_) => SignalEvent::IceCandidate,
            SignalMessage::IceCandidateReply(_) => SignalEvent::IceCandidateReply,
            SignalMessage::ChatMessage(_) => SignalEvent::ChatMessage,
            SignalMessage::PeerLeft => SignalEvent::PeerLeft,
        }
    }

    /// Room the message is scoped to. `peer-left` is scoped by the relay itself.
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            SignalMessage::Join(p) => Some(&p.room_id),
            SignalMessage::LocalDescription(p) | SignalMessage::RemoteDescription(p) => {
                Some(&p.room_id)
            }
            SignalMessage::IceCandidate(p) | SignalMessage::IceCandidateReply(p) => {
                Some(&p.room_id)
            }
            SignalMessage::ChatMessage(m) => Some(&m.room_id),
            SignalMessage::PeerLeft => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Event names, the keys of a [`super::SignalRouter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalEvent {
    Join,
    LocalDescription,
    RemoteDescription,
    IceCandidate,
    IceCandidateReply,
    ChatMessage,
    PeerLeft,
}

impl SignalEvent {
    pub const ALL: [SignalEvent; 7] = [
        SignalEvent::Join,
        SignalEvent::LocalDescription,
        SignalEvent::RemoteDescription,
        SignalEvent::IceCandidate,
        SignalEvent::IceCandidateReply,
        SignalEvent::ChatMessage,
        SignalEvent::PeerLeft,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignalEvent::Join => "join",
            SignalEvent::LocalDescription => "localDescription",
            SignalEvent::RemoteDescription => "remoteDescription",
            SignalEvent::IceCandidate => "iceCandidate",
            SignalEvent::IceCandidateReply => "iceCandidateReply",
            SignalEvent::ChatMessage => "chat-message",
            SignalEvent::PeerLeft => "peer-left",
        }
    }
}

impl fmt::Display for SignalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_wire_shape() {
        let msg = SignalMessage::LocalDescription(DescriptionPayload {
            description: SessionDescription::offer("v=0"),
            room_id: "R1".into(),
            tiebreak: Some(7),
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "localDescription",
                "data": {
                    "description": {"type": "offer", "sdp": "v=0"},
                    "roomId": "R1",
                    "tiebreak": 7
                }
            })
        );
    }

    #[test]
    fn browser_candidate_parses() {
        let text = r#"{"event":"iceCandidateReply","data":{"candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 9 typ host","sdpMid":"0","sdpMLineIndex":0},"roomId":"R1"}}"#;
        let msg = SignalMessage::from_json(text).unwrap();
        match msg {
            SignalMessage::IceCandidateReply(p) => {
                assert_eq!(p.candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(p.candidate.sdp_mline_index, Some(0));
                assert_eq!(p.room_id.as_str(), "R1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn peer_left_has_no_payload() {
        let msg = SignalMessage::from_json(r#"{"event":"peer-left"}"#).unwrap();
        assert_eq!(msg, SignalMessage::PeerLeft);
        assert_eq!(msg.room_id(), None);
        assert_eq!(msg.event().as_str(), "peer-left");
    }

    #[test]
    fn chat_message_keeps_room_and_author() {
        let text = r#"{"event":"chat-message","data":{"text":"hi","roomId":"R1","author":"Me"}}"#;
        let msg = SignalMessage::from_json(text).unwrap();
        assert_eq!(msg.event(), SignalEvent::ChatMessage);
        assert_eq!(msg.room_id().map(RoomId::as_str), Some("R1"));
    }

    #[test]
    fn event_names_round_trip_through_the_enum() {
        let names: Vec<_> = SignalEvent::ALL.iter().map(|e| e.as_str()).collect();
        assert_eq!(
            names,
            [
                "join",
                "localDescription",
                "remoteDescription",
                "iceCandidate",
                "iceCandidateReply",
                "chat-message",
                "peer-left"
            ]
        );
    }
}
