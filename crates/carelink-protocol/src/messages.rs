use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::types::{Participant, ParticipantRole, SessionSummary};

/// Signaling message type as it appears on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    Leave,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description as exchanged over signaling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescriptionInit {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// ICE candidate as exchanged over signaling
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Untyped message content; paired with a `SignalKind` on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SignalContent {
    Description(SessionDescriptionInit),
    Candidate(IceCandidateInit),
    Empty {},
}

/// Typed signal, produced by validating a `SignalingMessage`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate(IceCandidateInit),
    Leave,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Offer { .. } => SignalKind::Offer,
            Signal::Answer { .. } => SignalKind::Answer,
            Signal::IceCandidate(_) => SignalKind::IceCandidate,
            Signal::Leave => SignalKind::Leave,
        }
    }

    pub fn content(&self) -> SignalContent {
        match self {
            Signal::Offer { sdp } => SignalContent::Description(SessionDescriptionInit {
                sdp_type: SdpType::Offer,
                sdp: sdp.clone(),
            }),
            Signal::Answer { sdp } => SignalContent::Description(SessionDescriptionInit {
                sdp_type: SdpType::Answer,
                sdp: sdp.clone(),
            }),
            Signal::IceCandidate(candidate) => SignalContent::Candidate(candidate.clone()),
            Signal::Leave => SignalContent::Empty {},
        }
    }

    /// Validate that `content` matches `kind`
    pub fn from_parts(kind: SignalKind, content: &SignalContent) -> Result<Self, ProtocolError> {
        match (kind, content) {
            (SignalKind::Offer, SignalContent::Description(desc)) if desc.sdp_type == SdpType::Offer => {
                if desc.sdp.trim().is_empty() {
                    return Err(ProtocolError::EmptyDescription(kind));
                }
                Ok(Signal::Offer { sdp: desc.sdp.clone() })
            }
            (SignalKind::Answer, SignalContent::Description(desc))
                if desc.sdp_type == SdpType::Answer =>
            {
                if desc.sdp.trim().is_empty() {
                    return Err(ProtocolError::EmptyDescription(kind));
                }
                Ok(Signal::Answer { sdp: desc.sdp.clone() })
            }
            (SignalKind::IceCandidate, SignalContent::Candidate(candidate)) => {
                Ok(Signal::IceCandidate(candidate.clone()))
            }
            (SignalKind::Leave, _) => Ok(Signal::Leave),
            _ => Err(ProtocolError::ContentMismatch(kind)),
        }
    }
}

/// Message carried on a per-session realtime channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub sender_id: Uuid,
    /// Present for targeted messages; absent for broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<Uuid>,
    pub content: SignalContent,
}

impl SignalingMessage {
    pub fn new(sender_id: Uuid, recipient_id: Option<Uuid>, signal: &Signal) -> Self {
        Self {
            kind: signal.kind(),
            sender_id,
            recipient_id,
            content: signal.content(),
        }
    }

    pub fn signal(&self) -> Result<Signal, ProtocolError> {
        Signal::from_parts(self.kind, &self.content)
    }

    /// Whether `participant_id` should receive this message
    pub fn is_addressed_to(&self, participant_id: Uuid) -> bool {
        self.recipient_id.is_none_or(|id| id == participant_id)
    }
}

/// Messages sent from client to relay via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a session; must be the first message
    Join {
        session_id: Uuid,
        token: String,
        display_name: String,
        role: ParticipantRole,
        #[serde(default)]
        user_id: Option<Uuid>,
    },

    /// Publish a signaling message to the session channel
    Signal { message: SignalingMessage },

    /// Admit a participant from the waiting room
    Admit { participant_id: Uuid },

    /// End the session for everyone
    EndSession,

    /// Leave the session
    Leave,

    /// Ping to keep connection alive
    Ping,
}

/// Messages sent from relay to client via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join accepted
    Joined {
        participant_id: Uuid,
        session: SessionSummary,
        /// True when the participant was placed in the waiting room
        waiting: bool,
        participants: Vec<Participant>,
    },

    /// Signaling message from another participant
    Signal { message: SignalingMessage },

    /// Another participant joined
    ParticipantJoined { participant: Participant },

    /// Another participant left
    ParticipantLeft { participant_id: Uuid },

    /// A participant was admitted from the waiting room
    Admitted { participant_id: Uuid },

    /// The session was ended by the host
    SessionEnded { session_id: Uuid },

    /// Error message
    Error { message: String },

    /// Pong response to ping
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_shape() {
        let sender = Uuid::new_v4();
        let msg = SignalingMessage::new(sender, None, &Signal::Offer { sdp: "v=0".into() });
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "offer");
        assert_eq!(json["senderId"], sender.to_string());
        assert!(json.get("recipientId").is_none());
        assert_eq!(json["content"]["type"], "offer");
        assert_eq!(json["content"]["sdp"], "v=0");
    }

    #[test]
    fn test_candidate_wire_shape_parses() {
        let raw = r#"{
            "type": "ice-candidate",
            "senderId": "6f1c1a9e-3f54-4b59-9d2c-5f7e0e3c8a11",
            "recipientId": "0b3d5a52-8a9c-4a41-8a56-7f2f0b6f4e42",
            "content": {"candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
        }"#;
        let msg: SignalingMessage = serde_json::from_str(raw).unwrap();
        match msg.signal().unwrap() {
            Signal::IceCandidate(c) => {
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_content_rejected() {
        let msg = SignalingMessage {
            kind: SignalKind::Offer,
            sender_id: Uuid::new_v4(),
            recipient_id: None,
            content: SignalContent::Candidate(IceCandidateInit::default()),
        };
        assert_eq!(msg.signal(), Err(ProtocolError::ContentMismatch(SignalKind::Offer)));

        let msg = SignalingMessage {
            kind: SignalKind::Answer,
            sender_id: Uuid::new_v4(),
            recipient_id: None,
            content: SignalContent::Description(SessionDescriptionInit {
                sdp_type: SdpType::Answer,
                sdp: "  ".into(),
            }),
        };
        assert_eq!(msg.signal(), Err(ProtocolError::EmptyDescription(SignalKind::Answer)));
    }

    #[test]
    fn test_leave_roundtrips_with_empty_content() {
        let msg = SignalingMessage::new(Uuid::new_v4(), None, &Signal::Leave);
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: SignalingMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.signal().unwrap(), Signal::Leave);
    }

    #[test]
    fn test_addressing() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let broadcast = SignalingMessage::new(other, None, &Signal::Leave);
        let targeted = SignalingMessage::new(other, Some(other), &Signal::Leave);
        assert!(broadcast.is_addressed_to(me));
        assert!(!targeted.is_addressed_to(me));
    }
}
