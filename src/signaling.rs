//! Relay wire format.
//!
//! Outbound text is always `{"action": "message", "data": <Envelope>}`. Inbound
//! text is accepted wrapped the same way or as a bare envelope, since the
//! hosted relay forwards only `data`.

use crate::error::{Error, Result};
use crate::peer::types::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

/// Relay route every frame is posted to
pub const RELAY_ACTION: &str = "message";

/// Addressee meaning every lobby member
pub const BROADCAST: &str = "all";

/// A lobby participant. Ids are client generated and assumed unique.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    #[serde(rename = "userId")]
    pub peer_id: String,
    #[serde(rename = "username")]
    pub display_name: String,
}

impl Peer {
    pub fn new(peer_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Join,
    Leave,
    Presence,
    Chat,
    Call,
    AcceptCall,
    RejectCall,
    Offer,
    Answer,
    IceCandidate,
    /// Any type this client does not know about
    #[serde(other)]
    Unknown,
}

/// One relayed message. Immutable once sent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Peer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
}

impl Envelope {
    fn bare(kind: MessageType) -> Self {
        Self {
            kind,
            from: None,
            to: None,
            user: None,
            content: None,
            offer: None,
            answer: None,
            candidate: None,
        }
    }

    pub fn join(user: &Peer) -> Self {
        Self {
            user: Some(user.clone()),
            ..Self::bare(MessageType::Join)
        }
    }

    pub fn leave(user: &Peer) -> Self {
        Self {
            user: Some(user.clone()),
            ..Self::bare(MessageType::Leave)
        }
    }

    /// Heartbeat when `to` is None, resync reply to a joiner otherwise
    pub fn presence(user: &Peer, to: Option<&str>) -> Self {
        Self {
            user: Some(user.clone()),
            to: to.map(str::to_string),
            ..Self::bare(MessageType::Presence)
        }
    }

    pub fn chat(user: &Peer, content: &str) -> Self {
        Self {
            user: Some(user.clone()),
            content: Some(content.to_string()),
            ..Self::bare(MessageType::Chat)
        }
    }

    fn call_control(kind: MessageType, me: &Peer, to: &str) -> Self {
        Self {
            from: Some(me.peer_id.clone()),
            to: Some(to.to_string()),
            user: Some(me.clone()),
            ..Self::bare(kind)
        }
    }

    pub fn call(me: &Peer, to: &str) -> Self {
        Self::call_control(MessageType::Call, me, to)
    }

    pub fn accept_call(me: &Peer, to: &str) -> Self {
        Self::call_control(MessageType::AcceptCall, me, to)
    }

    pub fn reject_call(me: &Peer, to: &str) -> Self {
        Self::call_control(MessageType::RejectCall, me, to)
    }

    pub fn offer(from: &str, to: &str, offer: SessionDescription) -> Self {
        Self {
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            offer: Some(offer),
            ..Self::bare(MessageType::Offer)
        }
    }

    pub fn answer(from: &str, to: &str, answer: SessionDescription) -> Self {
        Self {
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            answer: Some(answer),
            ..Self::bare(MessageType::Answer)
        }
    }

    pub fn ice_candidate(from: &str, to: &str, candidate: IceCandidate) -> Self {
        Self {
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            candidate: Some(candidate),
            ..Self::bare(MessageType::IceCandidate)
        }
    }

    /// Sender id: `from`, or `user.userId` for types that carry no `from`
    pub fn sender_id(&self) -> Option<&str> {
        self.from
            .as_deref()
            .or_else(|| self.user.as_ref().map(|u| u.peer_id.as_str()))
    }
}

/// Outer relay frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Frame {
    pub action: String,
    pub data: Envelope,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Inbound {
    Wrapped { data: Envelope },
    Bare(Envelope),
}

pub fn encode_frame(envelope: &Envelope) -> Result<String> {
    let frame = Frame {
        action: RELAY_ACTION.to_string(),
        data: envelope.clone(),
    };
    Ok(serde_json::to_string(&frame)?)
}

pub fn decode_frame(text: &str) -> Result<Envelope> {
    match serde_json::from_str::<Inbound>(text) {
        Ok(Inbound::Wrapped { data }) | Ok(Inbound::Bare(data)) => Ok(data),
        Err(e) => Err(Error::ProtocolDecode(e.to_string())),
    }
}
