//! Inbound envelope filtering and classification.
//!
//! The relay fans every frame out to every client, so all addressing is
//! enforced here. Filtering happens before field validation: a malformed
//! message addressed to somebody else is simply not ours.

use crate::error::{Error, Result};
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::signaling::{Envelope, MessageType, Peer, BROADCAST};
use tracing::trace;

/// Call signaling for one remote peer
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Call(Peer),
    AcceptCall(Peer),
    RejectCall(Peer),
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

/// Where an accepted envelope goes
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Join(Peer),
    Presence(Peer),
    Leave(Peer),
    Chat { user: Peer, content: String },
    Session { peer_id: String, signal: Signal },
}

pub struct Router {
    self_id: String,
}

impl Router {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
        }
    }

    /// Whether the envelope is for us: not our own echo, and addressed to us,
    /// to everyone, or to nobody in particular
    pub fn accepts(&self, envelope: &Envelope) -> bool {
        if envelope.sender_id() == Some(self.self_id.as_str()) {
            return false;
        }
        match envelope.to.as_deref() {
            None => true,
            Some(to) => to == self.self_id || to == BROADCAST,
        }
    }

    /// `Ok(None)` for filtered or unknown messages, `Err(ProtocolDecode)` when
    /// a message for us lacks the fields its type requires.
    pub fn route(&self, envelope: Envelope) -> Result<Option<Route>> {
        if !self.accepts(&envelope) {
            trace!(
                "Dropping {:?} from {:?} to {:?}",
                envelope.kind,
                envelope.sender_id(),
                envelope.to
            );
            return Ok(None);
        }

        let kind = envelope.kind;
        let route = match kind {
            MessageType::Join => Route::Join(require(envelope.user, kind, "user")?),
            MessageType::Presence => Route::Presence(require(envelope.user, kind, "user")?),
            MessageType::Leave => Route::Leave(require(envelope.user, kind, "user")?),
            MessageType::Chat => Route::Chat {
                user: require(envelope.user, kind, "user")?,
                content: require(envelope.content, kind, "content")?,
            },
            MessageType::Call | MessageType::AcceptCall | MessageType::RejectCall => {
                let peer_id = require(envelope.from, kind, "from")?;
                require(envelope.to, kind, "to")?;
                let user = require(envelope.user, kind, "user")?;
                let signal = match kind {
                    MessageType::Call => Signal::Call(user),
                    MessageType::AcceptCall => Signal::AcceptCall(user),
                    _ => Signal::RejectCall(user),
                };
                Route::Session { peer_id, signal }
            }
            MessageType::Offer => Route::Session {
                peer_id: require(envelope.from, kind, "from")?,
                signal: Signal::Offer(require(envelope.offer, kind, "offer")?),
            },
            MessageType::Answer => Route::Session {
                peer_id: require(envelope.from, kind, "from")?,
                signal: Signal::Answer(require(envelope.answer, kind, "answer")?),
            },
            MessageType::IceCandidate => Route::Session {
                peer_id: require(envelope.from, kind, "from")?,
                signal: Signal::IceCandidate(require(envelope.candidate, kind, "candidate")?),
            },
            MessageType::Unknown => {
                trace!("Ignoring envelope of unknown type");
                return Ok(None);
            }
        };
        Ok(Some(route))
    }
}

fn require<T>(field: Option<T>, kind: MessageType, name: &str) -> Result<T> {
    field.ok_or_else(|| Error::ProtocolDecode(format!("{kind:?} without `{name}`")))
}
