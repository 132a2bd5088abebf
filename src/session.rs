use crate::peer::types::{IceCandidate, SessionDescription};
use serde::Serialize;

/// Per-peer call state.
///
/// `Idle -> Calling` (we dialled) or `Idle -> Ringing` (they dialled), then
/// `Accepted -> Negotiating -> Active -> Closed`. `Calling`/`Ringing` go
/// straight to `Closed` on reject.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CallState {
    Idle,
    Calling,
    Ringing,
    Accepted,
    Negotiating,
    Active,
    Closed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        self == CallState::Closed
    }

    /// Offer/answer exchange underway or done
    pub fn is_established(self) -> bool {
        matches!(self, CallState::Negotiating | CallState::Active)
    }
}

/// Call bookkeeping for one remote peer, owned by that peer's task
#[derive(Debug, Clone)]
pub struct CallSession {
    pub peer_id: String,
    pub state: CallState,
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    /// Only filled when early candidates are queued
    pub pending_remote_candidates: Vec<IceCandidate>,
    /// We dialled and the callee has not answered yet
    pub outgoing_call_in_flight: bool,
}

impl CallSession {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            state: CallState::Idle,
            local_description: None,
            remote_description: None,
            pending_remote_candidates: Vec::new(),
            outgoing_call_in_flight: false,
        }
    }
}
