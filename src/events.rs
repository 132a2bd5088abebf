use crate::chat::ChatEntry;
use crate::relay::RelayState;
use crate::session::CallState;
use crate::signaling::Peer;

/// Everything the lobby reports to its embedder
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    RelayStateChanged(RelayState),
    PeerJoined(Peer),
    PeerLeft(Peer),
    /// Dropped by the sweep after its heartbeat went stale
    PeerExpired(Peer),
    Chat(ChatEntry),
    IncomingCall(Peer),
    CallStateChanged {
        peer_id: String,
        state: CallState,
    },
    CallRejected(Peer),
    CallFailed {
        peer_id: String,
        reason: String,
    },
    RemoteTrack {
        peer_id: String,
        kind: String,
        track_id: String,
    },
}
