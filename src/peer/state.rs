use crate::peer::task::PeerCommand;
use crate::session::CallState;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Registry entry for one live session task
pub(crate) struct SessionEntry {
    pub generation: u64,
    pub state: CallState,
    pub commands: mpsc::UnboundedSender<PeerCommand>,
    pub task: Option<JoinHandle<()>>,
}

/// Sessions keyed by remote peer id, plus the single outgoing-call flag
#[derive(Default)]
pub(crate) struct Registry {
    pub sessions: HashMap<String, SessionEntry>,
    pub outgoing_in_flight: Option<String>,
    next_generation: u64,
}

impl Registry {
    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn state_of(&self, peer_id: &str) -> CallState {
        self.sessions
            .get(peer_id)
            .map_or(CallState::Idle, |entry| entry.state)
    }

    /// Removes `peer_id` only if the entry still belongs to `generation`
    pub fn remove_if_current(&mut self, peer_id: &str, generation: u64) -> bool {
        let current = self
            .sessions
            .get(peer_id)
            .is_some_and(|entry| entry.generation == generation);
        if current {
            self.sessions.remove(peer_id);
        }
        current
    }

    pub fn clear_in_flight_for(&mut self, peer_id: &str) {
        if self.outgoing_in_flight.as_deref() == Some(peer_id) {
            self.outgoing_in_flight = None;
        }
    }
}
