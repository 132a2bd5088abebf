//! Call sessions across all remote peers.
//!
//! The coordinator spawns one [`PeerTask`] per remote peer and forwards that
//! peer's signals to it. The only state shared between peers lives in the
//! registry: the session map and the single outgoing-call flag.

use crate::config::{AnswerPolicy, LobbyConfig};
use crate::error::{Error, Result};
use crate::events::LobbyEvent;
use crate::peer::channel::ChannelFactory;
use crate::peer::media::{MediaEngine, MediaPool};
use crate::peer::state::{Registry, SessionEntry};
use crate::peer::task::{PeerCommand, PeerTask};
use crate::relay::RelaySender;
use crate::router::Signal;
use crate::session::CallState;
use crate::signaling::Peer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// Call behaviour knobs taken from [`LobbyConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub answer_policy: AnswerPolicy,
    pub queue_early_candidates: bool,
    pub disconnect_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions::from(&LobbyConfig::default())
    }
}

impl From<&LobbyConfig> for SessionOptions {
    fn from(config: &LobbyConfig) -> Self {
        Self {
            answer_policy: config.answer_policy,
            queue_early_candidates: config.queue_early_candidates,
            disconnect_grace: config.disconnect_grace,
        }
    }
}

pub(crate) struct Shared {
    pub self_peer: Peer,
    pub relay: RelaySender,
    pub media: MediaPool,
    pub channels: Arc<dyn ChannelFactory>,
    pub options: SessionOptions,
    pub registry: Mutex<Registry>,
    events: mpsc::UnboundedSender<LobbyEvent>,
}

impl Shared {
    pub fn emit(&self, event: LobbyEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver gone");
        }
    }
}

pub struct SessionCoordinator {
    shared: Arc<Shared>,
}

impl SessionCoordinator {
    pub fn new(
        self_peer: Peer,
        relay: RelaySender,
        media: Arc<dyn MediaEngine>,
        channels: Arc<dyn ChannelFactory>,
        options: SessionOptions,
        events: mpsc::UnboundedSender<LobbyEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                self_peer,
                relay,
                media: MediaPool::new(media),
                channels,
                options,
                registry: Mutex::new(Registry::default()),
                events,
            }),
        }
    }

    fn spawn_session(&self, registry: &mut Registry, peer_id: &str) -> mpsc::UnboundedSender<PeerCommand> {
        let generation = registry.next_generation();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = PeerTask::new(self.shared.clone(), peer_id, generation, rx);
        let handle = tokio::spawn(task.run());
        registry.sessions.insert(
            peer_id.to_string(),
            SessionEntry {
                generation,
                state: CallState::Idle,
                commands: tx.clone(),
                task: Some(handle),
            },
        );
        tx
    }

    /// Places a call. At most one outgoing call may be in flight, and a peer
    /// that already has a session cannot be called again.
    pub async fn initiate_call(&self, peer_id: &str) -> Result<()> {
        if peer_id == self.shared.self_peer.peer_id {
            return Err(Error::StateConflict("cannot call yourself".into()));
        }
        let mut registry = self.shared.registry.lock().await;
        if let Some(current) = &registry.outgoing_in_flight {
            return Err(Error::StateConflict(format!(
                "outgoing call to {} still in flight",
                current
            )));
        }
        if let Some(entry) = registry.sessions.get(peer_id) {
            return Err(Error::StateConflict(format!(
                "session with {} already {:?}",
                peer_id, entry.state
            )));
        }

        info!("Calling {}", peer_id);
        registry.outgoing_in_flight = Some(peer_id.to_string());
        let tx = self.spawn_session(&mut registry, peer_id);
        let _ = tx.send(PeerCommand::Dial);
        Ok(())
    }

    /// Local decision on a ringing call
    pub async fn answer_call(&self, peer_id: &str, accept: bool) -> Result<()> {
        let registry = self.shared.registry.lock().await;
        match registry.sessions.get(peer_id) {
            Some(entry) if entry.state == CallState::Ringing => {
                let _ = entry.commands.send(PeerCommand::Decide(accept));
                Ok(())
            }
            Some(entry) => Err(Error::StateConflict(format!(
                "call with {} is {:?}, not ringing",
                peer_id, entry.state
            ))),
            None => Err(Error::StateConflict(format!("no call from {}", peer_id))),
        }
    }

    /// Applies a routed signal from `peer_id`
    pub async fn handle_signal(&self, peer_id: &str, signal: Signal) {
        let mut registry = self.shared.registry.lock().await;
        let command = match signal {
            Signal::Call(caller) => {
                if let Some(entry) = registry.sessions.get(peer_id) {
                    debug!("Ignoring call from {}: session already {:?}", peer_id, entry.state);
                    return;
                }
                let tx = self.spawn_session(&mut registry, peer_id);
                let _ = tx.send(PeerCommand::Ring(caller));
                match self.shared.options.answer_policy {
                    AnswerPolicy::Ask => {}
                    AnswerPolicy::AutoAccept => {
                        let _ = tx.send(PeerCommand::Decide(true));
                    }
                    AnswerPolicy::AutoReject => {
                        let _ = tx.send(PeerCommand::Decide(false));
                    }
                }
                return;
            }
            Signal::Offer(offer) => {
                if !registry.sessions.contains_key(peer_id) {
                    self.spawn_session(&mut registry, peer_id);
                }
                PeerCommand::Offer(offer)
            }
            Signal::AcceptCall(_) => PeerCommand::Accepted,
            Signal::RejectCall(by) => PeerCommand::Rejected(by),
            Signal::Answer(answer) => PeerCommand::Answer(answer),
            Signal::IceCandidate(candidate) => PeerCommand::Candidate(candidate),
        };

        match registry.sessions.get(peer_id) {
            Some(entry) => {
                let _ = entry.commands.send(command);
            }
            None => debug!("No session with {}, dropping {:?}", peer_id, command),
        }
    }

    /// Hangs up on `peer_id`. Unknown peers are ignored.
    pub async fn close(&self, peer_id: &str) {
        let registry = self.shared.registry.lock().await;
        if let Some(entry) = registry.sessions.get(peer_id) {
            let _ = entry.commands.send(PeerCommand::Close);
        }
    }

    /// Tears every session down and releases local media
    pub async fn close_all(&self) {
        let entries: Vec<SessionEntry> = {
            let mut registry = self.shared.registry.lock().await;
            registry.outgoing_in_flight = None;
            registry.sessions.drain().map(|(_, entry)| entry).collect()
        };
        if !entries.is_empty() {
            info!("Closing {} calls", entries.len());
        }
        for entry in &entries {
            let _ = entry.commands.send(PeerCommand::Close);
        }
        for mut entry in entries {
            if let Some(task) = entry.task.take() {
                let _ = task.await;
            }
        }
        self.shared.media.stop().await;
    }

    pub async fn state_of(&self, peer_id: &str) -> CallState {
        self.shared.registry.lock().await.state_of(peer_id)
    }

    pub async fn outgoing_call_in_flight(&self) -> Option<String> {
        self.shared.registry.lock().await.outgoing_in_flight.clone()
    }

    /// Sessions that have left `Idle`, by peer id
    pub async fn active_calls(&self) -> Vec<(String, CallState)> {
        let registry = self.shared.registry.lock().await;
        let mut calls: Vec<_> = registry
            .sessions
            .iter()
            .map(|(peer_id, entry)| (peer_id.clone(), entry.state))
            .filter(|(_, state)| *state != CallState::Idle)
            .collect();
        calls.sort_by(|a, b| a.0.cmp(&b.0));
        calls
    }

    pub async fn media_held(&self) -> bool {
        self.shared.media.is_held().await
    }
}
