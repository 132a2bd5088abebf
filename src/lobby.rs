//! Lobby orchestrator.
//!
//! Wires the relay supervisor, router, directory, chat log and session
//! coordinator together behind a single dispatch task. Callers talk to it
//! through a cloneable [`LobbyHandle`] and observe it through a stream of
//! [`LobbyEvent`]s.

use crate::chat::{ChatEntry, ChatLog};
use crate::config::LobbyConfig;
use crate::coordinator::{SessionCoordinator, SessionOptions};
use crate::directory::{Directory, Upsert};
use crate::error::{Error, Result};
use crate::events::LobbyEvent;
use crate::peer::channel::ChannelFactory;
use crate::peer::connection::RtcChannelFactory;
use crate::peer::media::{MediaEngine, TrackMediaEngine};
use crate::relay::{RelaySender, RelayState, RelayTransport, WebSocketRelay};
use crate::router::{Route, Router};
use crate::session::CallState;
use crate::signaling::{decode_frame, Envelope, Peer};
use crate::supervisor::{ConnectionSupervisor, SupervisorHandle};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// External collaborators of a lobby
pub struct LobbyDeps {
    pub transport: Arc<dyn RelayTransport>,
    pub media: Arc<dyn MediaEngine>,
    pub channels: Arc<dyn ChannelFactory>,
}

impl LobbyDeps {
    /// WebSocket relay, webrtc peer connections, Opus/VP8 local tracks
    pub fn production(config: &LobbyConfig) -> Self {
        Self {
            transport: Arc::new(WebSocketRelay::new(config.relay_url.clone())),
            media: Arc::new(TrackMediaEngine::new()),
            channels: Arc::new(RtcChannelFactory::new(config.ice_servers.clone())),
        }
    }
}

enum LobbyCommand {
    Call {
        peer_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Answer {
        peer_id: String,
        accept: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    HangUp {
        peer_id: String,
        reply: oneshot::Sender<()>,
    },
    Chat {
        text: String,
        reply: oneshot::Sender<()>,
    },
    Peers(oneshot::Sender<Vec<Peer>>),
    ChatHistory(oneshot::Sender<Vec<ChatEntry>>),
    CallState {
        peer_id: String,
        reply: oneshot::Sender<CallState>,
    },
    ActiveCalls(oneshot::Sender<Vec<(String, CallState)>>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap handle to a running lobby
#[derive(Clone)]
pub struct LobbyHandle {
    self_peer: Peer,
    commands: mpsc::UnboundedSender<LobbyCommand>,
    relay_state: watch::Receiver<RelayState>,
}

impl LobbyHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> LobbyCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    pub fn self_peer(&self) -> &Peer {
        &self.self_peer
    }

    pub fn relay_state(&self) -> RelayState {
        *self.relay_state.borrow()
    }

    pub async fn call(&self, peer_id: &str) -> Result<()> {
        let peer_id = peer_id.to_string();
        self.request(|reply| LobbyCommand::Call { peer_id, reply })
            .await?
    }

    pub async fn answer_call(&self, peer_id: &str, accept: bool) -> Result<()> {
        let peer_id = peer_id.to_string();
        self.request(|reply| LobbyCommand::Answer {
            peer_id,
            accept,
            reply,
        })
        .await?
    }

    pub async fn hang_up(&self, peer_id: &str) -> Result<()> {
        let peer_id = peer_id.to_string();
        self.request(|reply| LobbyCommand::HangUp { peer_id, reply })
            .await
    }

    /// Broadcasts a chat line. Blank text is ignored.
    pub async fn send_chat(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        self.request(|reply| LobbyCommand::Chat { text, reply }).await
    }

    pub async fn peers(&self) -> Result<Vec<Peer>> {
        self.request(LobbyCommand::Peers).await
    }

    pub async fn chat_history(&self) -> Result<Vec<ChatEntry>> {
        self.request(LobbyCommand::ChatHistory).await
    }

    pub async fn call_state(&self, peer_id: &str) -> Result<CallState> {
        let peer_id = peer_id.to_string();
        self.request(|reply| LobbyCommand::CallState { peer_id, reply })
            .await
    }

    pub async fn active_calls(&self) -> Result<Vec<(String, CallState)>> {
        self.request(LobbyCommand::ActiveCalls).await
    }

    /// Announces `leave`, hangs up every call, releases media and closes the
    /// relay connection
    pub async fn shutdown(&self) -> Result<()> {
        self.request(LobbyCommand::Shutdown).await
    }
}

pub struct Lobby {
    self_peer: Peer,
    config: LobbyConfig,
    router: Router,
    directory: Directory,
    chat: ChatLog,
    relay: RelaySender,
    coordinator: SessionCoordinator,
    events: mpsc::UnboundedSender<LobbyEvent>,
}

impl Lobby {
    /// Validates `config`, starts the relay supervisor and the dispatch task
    pub fn start(
        config: LobbyConfig,
        self_peer: Peer,
        deps: LobbyDeps,
    ) -> Result<(LobbyHandle, mpsc::UnboundedReceiver<LobbyEvent>)> {
        config.validate()?;
        info!(
            "Starting lobby as {} ({}) via {}",
            self_peer.display_name, self_peer.peer_id, config.relay_url
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let supervisor = ConnectionSupervisor::spawn(
            deps.transport,
            self_peer.clone(),
            config.presence_interval,
            config.reconnect_delay,
            frames_tx,
        );
        let relay = supervisor.sender();
        let relay_state = supervisor.state();

        let coordinator = SessionCoordinator::new(
            self_peer.clone(),
            relay.clone(),
            deps.media,
            deps.channels,
            SessionOptions::from(&config),
            events_tx.clone(),
        );

        let lobby = Lobby {
            router: Router::new(self_peer.peer_id.clone()),
            directory: Directory::new(config.peer_ttl),
            chat: ChatLog::new(config.chat_history_limit),
            self_peer: self_peer.clone(),
            config,
            relay,
            coordinator,
            events: events_tx,
        };
        tokio::spawn(lobby.run(supervisor, frames_rx, commands_rx));

        let handle = LobbyHandle {
            self_peer,
            commands: commands_tx,
            relay_state,
        };
        Ok((handle, events_rx))
    }

    fn emit(&self, event: LobbyEvent) {
        if self.events.send(event).is_err() {
            trace!("Lobby event receiver gone");
        }
    }

    async fn run(
        mut self,
        supervisor: SupervisorHandle,
        mut frames: mpsc::UnboundedReceiver<String>,
        mut commands: mpsc::UnboundedReceiver<LobbyCommand>,
    ) {
        let period = self.config.sweep_interval;
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut relay_state = supervisor.state();
        let mut relay_alive = true;

        let done = loop {
            tokio::select! {
                Some(frame) = frames.recv() => self.on_frame(&frame).await,
                cmd = commands.recv() => match cmd {
                    Some(LobbyCommand::Shutdown(done)) => break Some(done),
                    Some(cmd) => self.on_command(cmd).await,
                    None => break None,
                },
                _ = sweep.tick() => self.sweep(),
                changed = relay_state.changed(), if relay_alive => match changed {
                    Ok(()) => {
                        let state = *relay_state.borrow_and_update();
                        self.emit(LobbyEvent::RelayStateChanged(state));
                    }
                    Err(_) => relay_alive = false,
                },
            }
        };

        info!("Lobby shutting down");
        self.relay.send(&Envelope::leave(&self.self_peer));
        self.coordinator.close_all().await;
        supervisor.stop().await;
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    async fn on_frame(&mut self, text: &str) {
        let envelope = match decode_frame(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("Dropping frame: {}", e);
                return;
            }
        };
        let route = match self.router.route(envelope) {
            Ok(Some(route)) => route,
            Ok(None) => return,
            Err(e) => {
                debug!("Dropping envelope: {}", e);
                return;
            }
        };

        match route {
            Route::Join(peer) | Route::Presence(peer) => self.upsert(peer),
            Route::Leave(peer) => self.remove(peer).await,
            Route::Chat { user, content } => {
                let entry = ChatEntry::message(&user.display_name, &content);
                self.chat.push(entry.clone());
                self.emit(LobbyEvent::Chat(entry));
            }
            Route::Session { peer_id, signal } => {
                self.coordinator.handle_signal(&peer_id, signal).await
            }
        }
    }

    /// First sighting of a peer adds a join notice and tells them about us
    fn upsert(&mut self, peer: Peer) {
        match self.directory.upsert(peer.clone(), Instant::now()) {
            Upsert::Inserted => {
                info!("{} ({}) joined", peer.display_name, peer.peer_id);
                let notice = self.chat.joined(&peer.display_name);
                self.emit(LobbyEvent::Chat(notice));
                if peer.peer_id != self.self_peer.peer_id {
                    self.relay
                        .send(&Envelope::presence(&self.self_peer, Some(&peer.peer_id)));
                }
                self.emit(LobbyEvent::PeerJoined(peer));
            }
            Upsert::Refreshed => trace!("Presence from {}", peer.peer_id),
        }
    }

    async fn remove(&mut self, peer: Peer) {
        self.directory.remove(&peer.peer_id);
        info!("{} ({}) left", peer.display_name, peer.peer_id);
        let notice = self.chat.left(&peer.display_name);
        self.emit(LobbyEvent::Chat(notice));
        self.coordinator.close(&peer.peer_id).await;
        self.emit(LobbyEvent::PeerLeft(peer));
    }

    fn sweep(&mut self) {
        for record in self.directory.sweep(Instant::now()) {
            info!(
                "{} ({}) timed out",
                record.peer.display_name, record.peer.peer_id
            );
            self.emit(LobbyEvent::PeerExpired(record.peer));
        }
    }

    async fn on_command(&mut self, cmd: LobbyCommand) {
        match cmd {
            LobbyCommand::Call { peer_id, reply } => {
                let _ = reply.send(self.coordinator.initiate_call(&peer_id).await);
            }
            LobbyCommand::Answer {
                peer_id,
                accept,
                reply,
            } => {
                let _ = reply.send(self.coordinator.answer_call(&peer_id, accept).await);
            }
            LobbyCommand::HangUp { peer_id, reply } => {
                self.coordinator.close(&peer_id).await;
                let _ = reply.send(());
            }
            LobbyCommand::Chat { text, reply } => {
                self.send_chat(&text);
                let _ = reply.send(());
            }
            LobbyCommand::Peers(reply) => {
                let _ = reply.send(self.directory.peers());
            }
            LobbyCommand::ChatHistory(reply) => {
                let _ = reply.send(self.chat.entries());
            }
            LobbyCommand::CallState { peer_id, reply } => {
                let _ = reply.send(self.coordinator.state_of(&peer_id).await);
            }
            LobbyCommand::ActiveCalls(reply) => {
                let _ = reply.send(self.coordinator.active_calls().await);
            }
            // Handled by the run loop
            LobbyCommand::Shutdown(_) => {}
        }
    }

    fn send_chat(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.relay.send(&Envelope::chat(&self.self_peer, text)) {
            debug!("Relay down, chat line kept locally only");
        }
        let entry = ChatEntry::message(&self.self_peer.display_name, text);
        self.chat.push(entry.clone());
        self.emit(LobbyEvent::Chat(entry));
    }
}
