//! Per-peer session task.
//!
//! Each remote peer with a live call gets one task that owns its
//! [`CallSession`] and negotiation channel. Signals from the relay and events
//! from the channel are applied strictly in arrival order, so one peer's
//! offer/answer/candidate sequence never interleaves with itself while other
//! peers proceed independently.

use crate::coordinator::Shared;
use crate::error::{Error, Result};
use crate::events::LobbyEvent;
use crate::peer::channel::{ChannelEvent, NegotiationChannel, TransportState};
use crate::peer::media::LocalMedia;
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use crate::session::{CallSession, CallState};
use crate::signaling::{Envelope, Peer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub(crate) enum PeerCommand {
    /// Place the outgoing call
    Dial,
    /// The remote peer is calling us
    Ring(Peer),
    /// Local answer to a ringing call
    Decide(bool),
    Accepted,
    Rejected(Peer),
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
    Close,
}

pub(crate) struct PeerTask {
    shared: Arc<Shared>,
    generation: u64,
    session: CallSession,
    channel: Option<Arc<dyn NegotiationChannel>>,
    channel_tx: mpsc::UnboundedSender<ChannelEvent>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    commands: mpsc::UnboundedReceiver<PeerCommand>,
    grace_deadline: Option<Instant>,
}

async fn grace_expired(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl PeerTask {
    pub fn new(
        shared: Arc<Shared>,
        peer_id: &str,
        generation: u64,
        commands: mpsc::UnboundedReceiver<PeerCommand>,
    ) -> Self {
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        Self {
            shared,
            generation,
            session: CallSession::new(peer_id),
            channel: None,
            channel_tx,
            channel_rx,
            commands,
            grace_deadline: None,
        }
    }

    fn peer_id(&self) -> &str {
        &self.session.peer_id
    }

    pub async fn run(mut self) {
        while !self.session.state.is_terminal() {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => break,
                },
                Some(event) = self.channel_rx.recv() => self.on_channel_event(event).await,
                _ = grace_expired(self.grace_deadline) => {
                    warn!("Transport to {} did not recover, closing call", self.peer_id());
                    self.finish();
                }
            }
        }
        self.teardown().await;
    }

    async fn on_command(&mut self, cmd: PeerCommand) {
        match cmd {
            PeerCommand::Dial => self.dial().await,
            PeerCommand::Ring(caller) => self.ring(caller).await,
            PeerCommand::Decide(accept) => self.decide(accept).await,
            PeerCommand::Accepted => self.on_accepted().await,
            PeerCommand::Rejected(by) => self.on_rejected(by).await,
            PeerCommand::Offer(desc) => self.on_offer(desc).await,
            PeerCommand::Answer(desc) => self.on_answer(desc).await,
            PeerCommand::Candidate(candidate) => self.on_candidate(candidate).await,
            PeerCommand::Close => {
                debug!("Closing call with {}", self.peer_id());
                self.finish();
            }
        }
    }

    fn conflict(&self, what: &str) {
        let err = Error::StateConflict(format!(
            "{} while {:?} with {}",
            what,
            self.session.state,
            self.peer_id()
        ));
        debug!("Dropping signal: {}", err);
    }

    fn emit(&self, event: LobbyEvent) {
        self.shared.emit(event);
    }

    fn send(&self, envelope: Envelope) {
        if !self.shared.relay.send(&envelope) {
            debug!("Relay down, {:?} to {} not sent", envelope.kind, self.peer_id());
        }
    }

    fn finish(&mut self) {
        self.session.state = CallState::Closed;
    }

    async fn set_state(&mut self, state: CallState) {
        if self.session.state == state {
            return;
        }
        debug!("Call {}: {:?} -> {:?}", self.peer_id(), self.session.state, state);
        self.session.state = state;
        {
            let mut registry = self.shared.registry.lock().await;
            if let Some(entry) = registry.sessions.get_mut(&self.session.peer_id) {
                if entry.generation == self.generation {
                    entry.state = state;
                }
            }
        }
        self.emit(LobbyEvent::CallStateChanged {
            peer_id: self.session.peer_id.clone(),
            state,
        });
    }

    async fn clear_in_flight(&mut self) {
        self.session.outgoing_call_in_flight = false;
        self.shared
            .registry
            .lock()
            .await
            .clear_in_flight_for(&self.session.peer_id);
    }

    async fn dial(&mut self) {
        if self.session.state != CallState::Idle {
            return self.conflict("dial");
        }
        self.session.outgoing_call_in_flight = true;
        match self.shared.media.acquire(&self.session.peer_id).await {
            Ok(_) => {
                self.send(Envelope::call(&self.shared.self_peer, self.peer_id()));
                self.set_state(CallState::Calling).await;
            }
            Err(e) => {
                warn!("Cannot call {}: {}", self.peer_id(), e);
                self.emit(LobbyEvent::CallFailed {
                    peer_id: self.session.peer_id.clone(),
                    reason: e.to_string(),
                });
                self.finish();
            }
        }
    }

    async fn ring(&mut self, caller: Peer) {
        if self.session.state != CallState::Idle {
            return self.conflict("call");
        }
        info!("Incoming call from {} ({})", caller.display_name, caller.peer_id);
        self.set_state(CallState::Ringing).await;
        self.emit(LobbyEvent::IncomingCall(caller));
    }

    async fn decide(&mut self, accept: bool) {
        if self.session.state != CallState::Ringing {
            return self.conflict("answer");
        }
        let me = self.shared.self_peer.clone();
        if !accept {
            info!("Rejecting call from {}", self.peer_id());
            self.send(Envelope::reject_call(&me, self.peer_id()));
            self.finish();
            return;
        }

        match self.shared.media.acquire(&self.session.peer_id).await {
            Ok(_) => {
                self.send(Envelope::accept_call(&me, self.peer_id()));
                self.set_state(CallState::Accepted).await;
            }
            Err(e) => {
                warn!("Cannot accept call from {}: {}", self.peer_id(), e);
                self.send(Envelope::reject_call(&me, self.peer_id()));
                self.emit(LobbyEvent::CallFailed {
                    peer_id: self.session.peer_id.clone(),
                    reason: e.to_string(),
                });
                self.finish();
            }
        }
    }

    async fn on_accepted(&mut self) {
        if self.session.state != CallState::Calling {
            return self.conflict("accept-call");
        }
        match self.send_offer().await {
            Ok(()) => self.set_state(CallState::Negotiating).await,
            Err(e) => {
                warn!("Offer to {} failed: {}", self.peer_id(), e);
                if e.is_user_visible() {
                    self.emit(LobbyEvent::CallFailed {
                        peer_id: self.session.peer_id.clone(),
                        reason: e.to_string(),
                    });
                }
                self.clear_in_flight().await;
                self.finish();
            }
        }
    }

    async fn send_offer(&mut self) -> Result<()> {
        let media = self.shared.media.acquire(&self.session.peer_id).await?;
        let channel = self.ensure_channel(media).await?;
        let offer = channel.create_offer().await?;
        channel.set_local_description(offer.clone()).await?;
        self.session.local_description = Some(offer.clone());
        self.send(Envelope::offer(
            &self.shared.self_peer.peer_id,
            self.peer_id(),
            offer,
        ));
        Ok(())
    }

    async fn on_rejected(&mut self, by: Peer) {
        match self.session.state {
            CallState::Calling => {
                info!("{} rejected our call", by.display_name);
                self.emit(LobbyEvent::CallRejected(by));
            }
            CallState::Ringing => info!("{} withdrew the call", by.display_name),
            _ => return self.conflict("reject-call"),
        }
        self.clear_in_flight().await;
        self.finish();
    }

    /// Fresh offers only: a repeat of the applied one, or any offer during
    /// our own negotiation, is dropped. `Active` may renegotiate.
    async fn on_offer(&mut self, offer: SessionDescription) {
        let accepts = match self.session.state {
            CallState::Idle | CallState::Accepted => true,
            CallState::Active => self.session.remote_description.as_ref() != Some(&offer),
            _ => false,
        };
        if !accepts {
            return self.conflict("offer");
        }
        match self.send_answer(offer).await {
            Ok(()) => {
                if self.session.state != CallState::Active {
                    self.set_state(CallState::Negotiating).await;
                }
            }
            Err(e) => {
                warn!("Answering offer from {} failed: {}", self.peer_id(), e);
                self.finish();
            }
        }
    }

    async fn send_answer(&mut self, offer: SessionDescription) -> Result<()> {
        let media = self.shared.media.acquire(&self.session.peer_id).await?;
        let channel = self.ensure_channel(media).await?;
        channel.set_remote_description(offer.clone()).await?;
        self.session.remote_description = Some(offer);
        self.flush_pending(&channel).await?;

        let answer = channel.create_answer().await?;
        channel.set_local_description(answer.clone()).await?;
        self.session.local_description = Some(answer.clone());
        self.send(Envelope::answer(
            &self.shared.self_peer.peer_id,
            self.peer_id(),
            answer,
        ));
        Ok(())
    }

    async fn on_answer(&mut self, answer: SessionDescription) {
        if self.session.remote_description.is_some() {
            return self.conflict("answer");
        }
        let offered = self
            .session
            .local_description
            .as_ref()
            .is_some_and(|d| d.kind == SdpKind::Offer);
        let channel = match &self.channel {
            Some(channel) if self.session.state == CallState::Negotiating && offered => {
                channel.clone()
            }
            _ => return self.conflict("answer"),
        };

        let applied = channel.set_remote_description(answer.clone()).await;
        self.clear_in_flight().await;
        let result = match applied {
            Ok(()) => {
                self.session.remote_description = Some(answer);
                self.flush_pending(&channel).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Applying answer from {} failed: {}", self.peer_id(), e);
            self.finish();
        }
    }

    async fn on_candidate(&mut self, candidate: IceCandidate) {
        let ready = match &self.channel {
            Some(channel) => channel
                .has_remote_description()
                .await
                .then(|| channel.clone()),
            None => None,
        };
        let Some(channel) = ready else {
            return self.early_candidate(candidate);
        };
        if let Err(e) = channel.add_ice_candidate(candidate).await {
            warn!("Bad candidate from {}, closing call: {}", self.peer_id(), e);
            self.finish();
        }
    }

    fn early_candidate(&mut self, candidate: IceCandidate) {
        if self.shared.options.queue_early_candidates {
            debug!("Queueing early candidate from {}", self.peer_id());
            self.session.pending_remote_candidates.push(candidate);
        } else {
            debug!("Dropping early candidate from {}", self.peer_id());
        }
    }

    async fn flush_pending(&mut self, channel: &Arc<dyn NegotiationChannel>) -> Result<()> {
        let pending = std::mem::take(&mut self.session.pending_remote_candidates);
        if !pending.is_empty() {
            debug!("Applying {} queued candidates from {}", pending.len(), self.peer_id());
        }
        for candidate in pending {
            channel.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn ensure_channel(&mut self, media: LocalMedia) -> Result<Arc<dyn NegotiationChannel>> {
        if let Some(channel) = &self.channel {
            return Ok(channel.clone());
        }
        let channel = self
            .shared
            .channels
            .open(&self.session.peer_id, Some(&media), self.channel_tx.clone())
            .await?;
        self.channel = Some(channel.clone());
        Ok(channel)
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::CandidateGathered(candidate) => {
                self.send(Envelope::ice_candidate(
                    &self.shared.self_peer.peer_id,
                    self.peer_id(),
                    candidate,
                ));
            }
            ChannelEvent::RemoteTrack { kind, track_id } => {
                debug!("Remote {} track {} from {}", kind, track_id, self.peer_id());
                self.emit(LobbyEvent::RemoteTrack {
                    peer_id: self.session.peer_id.clone(),
                    kind,
                    track_id,
                });
            }
            ChannelEvent::StateChanged(state) => self.on_transport_state(state).await,
        }
    }

    async fn on_transport_state(&mut self, state: TransportState) {
        match state {
            TransportState::Connected => {
                if self.grace_deadline.take().is_some() {
                    info!("Transport to {} recovered", self.peer_id());
                }
                if self.session.state == CallState::Negotiating {
                    self.set_state(CallState::Active).await;
                }
            }
            TransportState::Disconnected => {
                if self.grace_deadline.is_none() {
                    let grace = self.shared.options.disconnect_grace;
                    info!("Transport to {} disconnected, waiting {:?}", self.peer_id(), grace);
                    self.grace_deadline = Some(Instant::now() + grace);
                }
            }
            TransportState::Failed | TransportState::Closed => {
                info!("Transport to {} {:?}, closing call", self.peer_id(), state);
                self.finish();
            }
            TransportState::New | TransportState::Connecting => {}
        }
    }

    async fn teardown(mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!("Closing channel to {} failed: {}", self.peer_id(), e);
            }
        }
        self.shared.media.release_for(&self.session.peer_id).await;
        {
            let mut registry = self.shared.registry.lock().await;
            registry.remove_if_current(&self.session.peer_id, self.generation);
            registry.clear_in_flight_for(&self.session.peer_id);
        }
        info!("Call with {} closed", self.peer_id());
        self.emit(LobbyEvent::CallStateChanged {
            peer_id: self.session.peer_id.clone(),
            state: CallState::Closed,
        });
    }
}
