//! Fakes and helpers for driving lobbies without devices or a network.

use crate::config::LobbyConfig;
use crate::error::{Error, Result};
use crate::events::LobbyEvent;
use crate::lobby::{Lobby, LobbyDeps, LobbyHandle};
use crate::peer::channel::{
    ChannelEvent, ChannelEvents, ChannelFactory, NegotiationChannel, TransportState,
};
use crate::peer::media::{LocalMedia, MediaEngine};
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use crate::relay::MemoryRelay;
use crate::signaling::{decode_frame, Envelope, Peer};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(60);

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts acquisitions and releases; can be told to refuse access
#[derive(Default)]
pub struct FakeMediaEngine {
    acquired: AtomicUsize,
    released: AtomicUsize,
    failing: AtomicBool,
    sinks: Mutex<Vec<String>>,
}

impl FakeMediaEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Sinks the stream was attached to, in order
    pub fn sinks(&self) -> Vec<String> {
        locked(&self.sinks).clone()
    }
}

#[async_trait]
impl MediaEngine for FakeMediaEngine {
    async fn acquire_local_media(&self) -> Result<LocalMedia> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::MediaAcquisition("permission denied".into()));
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(LocalMedia::empty(format!("fake-media-{n}")))
    }

    async fn release(&self, _media: LocalMedia) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    async fn attach(&self, _media: &LocalMedia, sink: &str) -> Result<()> {
        locked(&self.sinks).push(sink.to_string());
        Ok(())
    }
}

/// What a [`FakeChannel`] has been told so far
#[derive(Debug, Clone, Default)]
pub struct FakeChannelState {
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
    pub closed: bool,
    connected: bool,
    have_local_offer: bool,
}

/// In-memory channel. It gathers one host candidate when its local
/// description is set and reports `Connected` once both descriptions are in.
pub struct FakeChannel {
    peer_id: String,
    events: ChannelEvents,
    auto_connect: bool,
    state: Mutex<FakeChannelState>,
}

impl FakeChannel {
    pub fn snapshot(&self) -> FakeChannelState {
        locked(&self.state).clone()
    }

    /// Injects a transport state change
    pub fn report(&self, state: TransportState) {
        let _ = self.events.send(ChannelEvent::StateChanged(state));
    }

    pub fn remote_track(&self, kind: &str, track_id: &str) {
        let _ = self.events.send(ChannelEvent::RemoteTrack {
            kind: kind.into(),
            track_id: track_id.into(),
        });
    }

    fn maybe_connect(&self, state: &mut FakeChannelState) {
        if self.auto_connect && !state.connected && state.local.is_some() && state.remote.is_some()
        {
            state.connected = true;
            self.report(TransportState::Connected);
        }
    }
}

#[async_trait]
impl NegotiationChannel for FakeChannel {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(format!(
            "v=0 fake offer for {}",
            self.peer_id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if locked(&self.state).remote.is_none() {
            return Err(Error::Negotiation("answer without remote offer".into()));
        }
        Ok(SessionDescription::answer(format!(
            "v=0 fake answer for {}",
            self.peer_id
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let mut state = locked(&self.state);
        state.have_local_offer = desc.kind == SdpKind::Offer;
        state.local = Some(desc);
        let _ = self
            .events
            .send(ChannelEvent::CandidateGathered(IceCandidate {
                candidate: "candidate:1 1 udp 2130706431 10.0.0.1 50000 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            }));
        self.maybe_connect(&mut state);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if desc.sdp.contains("malformed") {
            return Err(Error::Negotiation("malformed session description".into()));
        }
        let mut state = locked(&self.state);
        // Answers only settle our own pending offer; offers only land when we have none
        match desc.kind {
            SdpKind::Answer if !state.have_local_offer => {
                return Err(Error::Negotiation("answer in stable state".into()));
            }
            SdpKind::Offer if state.have_local_offer => {
                return Err(Error::Negotiation("offer while our offer is pending".into()));
            }
            _ => {}
        }
        state.have_local_offer = false;
        state.remote = Some(desc);
        self.maybe_connect(&mut state);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        locked(&self.state).remote.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if !candidate.candidate.starts_with("candidate:") {
            return Err(Error::Negotiation(format!(
                "bad candidate {:?}",
                candidate.candidate
            )));
        }
        locked(&self.state).candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        locked(&self.state).closed = true;
        Ok(())
    }
}

/// Hands out [`FakeChannel`]s and remembers them
#[derive(Default)]
pub struct FakeChannelFactory {
    opened: Mutex<Vec<Arc<FakeChannel>>>,
    manual_connect: AtomicBool,
}

impl FakeChannelFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Channels opened from now on only connect via [`FakeChannel::report`]
    pub fn set_manual_connect(&self, manual: bool) {
        self.manual_connect.store(manual, Ordering::SeqCst);
    }

    pub fn opened_count(&self) -> usize {
        locked(&self.opened).len()
    }

    /// Most recent channel opened for `peer_id`
    pub fn channel_for(&self, peer_id: &str) -> Option<Arc<FakeChannel>> {
        locked(&self.opened)
            .iter()
            .rev()
            .find(|c| c.peer_id == peer_id)
            .cloned()
    }
}

#[async_trait]
impl ChannelFactory for FakeChannelFactory {
    async fn open(
        &self,
        peer_id: &str,
        _media: Option<&LocalMedia>,
        events: ChannelEvents,
    ) -> Result<Arc<dyn NegotiationChannel>> {
        let channel = Arc::new(FakeChannel {
            peer_id: peer_id.to_string(),
            events,
            auto_connect: !self.manual_connect.load(Ordering::SeqCst),
            state: Mutex::new(FakeChannelState::default()),
        });
        locked(&self.opened).push(channel.clone());
        Ok(channel)
    }
}

/// A lobby wired to a [`MemoryRelay`] and fakes
pub struct TestPeer {
    pub peer: Peer,
    pub handle: LobbyHandle,
    pub events: mpsc::UnboundedReceiver<LobbyEvent>,
    pub media: Arc<FakeMediaEngine>,
    pub channels: Arc<FakeChannelFactory>,
}

impl TestPeer {
    pub fn start(relay: &MemoryRelay, peer: Peer, config: LobbyConfig) -> TestPeer {
        let media = FakeMediaEngine::new();
        let channels = FakeChannelFactory::new();
        let deps = LobbyDeps {
            transport: Arc::new(relay.clone()),
            media: media.clone(),
            channels: channels.clone(),
        };
        let (handle, events) =
            Lobby::start(config, peer.clone(), deps).expect("lobby should start");
        TestPeer {
            peer,
            handle,
            events,
            media,
            channels,
        }
    }

    /// Waits for the first event matching `pred`, skipping others
    pub async fn wait_for<F>(&mut self, pred: F) -> LobbyEvent
    where
        F: FnMut(&LobbyEvent) -> bool,
    {
        next_event(&mut self.events, pred).await
    }
}

pub async fn next_event<F>(events: &mut mpsc::UnboundedReceiver<LobbyEvent>, mut pred: F) -> LobbyEvent
where
    F: FnMut(&LobbyEvent) -> bool,
{
    let found = timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for event")
}

/// Waits for the first relayed envelope matching `pred`
pub async fn next_envelope<F>(tap: &mut mpsc::UnboundedReceiver<String>, mut pred: F) -> Envelope
where
    F: FnMut(&Envelope) -> bool,
{
    let found = timeout(WAIT, async {
        loop {
            let text = tap.recv().await.expect("relay tap closed");
            if let Ok(envelope) = decode_frame(&text) {
                if pred(&envelope) {
                    return envelope;
                }
            }
        }
    })
    .await;
    found.expect("timed out waiting for envelope")
}

/// Everything relayed so far
pub fn drain_envelopes(tap: &mut mpsc::UnboundedReceiver<String>) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Ok(text) = tap.try_recv() {
        if let Ok(envelope) = decode_frame(&text) {
            out.push(envelope);
        }
    }
    out
}

/// Lets spawned tasks run until they block
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
