//! Negotiation channel seam.
//!
//! A channel is the peer transport for one remote peer. Its callbacks are not
//! exposed as callbacks: everything it reports arrives as a [`ChannelEvent`]
//! on the owning session task's queue, in order.

use crate::error::Result;
use crate::peer::media::LocalMedia;
use crate::peer::types::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Peer transport connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    CandidateGathered(IceCandidate),
    RemoteTrack { kind: String, track_id: String },
    StateChanged(TransportState),
}

pub type ChannelEvents = mpsc::UnboundedSender<ChannelEvent>;

#[async_trait]
pub trait NegotiationChannel: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn has_remote_description(&self) -> bool;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Builds channels, attaching local media when given
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open(
        &self,
        peer_id: &str,
        media: Option<&LocalMedia>,
        events: ChannelEvents,
    ) -> Result<Arc<dyn NegotiationChannel>>;
}
