pub mod channel;
pub mod connection;
pub mod ice;
pub mod media;
pub(crate) mod state;
pub(crate) mod task;
pub mod types;

pub use channel::{ChannelEvent, ChannelEvents, ChannelFactory, NegotiationChannel, TransportState};
pub use connection::{RtcChannel, RtcChannelFactory};
pub use media::{LocalMedia, MediaEngine, MediaPool, TrackMediaEngine};
pub use types::{IceCandidate, SdpKind, ServerConfig, SessionDescription};
