//! Relay connections.
//!
//! The relay is a dumb fan-out: it forwards every frame to every connected
//! client. A [`RelayTransport`] opens one [`RelayLink`]; the link is gone
//! once its inbound receiver yields `None`.

pub mod memory;
pub mod websocket;

use crate::error::Result;
use crate::signaling::{encode_frame, Envelope};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{trace, warn};

pub use memory::MemoryRelay;
pub use websocket::WebSocketRelay;

/// Relay connection state as seen by the supervisor
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RelayState {
    Disconnected,
    Connecting,
    Connected,
}

/// An open relay connection carrying text frames
pub struct RelayLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn connect(&self) -> Result<RelayLink>;
}

pub(crate) type LinkSlot = watch::Sender<Option<mpsc::UnboundedSender<String>>>;

/// Cheap handle for sending envelopes over whatever link is current.
///
/// Sending while disconnected drops the message: no queueing, no retry.
#[derive(Clone)]
pub struct RelaySender {
    link: watch::Receiver<Option<mpsc::UnboundedSender<String>>>,
}

impl RelaySender {
    pub(crate) fn slot() -> (LinkSlot, RelaySender) {
        let (tx, rx) = watch::channel(None);
        (tx, RelaySender { link: rx })
    }

    /// Sender permanently bound to one channel
    pub fn fixed(outbound: mpsc::UnboundedSender<String>) -> Self {
        let (_slot, rx) = watch::channel(Some(outbound));
        RelaySender { link: rx }
    }

    pub fn is_connected(&self) -> bool {
        self.link
            .borrow()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Returns whether the frame was handed to a live link
    pub fn send(&self, envelope: &Envelope) -> bool {
        let link = self.link.borrow();
        let Some(tx) = link.as_ref() else {
            trace!("Relay not connected, dropping {:?}", envelope.kind);
            return false;
        };
        match encode_frame(envelope) {
            Ok(text) => tx.send(text).is_ok(),
            Err(e) => {
                warn!("Failed to encode {:?}: {}", envelope.kind, e);
                false
            }
        }
    }
}
