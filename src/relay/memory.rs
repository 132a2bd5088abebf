//! In-process relay hub for loopback lobbies and tests.
//!
//! Behaves like the hosted relay: every frame from any client goes verbatim
//! to every connected client, the sender included.

use super::{RelayLink, RelayTransport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct Hub {
    clients: Vec<(u64, mpsc::UnboundedSender<String>)>,
    observers: Vec<mpsc::UnboundedSender<String>>,
    next_id: u64,
    unreachable: bool,
}

#[derive(Clone, Default)]
pub struct MemoryRelay {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every client connection, as a relay restart would
    pub fn disconnect_all(&self) {
        let dropped = std::mem::take(&mut self.hub().clients);
        debug!("Memory relay dropped {} clients", dropped.len());
    }

    /// While unreachable, `connect` fails
    pub fn set_reachable(&self, reachable: bool) {
        self.hub().unreachable = !reachable;
    }

    pub fn client_count(&self) -> usize {
        self.hub().clients.len()
    }

    /// Tap receiving a copy of every frame relayed from now on
    pub fn observe(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub().observers.push(tx);
        rx
    }

    /// Returns false once `from` is no longer connected
    fn fan_out(&self, from: u64, text: String) -> bool {
        let mut hub = self.hub();
        if !hub.clients.iter().any(|(id, _)| *id == from) {
            return false;
        }
        hub.observers.retain(|tx| tx.send(text.clone()).is_ok());
        hub.clients.retain(|(_, tx)| tx.send(text.clone()).is_ok());
        true
    }
}

#[async_trait]
impl RelayTransport for MemoryRelay {
    async fn connect(&self) -> Result<RelayLink> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        let id = {
            let mut hub = self.hub();
            if hub.unreachable {
                return Err(Error::Transport("memory relay unreachable".into()));
            }
            hub.next_id += 1;
            let id = hub.next_id;
            hub.clients.push((id, in_tx));
            id
        };

        let relay = self.clone();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if !relay.fan_out(id, text) {
                    break;
                }
            }
            debug!("Memory relay client {} finished", id);
        });

        Ok(RelayLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
