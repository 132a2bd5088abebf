//! Relay connection lifecycle.
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected`, forever. Every
//! time the link comes up a `join` goes out, and a `presence` heartbeat
//! follows each `presence_interval` while it stays up. A dropped or refused
//! connection is retried after a fixed `reconnect_delay`, with no backoff
//! growth and no retry cap.

use crate::relay::{LinkSlot, RelayLink, RelaySender, RelayState, RelayTransport};
use crate::signaling::{Envelope, Peer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Dropped,
    Shutdown,
}

pub struct ConnectionSupervisor {
    transport: Arc<dyn RelayTransport>,
    self_peer: Peer,
    presence_interval: Duration,
    reconnect_delay: Duration,
    slot: LinkSlot,
    sender: RelaySender,
    state: watch::Sender<RelayState>,
    frames: mpsc::UnboundedSender<String>,
}

/// Owner side of a running supervisor
pub struct SupervisorHandle {
    sender: RelaySender,
    state: watch::Receiver<RelayState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn sender(&self) -> RelaySender {
        self.sender.clone()
    }

    pub fn state(&self) -> watch::Receiver<RelayState> {
        self.state.clone()
    }

    /// Stops the loop and waits for it to release the link
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Supervisor task ended abnormally: {}", e);
        }
    }
}

impl ConnectionSupervisor {
    /// Starts the connect loop. Inbound text frames are forwarded to `frames`.
    pub fn spawn(
        transport: Arc<dyn RelayTransport>,
        self_peer: Peer,
        presence_interval: Duration,
        reconnect_delay: Duration,
        frames: mpsc::UnboundedSender<String>,
    ) -> SupervisorHandle {
        let (slot, sender) = RelaySender::slot();
        let (state_tx, state_rx) = watch::channel(RelayState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = ConnectionSupervisor {
            transport,
            self_peer,
            presence_interval,
            reconnect_delay,
            slot,
            sender: sender.clone(),
            state: state_tx,
            frames,
        };
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        SupervisorHandle {
            sender,
            state: state_rx,
            shutdown: shutdown_tx,
            task,
        }
    }

    fn set_state(&self, state: RelayState) {
        debug!("Relay state -> {:?}", state);
        self.state.send_replace(state);
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            self.set_state(RelayState::Connecting);
            let connected = tokio::select! {
                res = self.transport.connect() => res,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok(link) => {
                    if self.serve(link, &mut shutdown).await == Exit::Shutdown {
                        break;
                    }
                }
                Err(e) if e.is_retryable() => warn!("Relay connect failed: {}", e),
                Err(e) => error!("Relay connect failed: {}", e),
            }

            self.set_state(RelayState::Disconnected);
            info!("Reconnecting to relay in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = sleep(self.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.slot.send_replace(None);
        self.set_state(RelayState::Disconnected);
        debug!("Supervisor stopped");
    }

    async fn serve(&self, link: RelayLink, shutdown: &mut watch::Receiver<bool>) -> Exit {
        let RelayLink {
            outbound,
            mut inbound,
        } = link;
        self.slot.send_replace(Some(outbound));
        self.set_state(RelayState::Connected);
        self.sender.send(&Envelope::join(&self.self_peer));

        let mut heartbeat = interval_at(
            Instant::now() + self.presence_interval,
            self.presence_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(text) => {
                        if self.frames.send(text).is_err() {
                            break Exit::Shutdown;
                        }
                    }
                    None => {
                        info!("Relay connection lost");
                        break Exit::Dropped;
                    }
                },
                _ = heartbeat.tick() => {
                    self.sender.send(&Envelope::presence(&self.self_peer, None));
                }
                _ = shutdown.changed() => break Exit::Shutdown,
            }
        };

        self.slot.send_replace(None);
        exit
    }
}
