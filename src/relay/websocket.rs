//! WebSocket relay client

use super::{RelayLink, RelayTransport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

pub struct WebSocketRelay {
    url: String,
}

impl WebSocketRelay {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl RelayTransport for WebSocketRelay {
    async fn connect(&self) -> Result<RelayLink> {
        info!("Connecting to relay: {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("Failed to connect to {}: {}", self.url, e)))?;

        info!("Connected to relay");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        // Writer ends when the supervisor drops the link
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("Failed to send relay frame: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Relay writer terminated");
        });

        // Reader ends on close or error; dropping in_tx signals the drop
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        info!("Relay closed the connection: {:?}", frame);
                        break;
                    }
                    Err(e) => {
                        warn!("Relay connection error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            debug!("Relay reader terminated");
        });

        Ok(RelayLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
