//! Bindings from a signaling URL to a live duplex link.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use webswarm_core::protocol::SignalMessage;
use webswarm_core::{Result, WebswarmError};

/// One established connection to a signaling service.
///
/// Dropping `tx` closes the link; `rx` yields `None` once the service side is gone.
pub struct Link {
    pub tx: mpsc::UnboundedSender<SignalMessage>,
    pub rx: mpsc::UnboundedReceiver<SignalMessage>,
}

impl Link {
    /// A connected pair of links, each end seeing the other's frames.
    pub fn pair() -> (Link, Link) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Link { tx: a_tx, rx: a_rx }, Link { tx: b_tx, rx: b_rx })
    }
}

/// Opens links to signaling endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Link>;
}

/// JSON text frames over a WebSocket.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| WebswarmError::Transport(format!("websocket connect to {url} failed: {e}")))?;
        let (mut write, mut read) = stream.split();

        let (local, mut remote) = Link::pair();

        // Writer: outbound frames until the client drops its sender.
        tokio::spawn(async move {
            while let Some(msg) = remote.rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(error = %e, "failed to encode signal frame");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    debug!(error = %e, "websocket send failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Reader: inbound frames until the socket closes.
        let inbound = remote.tx;
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        debug!(error = %e, "websocket read failed");
                        break;
                    }
                };
                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                match serde_json::from_str::<SignalMessage>(text.as_str()) {
                    Ok(msg) => {
                        if inbound.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed signal frame"),
                }
            }
        });

        Ok(local)
    }
}
