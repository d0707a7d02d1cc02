//! Socket transport for the event bus.
//!
//! A [`BusConnector`] opens one authenticated connection and hands back a pair
//! of frame channels. The client owns reconnects and room replay; the
//! transport only moves frames.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::events::Frame;
use crate::error::{CoreError, Result};
use crate::models::Identity;

/// An open connection. Dropping `outbound` closes the socket; `inbound`
/// ends when the server closes it or the network drops.
pub struct BusLink {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn open(&self, identity: &Identity) -> Result<BusLink>;
}

/// WebSocket connector speaking JSON text frames `{"event": ..., "data": ...}`.
pub struct WsConnector {
    url: String,
    token: Option<String>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }
}

#[async_trait]
impl BusConnector for WsConnector {
    async fn open(&self, identity: &Identity) -> Result<BusLink> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| CoreError::transport(format!("invalid bus url: {}", e)))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| CoreError::transport(format!("invalid token: {}", e)))?;
            request.headers_mut().insert("authorization", value);
        }

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| CoreError::transport(format!("bus connect failed: {}", e)))?;
        debug!(identity = %identity, url = %self.url, "bus socket open");

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Frame>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(event = %frame.event, error = %e, "failed to encode frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => {
                            if inbound_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping undecodable bus frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "bus socket error");
                        break;
                    }
                }
            }
        });

        Ok(BusLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
