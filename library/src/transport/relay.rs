//! Client side of the signaling server's websocket protocol.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use webrtc_http_protocol::one_to_one::SignalMessage;
use webrtc_http_protocol::SessionId;

use super::SignalingTransport;
use crate::{Error, Result};

pub struct RelayTransport {
    outgoing: mpsc::UnboundedSender<Message>,
    incoming: mpsc::UnboundedReceiver<SignalMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RelayTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        info!("connected to signaling server at {url}");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = ws_write.send(message).await {
                    error!("websocket send error: {e}");
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            while let Some(result) = ws_read.next().await {
                let text = match result {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("dropping non UTF-8 frame from signaling server");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        error!("websocket error: {e}");
                        break;
                    }
                };
                match SignalMessage::from_json(&text) {
                    Ok(message) => {
                        debug!("received {} from signaling server", message.kind());
                        if incoming_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("discarding message from signaling server: {e}"),
                }
            }
            info!("disconnected from signaling server");
        });

        Ok(RelayTransport {
            outgoing,
            incoming,
            reader,
            writer,
        })
    }
}

#[async_trait]
impl SignalingTransport for RelayTransport {
    async fn send(&mut self, message: SignalMessage) -> Result<()> {
        let text = message.to_json()?;
        self.outgoing
            .send(Message::Text(text))
            .map_err(|_| Error::TransportClosed)
    }

    async fn recv(&mut self) -> Option<SignalMessage> {
        self.incoming.recv().await
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Ask the signaling server whether a server is currently registered as `name`.
pub async fn probe(url: &str, name: &SessionId) -> Result<bool> {
    let mut transport = RelayTransport::connect(url).await?;
    transport
        .send(SignalMessage::Search {
            server_name: name.clone(),
        })
        .await?;
    while let Some(message) = transport.recv().await {
        match message {
            SignalMessage::Found { name: found } if &found == name => return Ok(true),
            SignalMessage::NotFound { name: missing } if &missing == name => return Ok(false),
            other => debug!("ignoring {} while probing {name}", other.kind()),
        }
    }
    Err(Error::TransportClosed)
}
