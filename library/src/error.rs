use webrtc_http_protocol::ProtocolError;

use crate::peer::ChannelState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("signaling transport error: {0}")]
    Transport(String),

    #[error("signaling transport closed")]
    TransportClosed,

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("peer connection error: {0}")]
    Peer(String),

    #[error("data channel is not open ({0})")]
    ChannelNotOpen(ChannelState),

    #[error("no data channel yet")]
    NoChannel,

    #[error("no session started")]
    NoSession,

    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
