/*!
Signaling transports carrying negotiation messages until the data channel is open.

Both implementations speak the same [SignalMessage] shapes. The negotiation state
machine is written once against [SignalingTransport].
*/

use async_trait::async_trait;

use webrtc_http_protocol::one_to_one::SignalMessage;
use webrtc_http_protocol::{ClientId, SessionId};

use crate::Result;

mod local;
pub mod relay;

pub use local::{LocalBus, LocalTransport};
pub use relay::RelayTransport;

#[async_trait]
pub trait SignalingTransport: Send {
    async fn send(&mut self, message: SignalMessage) -> Result<()>;

    /// Next message for this endpoint, `None` once the transport is closed.
    /// Malformed payloads are logged and skipped. Cancel safe.
    async fn recv(&mut self) -> Option<SignalMessage>;
}

/// Which transport a session opens.
#[derive(Clone, Debug)]
pub enum TransportConfig {
    /// In-process broadcast, only peers sharing the bus see each other
    Local(LocalBus),
    /// Websocket connection to a signaling server
    Relay { url: String },
}

impl TransportConfig {
    pub async fn open(&self, session_id: &SessionId) -> Result<Box<dyn SignalingTransport>> {
        match self {
            TransportConfig::Local(bus) => Ok(Box::new(bus.open(session_id))),
            TransportConfig::Relay { url } => Ok(Box::new(RelayTransport::connect(url).await?)),
        }
    }

    /// Id a client uses for one attempt. The local topic has room for a single client.
    pub fn client_id(&self) -> ClientId {
        match self {
            TransportConfig::Local(_) => ClientId::local(),
            TransportConfig::Relay { .. } => ClientId::random(),
        }
    }
}
