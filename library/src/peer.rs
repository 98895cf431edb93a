/*!
Seams between the negotiation state machine and a concrete WebRTC implementation.

A [PeerConnector] creates one [PeerConnection] per connection attempt. Everything the
connection reports on its own (gathered candidates, the arrival of a remote data channel,
channel lifecycle, incoming messages) is pushed as a [PeerEvent] into the channel
handed to [PeerConnector::connect].
*/

use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use webrtc_http_protocol::one_to_one::{IceCandidate, SessionDescription};

use crate::Result;

/// Label of the single data channel the server role creates.
pub const DATA_CHANNEL_LABEL: &str = "dataChannel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl Display for ChannelState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

pub enum PeerEvent {
    /// A local candidate to hand to the other peer
    IceCandidate(IceCandidate),
    /// The other peer created a data channel
    DataChannel(Arc<dyn DataChannel>),
    ChannelOpen,
    ChannelMessage(String),
    ChannelClosed,
    /// ICE or DTLS gave up
    ConnectionFailed(String),
}

impl Debug for PeerEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::IceCandidate(candidate) => f.debug_tuple("IceCandidate").field(candidate).finish(),
            PeerEvent::DataChannel(channel) => f.debug_tuple("DataChannel").field(&channel.label()).finish(),
            PeerEvent::ChannelOpen => f.write_str("ChannelOpen"),
            PeerEvent::ChannelMessage(text) => f.debug_tuple("ChannelMessage").field(text).finish(),
            PeerEvent::ChannelClosed => f.write_str("ChannelClosed"),
            PeerEvent::ConnectionFailed(reason) => f.debug_tuple("ConnectionFailed").field(reason).finish(),
        }
    }
}

pub type PeerEvents = mpsc::UnboundedSender<PeerEvent>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;

    fn state(&self) -> ChannelState;

    /// Send one text message. Fails unless the channel is [ChannelState::Open].
    async fn send_text(&self, text: String) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Must be called before [PeerConnection::create_offer] so the channel ends up in the offer.
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Requires a remote offer to be set.
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Fails while no remote description is set.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Build a fresh connection that reports to `events`.
    async fn connect(&self, events: PeerEvents) -> Result<Arc<dyn PeerConnection>>;
}
