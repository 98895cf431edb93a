/*!
Signaling messages exchanged between the server role, the client role and the signaling server
to set up a one-to-one data channel.
 */

use crate::{ClientId, ProtocolError, Role, SessionId};
use serde::{Deserialize, Serialize};

/// Kind of a session description, serialized the way browsers do.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// SDP blob passed to the other peer without modifications.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Network path proposal, shaped like `RTCIceCandidate.toJSON()`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Every message understood by the signaling layer.
///
/// Messages a peer sends carry enough addressing (`serverName` and/or `clientId`)
/// for the relay to route them. The relay annotates what it forwards with `from`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Server endpoint announcing itself under a session name
    #[serde(rename_all = "camelCase")]
    Register { server_name: SessionId },
    /// Liveness probe for a session name
    #[serde(rename_all = "camelCase")]
    Search { server_name: SessionId },
    /// Relay reply to [SignalMessage::Search]
    Found { name: SessionId },
    /// Relay reply to [SignalMessage::Search]
    NotFound { name: SessionId },
    /// Client announcing it wants to connect to `server_name`
    #[serde(rename_all = "camelCase")]
    Ready {
        server_name: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientId>,
    },
    /// SDP Offer of the server, addressed to one client
    #[serde(rename_all = "camelCase")]
    Offer {
        offer: SessionDescription,
        client_id: ClientId,
        server_name: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<SessionId>,
    },
    /// SDP Answer of the client, addressed to the server
    #[serde(rename_all = "camelCase")]
    Answer {
        answer: SessionDescription,
        server_name: SessionId,
        client_id: ClientId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientId>,
    },
    /// ICE candidate of either side, `target` names the receiving role
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        candidate: IceCandidate,
        target: Role,
        client_id: ClientId,
        server_name: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
}

impl SignalMessage {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire tag of the message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Register { .. } => "register",
            SignalMessage::Search { .. } => "search",
            SignalMessage::Found { .. } => "found",
            SignalMessage::NotFound { .. } => "not-found",
            SignalMessage::Ready { .. } => "ready",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
        }
    }
}
