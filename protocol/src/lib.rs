/*!
Helper crate that declares common types and structures shared between [webrtc-http](../webrtc_http/index.html)
and [webrtc-http-signaling-server](../webrtc_http_signaling_server/index.html).

Everything here travels as newline-free JSON text, one message per frame.
*/

use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    fmt::{Display, Formatter},
    str::FromStr,
};

pub mod one_to_one;
pub mod rpc;

/// Port the signaling server listens on when none is configured.
pub const DEFAULT_RELAY_PORT: u16 = 8080;

/// Bare payload a client posts on the local broadcast topic to announce itself.
pub const LOCAL_READY: &str = "ready";

/// Client id used on the local broadcast transport, where there is exactly one client per topic.
pub const LOCAL_CLIENT_ID: &str = "local";

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message is not valid UTF-8 text")]
    NotText,
}

/// Unique identifier of signaling session that the server role picks
/// and communicates to the client out of band.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap String into a SessionId struct
    pub fn new(inner: impl Into<String>) -> Self {
        SessionId(inner.into())
    }

    /// Name of the in-process broadcast topic for this session.
    pub fn local_topic(&self) -> String {
        format!("channel_{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Acquire the underlying type
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SessionId(s.to_owned()))
    }
}

impl From<&str> for SessionId {
    fn from(val: &str) -> Self {
        SessionId::new(val)
    }
}

/// Identifier of a client endpoint, used by the relay to route offers back to it.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(inner: impl Into<String>) -> Self {
        ClientId(inner.into())
    }

    /// Fresh id for one connection attempt.
    pub fn random() -> Self {
        ClientId(uuid::Uuid::new_v4().to_string())
    }

    /// The fixed id used on the local broadcast transport.
    pub fn local() -> Self {
        ClientId(LOCAL_CLIENT_ID.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Acquire the underlying type
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<&str> for ClientId {
    fn from(val: &str) -> Self {
        ClientId::new(val)
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the one-to-one connection an endpoint plays.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// The role at the other end of the connection.
    pub fn opposite(self) -> Self {
        match self {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}
