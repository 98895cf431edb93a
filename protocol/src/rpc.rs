/*!
HTTP-like request/response envelopes carried over the open data channel.

The data channel frames messages itself, so each envelope is sent as exactly one text message.
 */

use crate::ProtocolError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id, echoed by the response. Older peers leave it out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Absent `data` decodes as `null`.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RpcResponse {
    /// `data` as text when the other side answered with a string.
    pub fn text(&self) -> Option<&str> {
        self.data.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Request(RpcRequest),
    Response(RpcResponse),
}

impl Envelope {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
