/*!
Request/response framing over an open data channel.

Each request carries a numeric id that the response echoes. Peers that leave the id
out get the older behaviour, where a response answers the most recent request.
*/

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use log::{debug, error, warn};

use webrtc_http_protocol::rpc::{Envelope, RpcRequest, RpcResponse};

use crate::peer::{ChannelState, DataChannel};
use crate::{Error, Result};

/// The application that produces response bodies.
///
/// Application level failures are answered as `Err` with a display string, which is sent
/// back as the response data.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle_request(&self, request: &RpcRequest) -> std::result::Result<String, String>;
}

pub struct FnHandler<F>(F);

/// Wrap a synchronous closure as a [RequestHandler].
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&RpcRequest) -> std::result::Result<String, String> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> RequestHandler for FnHandler<F>
where
    F: Fn(&RpcRequest) -> std::result::Result<String, String> + Send + Sync,
{
    async fn handle_request(&self, request: &RpcRequest) -> std::result::Result<String, String> {
        (self.0)(request)
    }
}

/// Data channel with the RPC envelope on top.
#[derive(Clone)]
pub struct RpcChannel {
    channel: Arc<dyn DataChannel>,
    next_id: Arc<AtomicU64>,
}

impl RpcChannel {
    pub fn new(channel: Arc<dyn DataChannel>) -> Self {
        RpcChannel {
            channel,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Send one request and return its id. Nothing is sent unless the channel is open.
    pub async fn send_request(&self, path: &str, method: &str, body: Option<String>) -> Result<u64> {
        let state = self.channel.state();
        if state != ChannelState::Open {
            return Err(Error::ChannelNotOpen(state));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::Request(RpcRequest {
            id: Some(id),
            path: path.to_owned(),
            method: method.to_owned(),
            body,
        });
        self.channel.send_text(envelope.to_json()?).await?;
        debug!("request {id} sent: {method} {path}");
        Ok(id)
    }

    /// Handle one raw message from the channel.
    ///
    /// Requests are answered through `handler`; responses are returned to the caller.
    /// Malformed messages are logged and discarded.
    pub async fn on_message(
        &self,
        raw: &str,
        handler: Option<&dyn RequestHandler>,
    ) -> Option<RpcResponse> {
        let envelope = match Envelope::from_json(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("discarding data channel message: {e}");
                return None;
            }
        };
        match envelope {
            Envelope::Response(response) => Some(response),
            Envelope::Request(request) => {
                let Some(handler) = handler else {
                    warn!("no request handler, dropping {} {}", request.method, request.path);
                    return None;
                };
                let data = dispatch(handler, &request).await;
                let response = Envelope::Response(RpcResponse {
                    id: request.id,
                    data: serde_json::Value::String(data),
                });
                match response.to_json() {
                    Ok(text) => {
                        if let Err(e) = self.channel.send_text(text).await {
                            error!("failed to answer {} {}: {e}", request.method, request.path);
                        }
                    }
                    Err(e) => error!("failed to encode response: {e}"),
                }
                None
            }
        }
    }
}

async fn dispatch(handler: &dyn RequestHandler, request: &RpcRequest) -> String {
    match AssertUnwindSafe(handler.handle_request(request))
        .catch_unwind()
        .await
    {
        Ok(Ok(body)) => body,
        Ok(Err(message)) => message,
        Err(_) => {
            error!("request handler panicked on {} {}", request.method, request.path);
            "500 Internal Server Error: request handler panicked".to_owned()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peer::MockDataChannel;
    use serde_json::json;

    fn open_channel() -> MockDataChannel {
        let mut channel = MockDataChannel::new();
        channel.expect_state().return_const(ChannelState::Open);
        channel
    }

    #[tokio::test]
    async fn request_is_not_sent_on_closed_channel() {
        for state in [
            ChannelState::Connecting,
            ChannelState::Closing,
            ChannelState::Closed,
        ] {
            let mut channel = MockDataChannel::new();
            channel.expect_state().return_const(state);
            channel.expect_send_text().never();
            let rpc = RpcChannel::new(Arc::new(channel));
            let result = rpc.send_request("/greet", "GET", None).await;
            assert!(matches!(result, Err(Error::ChannelNotOpen(s)) if s == state));
        }
    }

    #[tokio::test]
    async fn request_is_sent_as_one_message() {
        let mut channel = open_channel();
        channel
            .expect_send_text()
            .withf(|text| {
                let value: serde_json::Value = serde_json::from_str(text).unwrap();
                value == json!({"type": "request", "id": 1, "path": "/greet", "method": "GET", "body": null})
            })
            .times(1)
            .returning(|_| Ok(()));
        let rpc = RpcChannel::new(Arc::new(channel));
        assert_eq!(rpc.send_request("/greet", "GET", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn request_is_answered_with_handler_result() {
        let mut channel = open_channel();
        channel
            .expect_send_text()
            .withf(|text| {
                let value: serde_json::Value = serde_json::from_str(text).unwrap();
                value == json!({"type": "response", "id": 7, "data": "Hello, World!"})
            })
            .times(1)
            .returning(|_| Ok(()));
        let mut handler = MockRequestHandler::new();
        handler
            .expect_handle_request()
            .withf(|request| request.path == "/greet" && request.method == "GET" && request.body.is_none())
            .times(1)
            .returning(|_| Ok("Hello, World!".to_owned()));

        let rpc = RpcChannel::new(Arc::new(channel));
        let raw = json!({"type": "request", "id": 7, "path": "/greet", "method": "GET"}).to_string();
        assert_eq!(rpc.on_message(&raw, Some(&handler)).await, None);
    }

    #[tokio::test]
    async fn handler_error_becomes_response_data() {
        let mut channel = open_channel();
        channel
            .expect_send_text()
            .withf(|text| text.contains("404 Not Found"))
            .times(1)
            .returning(|_| Ok(()));
        let handler = handler_fn(|_| Err("404 Not Found".to_owned()));

        let rpc = RpcChannel::new(Arc::new(channel));
        let raw = json!({"type": "request", "path": "/missing", "method": "GET", "body": null}).to_string();
        rpc.on_message(&raw, Some(&handler)).await;
    }

    #[tokio::test]
    async fn panicking_handler_still_gets_a_response() {
        let mut channel = open_channel();
        channel
            .expect_send_text()
            .withf(|text| text.contains("panicked"))
            .times(1)
            .returning(|_| Ok(()));
        let handler = handler_fn(|_| panic!("interpreter crashed"));

        let rpc = RpcChannel::new(Arc::new(channel));
        let raw = json!({"type": "request", "path": "/", "method": "GET"}).to_string();
        rpc.on_message(&raw, Some(&handler)).await;
    }

    #[tokio::test]
    async fn responses_are_surfaced() {
        let mut channel = MockDataChannel::new();
        channel.expect_send_text().never();
        let rpc = RpcChannel::new(Arc::new(channel));
        let response = rpc
            .on_message(r#"{"type":"response","data":"Hello, World!"}"#, None)
            .await
            .unwrap();
        assert_eq!(response.text(), Some("Hello, World!"));
        assert_eq!(response.id, None);
    }

    #[tokio::test]
    async fn malformed_messages_are_dropped() {
        let mut channel = MockDataChannel::new();
        channel.expect_send_text().never();
        channel.expect_close().never();
        let rpc = RpcChannel::new(Arc::new(channel));
        assert_eq!(rpc.on_message("{oops", None).await, None);
        assert_eq!(rpc.on_message(r#"{"type":"rumor"}"#, None).await, None);
    }
}
