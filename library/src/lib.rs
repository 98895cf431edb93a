/*!
Library for exchanging HTTP-like requests and responses over a WebRTC DataChannel.

Two endpoints meet under a session name. The server role waits for a client,
makes an offer, and serves requests with a [RequestHandler]. Negotiation
messages travel over a pluggable [transport::SignalingTransport]: an in-process
[transport::LocalBus] or the websocket relay of
[webrtc-http-signaling-server](../webrtc_http_signaling_server/index.html).
Once the data channel is open, signaling is no longer used.

# Example

```no_run
use webrtc_http::one_to_one::NetworkManager;
use webrtc_http::transport::TransportConfig;
use webrtc_http::{handler_fn, ConnectionType, SessionId};

# async fn run() -> webrtc_http::Result<()> {
let transport = TransportConfig::Relay { url: "ws://127.0.0.1:8080".to_owned() };

let mut server = NetworkManager::new(ConnectionType::Local, transport.clone())
    .with_request_handler(handler_fn(|request| match request.path.as_str() {
        "/" => Ok("Hello, World!".to_owned()),
        _ => Ok("404 Not Found".to_owned()),
    }));
server.connect_as_server(SessionId::new("my-session")).await?;

let mut client = NetworkManager::new(ConnectionType::Local, transport);
client.connect_as_client(SessionId::new("my-session")).await?;
client.wait_until_connected().await?;
client.send_request("/", "GET", None).await?;
let response = client.next_response().await;
# Ok(())
# }
```
*/

mod backend;
mod error;
pub mod loopback;
pub mod one_to_one;
pub mod peer;
pub mod rpc;
pub mod transport;
mod utils;

pub use backend::{WebRtcChannel, WebRtcPeer};
pub use error::{Error, Result};
pub use rpc::{handler_fn, RequestHandler, RpcChannel};
pub use utils::ConnectionType;
pub use webrtc_http_protocol::rpc::{RpcRequest, RpcResponse};
pub use webrtc_http_protocol::{ClientId, Role, SessionId};
