/*!
Signaling server for [webrtc-http](../webrtc_http/index.html).

Servers register under a session name, clients announce themselves with `ready`,
and every later negotiation message is forwarded by name or client id.
The server holds no state beyond two in-memory registries.
*/

pub mod one_to_one;
pub mod relay;

pub use one_to_one::{signaling_filter, RelayState};
pub use relay::{ConnectionId, Outbound, Relay};
