use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use log::{debug, info, warn};

use webrtc_http_protocol::one_to_one::SignalMessage;
use webrtc_http_protocol::{ClientId, Role, SessionId};

/// Identifier of one websocket connection to the relay.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A message the relay wants delivered to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: ConnectionId,
    pub message: SignalMessage,
}

/// Routing core of the signaling server.
///
/// One connection may be registered as a server and as a client at the same time.
#[derive(Debug, Default)]
pub struct Relay {
    servers: HashMap<SessionId, ConnectionId>,
    clients: HashMap<ClientId, ConnectionId>,
}

impl Relay {
    pub fn server(&self, name: &SessionId) -> Option<ConnectionId> {
        self.servers.get(name).copied()
    }

    pub fn client(&self, id: &ClientId) -> Option<ConnectionId> {
        self.clients.get(id).copied()
    }

    /// Apply one inbound message and return what has to be sent, if anything.
    /// Messages that cannot be routed are logged and dropped.
    pub fn route(&mut self, from: ConnectionId, message: SignalMessage) -> Option<Outbound> {
        match message {
            SignalMessage::Register { server_name } => {
                if let Some(previous) = self.servers.insert(server_name.clone(), from) {
                    if previous != from {
                        warn!("server name {server_name} taken over by {from} from {previous}");
                    }
                }
                info!("server registered: {server_name} ({from})");
                None
            }
            SignalMessage::Search { server_name } => {
                let message = if self.servers.contains_key(&server_name) {
                    SignalMessage::Found { name: server_name }
                } else {
                    SignalMessage::NotFound { name: server_name }
                };
                Some(Outbound { to: from, message })
            }
            SignalMessage::Ready {
                server_name,
                client_id,
                ..
            } => {
                let client_id = match client_id {
                    Some(client_id) => client_id,
                    None => {
                        warn!("ready from {from} without clientId, dropping");
                        return None;
                    }
                };
                self.clients.insert(client_id.clone(), from);
                debug!("client {client_id} ({from}) ready for {server_name}");
                let to = self.lookup_server(&server_name)?;
                Some(Outbound {
                    to,
                    message: SignalMessage::Ready {
                        server_name,
                        client_id: None,
                        from: Some(client_id),
                    },
                })
            }
            SignalMessage::Offer {
                offer,
                client_id,
                server_name,
                ..
            } => {
                let to = self.lookup_client(&client_id)?;
                Some(Outbound {
                    to,
                    message: SignalMessage::Offer {
                        offer,
                        client_id,
                        from: Some(server_name.clone()),
                        server_name,
                    },
                })
            }
            SignalMessage::Answer {
                answer,
                server_name,
                client_id,
                ..
            } => {
                let to = self.lookup_server(&server_name)?;
                Some(Outbound {
                    to,
                    message: SignalMessage::Answer {
                        answer,
                        server_name,
                        from: Some(client_id.clone()),
                        client_id,
                    },
                })
            }
            SignalMessage::IceCandidate {
                candidate,
                target,
                client_id,
                server_name,
                ..
            } => {
                let (to, sender) = match target {
                    Role::Server => (self.lookup_server(&server_name)?, client_id.to_string()),
                    Role::Client => (self.lookup_client(&client_id)?, server_name.to_string()),
                };
                Some(Outbound {
                    to,
                    message: SignalMessage::IceCandidate {
                        candidate,
                        target,
                        client_id,
                        server_name,
                        from: Some(sender),
                    },
                })
            }
            message @ (SignalMessage::Found { .. } | SignalMessage::NotFound { .. }) => {
                warn!("{from} sent relay-only message {}, dropping", message.kind());
                None
            }
        }
    }

    /// Forget every registry entry held by a closed connection.
    pub fn remove_connection(&mut self, connection: ConnectionId) {
        self.servers.retain(|name, held_by| {
            let keep = *held_by != connection;
            if !keep {
                info!("server unregistered: {name} ({connection})");
            }
            keep
        });
        self.clients.retain(|id, held_by| {
            let keep = *held_by != connection;
            if !keep {
                debug!("client removed: {id} ({connection})");
            }
            keep
        });
    }

    fn lookup_server(&self, name: &SessionId) -> Option<ConnectionId> {
        let found = self.server(name);
        if found.is_none() {
            warn!("no server registered as {name}, dropping message");
        }
        found
    }

    fn lookup_client(&self, id: &ClientId) -> Option<ConnectionId> {
        let found = self.client(id);
        if found.is_none() {
            warn!("no client with id {id}, dropping message");
        }
        found
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use webrtc_http_protocol::one_to_one::{IceCandidate, SessionDescription};

    const A: ConnectionId = ConnectionId(1);
    const B: ConnectionId = ConnectionId(2);

    fn register(relay: &mut Relay, conn: ConnectionId, name: &str) {
        assert_eq!(
            relay.route(
                conn,
                SignalMessage::Register {
                    server_name: name.into()
                }
            ),
            None
        );
    }

    fn ready(relay: &mut Relay, conn: ConnectionId, name: &str, client: &str) -> Option<Outbound> {
        relay.route(
            conn,
            SignalMessage::Ready {
                server_name: name.into(),
                client_id: Some(client.into()),
                from: None,
            },
        )
    }

    fn candidate() -> IceCandidate {
        IceCandidate {
            candidate: "candidate:0 1 udp 1 127.0.0.1 9 typ host".to_owned(),
            sdp_mid: Some("0".to_owned()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn search_reports_registered_names_only() {
        let mut relay = Relay::default();
        register(&mut relay, A, "S");
        let found = relay.route(B, SignalMessage::Search { server_name: "S".into() });
        assert_eq!(
            found,
            Some(Outbound {
                to: B,
                message: SignalMessage::Found { name: "S".into() }
            })
        );
        let missing = relay.route(B, SignalMessage::Search { server_name: "nope".into() });
        assert_eq!(
            missing,
            Some(Outbound {
                to: B,
                message: SignalMessage::NotFound { name: "nope".into() }
            })
        );
    }

    #[test]
    fn ready_is_forwarded_to_server_with_sender_id() {
        let mut relay = Relay::default();
        register(&mut relay, A, "X");
        let outbound = ready(&mut relay, B, "X", "c1").unwrap();
        assert_eq!(outbound.to, A);
        assert_eq!(
            outbound.message,
            SignalMessage::Ready {
                server_name: "X".into(),
                client_id: None,
                from: Some("c1".into()),
            }
        );
        assert_eq!(relay.client(&"c1".into()), Some(B));
    }

    #[test]
    fn ready_for_unknown_server_still_registers_client() {
        let mut relay = Relay::default();
        assert_eq!(ready(&mut relay, B, "X", "c1"), None);
        assert_eq!(relay.client(&"c1".into()), Some(B));
    }

    #[test]
    fn offer_and_answer_are_routed_by_address() {
        let mut relay = Relay::default();
        register(&mut relay, A, "X");
        ready(&mut relay, B, "X", "c1");

        let offer = relay
            .route(
                A,
                SignalMessage::Offer {
                    offer: SessionDescription::offer("v=0"),
                    client_id: "c1".into(),
                    server_name: "X".into(),
                    from: None,
                },
            )
            .unwrap();
        assert_eq!(offer.to, B);
        assert!(matches!(offer.message, SignalMessage::Offer { from: Some(ref f), .. } if f.as_str() == "X"));

        let answer = relay
            .route(
                B,
                SignalMessage::Answer {
                    answer: SessionDescription::answer("v=0"),
                    server_name: "X".into(),
                    client_id: "c1".into(),
                    from: None,
                },
            )
            .unwrap();
        assert_eq!(answer.to, A);
        assert!(matches!(answer.message, SignalMessage::Answer { from: Some(ref f), .. } if f.as_str() == "c1"));
    }

    #[test]
    fn ice_candidates_follow_target() {
        let mut relay = Relay::default();
        register(&mut relay, A, "X");
        ready(&mut relay, B, "X", "c1");

        let to_server = relay
            .route(
                B,
                SignalMessage::IceCandidate {
                    candidate: candidate(),
                    target: Role::Server,
                    client_id: "c1".into(),
                    server_name: "X".into(),
                    from: None,
                },
            )
            .unwrap();
        assert_eq!(to_server.to, A);
        assert!(matches!(to_server.message, SignalMessage::IceCandidate { from: Some(ref f), .. } if f == "c1"));

        let to_client = relay
            .route(
                A,
                SignalMessage::IceCandidate {
                    candidate: candidate(),
                    target: Role::Client,
                    client_id: "c1".into(),
                    server_name: "X".into(),
                    from: None,
                },
            )
            .unwrap();
        assert_eq!(to_client.to, B);
        assert!(matches!(to_client.message, SignalMessage::IceCandidate { from: Some(ref f), .. } if f == "X"));
    }

    #[test]
    fn unroutable_messages_are_dropped() {
        let mut relay = Relay::default();
        let answer = relay.route(
            B,
            SignalMessage::Answer {
                answer: SessionDescription::answer("v=0"),
                server_name: "ghost".into(),
                client_id: "c1".into(),
                from: None,
            },
        );
        assert_eq!(answer, None);
        assert_eq!(relay.route(A, SignalMessage::Found { name: "X".into() }), None);
    }

    #[test]
    fn closing_removes_both_server_and_client_entries() {
        let mut relay = Relay::default();
        register(&mut relay, A, "S");
        ready(&mut relay, A, "S", "C");
        register(&mut relay, B, "other");

        relay.remove_connection(A);

        assert_eq!(relay.server(&"S".into()), None);
        assert_eq!(relay.client(&"C".into()), None);
        assert_eq!(relay.server(&"other".into()), Some(B));
        let search = relay.route(B, SignalMessage::Search { server_name: "S".into() }).unwrap();
        assert_eq!(search.message, SignalMessage::NotFound { name: "S".into() });
    }
}
