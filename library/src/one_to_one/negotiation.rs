use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};

use webrtc_http_protocol::one_to_one::{IceCandidate, SignalMessage};
use webrtc_http_protocol::rpc::RpcResponse;
use webrtc_http_protocol::{ClientId, Role, SessionId};

use crate::peer::{ChannelState, DataChannel, PeerConnection, PeerEvent, DATA_CHANNEL_LABEL};
use crate::rpc::{RequestHandler, RpcChannel};
use crate::transport::SignalingTransport;
use crate::utils::{create_sdp_answer, create_sdp_offer};
use crate::{Error, Result};

/// Where one connection attempt stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    SignalingOpen,
    /// Server sent its offer and waits for the answer
    Offering,
    /// Client announced itself and waits for an offer
    WaitingOffer,
    /// Both descriptions are in place, the channel is not open yet
    Answered,
    Connected,
    Closed,
    Failed(String),
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Closed | NegotiationState::Failed(_))
    }
}

impl Display for NegotiationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationState::Idle => f.write_str("idle"),
            NegotiationState::SignalingOpen => f.write_str("signaling open"),
            NegotiationState::Offering => f.write_str("offering"),
            NegotiationState::WaitingOffer => f.write_str("waiting for offer"),
            NegotiationState::Answered => f.write_str("answered"),
            NegotiationState::Connected => f.write_str("connected"),
            NegotiationState::Closed => f.write_str("closed"),
            NegotiationState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

enum Next {
    Signal(Option<SignalMessage>),
    Peer(Option<PeerEvent>),
}

/// Drives one connection attempt from `Idle` to a terminal state.
///
/// Owns the transport and the peer connection; runs as a single task so every
/// negotiation step on the connection is awaited in sequence.
pub(crate) struct Negotiator {
    pub(crate) role: Role,
    pub(crate) session_id: SessionId,
    /// Own id for the client, the peer's id for the server once it is known
    pub(crate) client_id: Option<ClientId>,
    pub(crate) transport: Option<Box<dyn SignalingTransport>>,
    pub(crate) connection: Arc<dyn PeerConnection>,
    pub(crate) events: mpsc::UnboundedReceiver<PeerEvent>,
    pub(crate) state: watch::Sender<NegotiationState>,
    pub(crate) channel: watch::Sender<Option<RpcChannel>>,
    pub(crate) handler: Option<Arc<dyn RequestHandler>>,
    pub(crate) responses: mpsc::UnboundedSender<RpcResponse>,
    pub(crate) remote_description_set: bool,
    pub(crate) channel_open: bool,
    pub(crate) pending_remote_candidates: Vec<IceCandidate>,
    pub(crate) pending_local_candidates: Vec<IceCandidate>,
}

impl Negotiator {
    pub(crate) async fn run(mut self) {
        if let Err(error) = self.start().await {
            self.fail(error);
        }
        while !self.current_state().is_terminal() {
            let next = tokio::select! {
                message = recv_signal(&mut self.transport) => Next::Signal(message),
                event = self.events.recv() => Next::Peer(event),
            };
            let step = match next {
                Next::Signal(Some(message)) => self.on_signal(message).await,
                Next::Signal(None) => self.on_signaling_closed(),
                Next::Peer(Some(event)) => self.on_peer_event(event).await,
                Next::Peer(None) => Err(Error::Peer("peer connection went away".to_owned())),
            };
            if let Err(error) = step {
                self.fail(error);
            }
        }
        if let Err(error) = self.connection.close().await {
            warn!("closing peer connection for {}: {error}", self.session_id);
        }
    }

    async fn start(&mut self) -> Result<()> {
        self.set_state(NegotiationState::SignalingOpen);
        match self.role {
            Role::Server => {
                self.send_signal(SignalMessage::Register {
                    server_name: self.session_id.clone(),
                })
                .await?;
                let channel = self
                    .connection
                    .create_data_channel(DATA_CHANNEL_LABEL)
                    .await
                    .map_err(|e| Error::Negotiation(format!("failed to create data channel: {e}")))?;
                self.install_channel(channel);
                info!("server {} waiting for a client", self.session_id);
            }
            Role::Client => {
                let client_id = self.client_id.clone().ok_or(Error::NoSession)?;
                self.send_signal(SignalMessage::Ready {
                    server_name: self.session_id.clone(),
                    client_id: Some(client_id),
                    from: None,
                })
                .await?;
                self.set_state(NegotiationState::WaitingOffer);
                info!("client waiting for an offer from {}", self.session_id);
            }
        }
        Ok(())
    }

    async fn on_signal(&mut self, message: SignalMessage) -> Result<()> {
        match (self.role, message) {
            (Role::Server, SignalMessage::Ready {
                client_id, from, ..
            }) => {
                let Some(client_id) = from.or(client_id) else {
                    warn!("ready without a client id on {}", self.session_id);
                    return Ok(());
                };
                if self.current_state() != NegotiationState::SignalingOpen {
                    warn!("already negotiating on {}, ignoring ready from {client_id}", self.session_id);
                    return Ok(());
                }
                info!("client {client_id} is ready, sending offer");
                self.client_id = Some(client_id.clone());
                let offer = create_sdp_offer(&*self.connection).await?;
                self.send_signal(SignalMessage::Offer {
                    offer,
                    client_id,
                    server_name: self.session_id.clone(),
                    from: None,
                })
                .await?;
                self.set_state(NegotiationState::Offering);
                self.flush_local_candidates().await
            }
            (Role::Server, SignalMessage::Answer {
                answer,
                client_id,
                from,
                ..
            }) => {
                let sender = from.unwrap_or(client_id);
                if self.current_state() != NegotiationState::Offering
                    || self.client_id.as_ref() != Some(&sender)
                {
                    warn!("ignoring stale answer from {sender} on {}", self.session_id);
                    return Ok(());
                }
                self.connection
                    .set_remote_description(answer)
                    .await
                    .map_err(|e| Error::Negotiation(format!("failed to set remote description: {e}")))?;
                self.remote_description_set = true;
                self.set_state(NegotiationState::Answered);
                self.apply_pending_candidates().await;
                self.check_connected();
                Ok(())
            }
            (Role::Client, SignalMessage::Offer {
                offer, client_id, ..
            }) => {
                if self.client_id.as_ref() != Some(&client_id) {
                    debug!("offer for {client_id} is not ours");
                    return Ok(());
                }
                if self.current_state() != NegotiationState::WaitingOffer {
                    warn!("ignoring repeated offer on {}", self.session_id);
                    return Ok(());
                }
                let answer = create_sdp_answer(&*self.connection, offer).await?;
                self.remote_description_set = true;
                self.send_signal(SignalMessage::Answer {
                    answer,
                    server_name: self.session_id.clone(),
                    client_id,
                    from: None,
                })
                .await?;
                self.set_state(NegotiationState::Answered);
                self.apply_pending_candidates().await;
                self.flush_local_candidates().await?;
                self.check_connected();
                Ok(())
            }
            (role, SignalMessage::IceCandidate {
                candidate,
                target,
                client_id,
                from,
                ..
            }) => {
                // the client is addressed by its own id, the server hears from its paired client
                let peer = match role {
                    Role::Server => from.map(ClientId::new).unwrap_or(client_id),
                    Role::Client => client_id,
                };
                if target != role {
                    debug!("candidate for the {target} side, not for us");
                } else if self.client_id.as_ref() != Some(&peer) {
                    warn!("ignoring candidate from {peer} on {}", self.session_id);
                } else if self.remote_description_set {
                    self.apply_candidate(candidate).await;
                } else {
                    debug!("buffering remote candidate until the remote description is set");
                    self.pending_remote_candidates.push(candidate);
                }
                Ok(())
            }
            (_, SignalMessage::Found { name }) => {
                debug!("relay knows {name}");
                Ok(())
            }
            (_, SignalMessage::NotFound { name }) => {
                debug!("relay does not know {name}");
                Ok(())
            }
            (role, other) => {
                debug!("{role} ignores {}", other.kind());
                Ok(())
            }
        }
    }

    fn on_signaling_closed(&mut self) -> Result<()> {
        self.transport = None;
        if self.current_state() == NegotiationState::Connected {
            info!("signaling closed, data channel stays up");
            Ok(())
        } else {
            Err(Error::TransportClosed)
        }
    }

    async fn on_peer_event(&mut self, event: PeerEvent) -> Result<()> {
        match event {
            PeerEvent::IceCandidate(candidate) => self.send_local_candidate(candidate).await,
            PeerEvent::DataChannel(channel) => {
                if self.role == Role::Server {
                    warn!("server received an unexpected data channel {}", channel.label());
                    return Ok(());
                }
                self.channel_open = channel.state() == ChannelState::Open;
                self.install_channel(channel);
                self.check_connected();
                Ok(())
            }
            PeerEvent::ChannelOpen => {
                self.channel_open = true;
                self.check_connected();
                Ok(())
            }
            PeerEvent::ChannelMessage(text) => {
                self.on_channel_message(&text).await;
                Ok(())
            }
            PeerEvent::ChannelClosed => {
                self.channel_open = false;
                if self.current_state() == NegotiationState::Connected {
                    info!("data channel on {} closed", self.session_id);
                    self.set_state(NegotiationState::Closed);
                    Ok(())
                } else {
                    Err(Error::Negotiation("data channel closed before it opened".to_owned()))
                }
            }
            PeerEvent::ConnectionFailed(reason) => Err(Error::Negotiation(reason)),
        }
    }

    async fn on_channel_message(&mut self, text: &str) {
        let rpc = self.channel.borrow().clone();
        let Some(rpc) = rpc else {
            warn!("message before any data channel, dropping");
            return;
        };
        if let Some(response) = rpc.on_message(text, self.handler.as_deref()).await {
            if self.responses.send(response).is_err() {
                debug!("nobody is reading responses anymore");
            }
        }
    }

    async fn send_local_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        let Some(client_id) = self.client_id.clone() else {
            self.pending_local_candidates.push(candidate);
            return Ok(());
        };
        if self.transport.is_none() {
            debug!("signaling is gone, dropping local candidate");
            return Ok(());
        }
        self.send_signal(SignalMessage::IceCandidate {
            candidate,
            target: self.role.opposite(),
            client_id,
            server_name: self.session_id.clone(),
            from: None,
        })
        .await
    }

    async fn flush_local_candidates(&mut self) -> Result<()> {
        for candidate in std::mem::take(&mut self.pending_local_candidates) {
            self.send_local_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn apply_pending_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_remote_candidates) {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        if let Err(e) = self.connection.add_ice_candidate(candidate).await {
            warn!("remote candidate rejected: {e}");
        }
    }

    fn install_channel(&mut self, channel: Arc<dyn DataChannel>) {
        self.channel.send_replace(Some(RpcChannel::new(channel)));
    }

    fn check_connected(&mut self) {
        let has_channel = self.channel.borrow().is_some();
        if self.remote_description_set && self.channel_open && has_channel {
            if self.current_state() != NegotiationState::Connected {
                info!("{} connected on {}", self.role, self.session_id);
                self.set_state(NegotiationState::Connected);
            }
        }
    }

    async fn send_signal(&mut self, message: SignalMessage) -> Result<()> {
        match self.transport.as_mut() {
            Some(transport) => transport.send(message).await,
            None => Err(Error::TransportClosed),
        }
    }

    fn current_state(&self) -> NegotiationState {
        self.state.borrow().clone()
    }

    fn set_state(&self, state: NegotiationState) {
        debug!("{} on {}: {state}", self.role, self.session_id);
        self.state.send_replace(state);
    }

    fn fail(&mut self, error: Error) {
        error!("{} on {} failed: {error}", self.role, self.session_id);
        self.set_state(NegotiationState::Failed(error.to_string()));
    }
}

async fn recv_signal(transport: &mut Option<Box<dyn SignalingTransport>>) -> Option<SignalMessage> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}
