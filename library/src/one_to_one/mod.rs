/*!
One-to-one topology: a single server role serving a single client role.

[NetworkManager] owns at most one connection attempt at a time. Starting a new role,
or calling [NetworkManager::reset], throws the current attempt away entirely (task,
transport subscription and peer connection) and starts from `Idle` with fresh objects.
*/

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use webrtc_http_protocol::rpc::RpcResponse;
use webrtc_http_protocol::{ClientId, Role, SessionId};

use crate::peer::{PeerConnection, PeerConnector};
use crate::rpc::{RequestHandler, RpcChannel};
use crate::transport::TransportConfig;
use crate::{Error, Result};

mod negotiation;

pub use negotiation::NegotiationState;
use negotiation::Negotiator;

struct ActiveSession {
    role: Role,
    session_id: SessionId,
    state: watch::Receiver<NegotiationState>,
    channel: watch::Receiver<Option<RpcChannel>>,
    connection: Option<Arc<dyn PeerConnection>>,
    task: Option<JoinHandle<()>>,
}

/// Peer connection manager for one endpoint.
pub struct NetworkManager {
    connector: Arc<dyn PeerConnector>,
    transport: TransportConfig,
    handler: Option<Arc<dyn RequestHandler>>,
    responses_tx: mpsc::UnboundedSender<RpcResponse>,
    responses_rx: mpsc::UnboundedReceiver<RpcResponse>,
    session: Option<ActiveSession>,
}

impl NetworkManager {
    pub fn new(connector: impl PeerConnector + 'static, transport: TransportConfig) -> Self {
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        NetworkManager {
            connector: Arc::new(connector),
            transport,
            handler: None,
            responses_tx,
            responses_rx,
            session: None,
        }
    }

    /// Serve incoming requests with `handler`. Usually set on the server role.
    pub fn with_request_handler(mut self, handler: impl RequestHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub async fn connect_as_server(&mut self, session_id: SessionId) -> Result<()> {
        self.start(Role::Server, session_id).await
    }

    pub async fn connect_as_client(&mut self, session_id: SessionId) -> Result<()> {
        self.start(Role::Client, session_id).await
    }

    /// Drop the current attempt and start again with the same role and session.
    /// Without a previous attempt this does nothing. Failures of the new attempt
    /// show up in [NetworkManager::state].
    pub async fn reset(&mut self) {
        let Some((role, session_id)) = self
            .session
            .as_ref()
            .map(|session| (session.role, session.session_id.clone()))
        else {
            debug!("reset without a session, nothing to restart");
            return;
        };
        info!("resetting {role} session {session_id}");
        if let Err(e) = self.start(role, session_id).await {
            warn!("fresh attempt after reset failed: {e}");
        }
    }

    /// Tear the current attempt down and go back to `Idle`.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            dispose(session).await;
        }
    }

    pub fn state(&self) -> NegotiationState {
        match &self.session {
            Some(session) => session.state.borrow().clone(),
            None => NegotiationState::Idle,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.session.as_ref().map(|session| session.role)
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|session| &session.session_id)
    }

    /// Watch state transitions of the current attempt.
    pub fn subscribe(&self) -> Option<watch::Receiver<NegotiationState>> {
        self.session.as_ref().map(|session| session.state.clone())
    }

    /// Wait until the current attempt is connected, or report why it never will be.
    pub async fn wait_until_connected(&self) -> Result<()> {
        let mut state = self.subscribe().ok_or(Error::NoSession)?;
        let reached = state
            .wait_for(|state| *state == NegotiationState::Connected || state.is_terminal())
            .await
            .map_err(|_| Error::Negotiation("session task ended".to_owned()))?
            .clone();
        match reached {
            NegotiationState::Connected => Ok(()),
            NegotiationState::Failed(reason) => Err(Error::Negotiation(reason)),
            other => Err(Error::Negotiation(format!("session ended as {other}"))),
        }
    }

    /// Send a request over the data channel. Fails at once unless the channel is open.
    pub async fn send_request(&self, path: &str, method: &str, body: Option<String>) -> Result<u64> {
        let session = self.session.as_ref().ok_or(Error::NoSession)?;
        let rpc = session.channel.borrow().clone();
        match rpc {
            Some(rpc) => rpc.send_request(path, method, body).await,
            None => Err(Error::NoChannel),
        }
    }

    /// Next response received from the other side, in arrival order.
    pub async fn next_response(&mut self) -> Option<RpcResponse> {
        self.responses_rx.recv().await
    }

    /// Responses received so far that nobody has taken yet.
    pub fn drain_responses(&mut self) -> Vec<RpcResponse> {
        let mut responses = Vec::new();
        while let Ok(response) = self.responses_rx.try_recv() {
            responses.push(response);
        }
        responses
    }

    async fn start(&mut self, role: Role, session_id: SessionId) -> Result<()> {
        self.close().await;
        // responses of the previous attempt are not answers to anything sent from now on
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        self.responses_tx = responses_tx;
        self.responses_rx = responses_rx;

        let (state_tx, state_rx) = watch::channel(NegotiationState::Idle);
        let (channel_tx, channel_rx) = watch::channel(None);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut session = ActiveSession {
            role,
            session_id: session_id.clone(),
            state: state_rx,
            channel: channel_rx,
            connection: None,
            task: None,
        };

        let opened = async {
            let transport = self.transport.open(&session_id).await?;
            let connection = self.connector.connect(events_tx).await?;
            Ok::<_, Error>((transport, connection))
        }
        .await;
        let (transport, connection) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                error!("could not start {role} session {session_id}: {e}");
                state_tx.send_replace(NegotiationState::Failed(e.to_string()));
                self.session = Some(session);
                return Err(e);
            }
        };

        let client_id: Option<ClientId> = match role {
            Role::Client => Some(self.transport.client_id()),
            Role::Server => None,
        };
        let negotiator = Negotiator {
            role,
            session_id,
            client_id,
            transport: Some(transport),
            connection: connection.clone(),
            events: events_rx,
            state: state_tx,
            channel: channel_tx,
            handler: self.handler.clone(),
            responses: self.responses_tx.clone(),
            remote_description_set: false,
            channel_open: false,
            pending_remote_candidates: Vec::new(),
            pending_local_candidates: Vec::new(),
        };
        session.connection = Some(connection);
        session.task = Some(tokio::spawn(negotiator.run()));
        self.session = Some(session);
        Ok(())
    }
}

impl Drop for NetworkManager {
    fn drop(&mut self) {
        if let Some(task) = self.session.as_mut().and_then(|session| session.task.take()) {
            task.abort();
        }
    }
}

async fn dispose(mut session: ActiveSession) {
    if let Some(task) = session.task.take() {
        task.abort();
        let _ = task.await;
    }
    if let Some(connection) = session.connection.take() {
        if let Err(e) = connection.close().await {
            warn!("closing superseded peer connection: {e}");
        }
    }
    debug!("disposed {} session {}", session.role, session.session_id);
}
