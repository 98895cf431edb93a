/*!
In-process [PeerConnector] that pairs connections without any networking.

Offers and answers are opaque tokens registered in a shared [LoopbackNetwork].
The data channel opens as soon as the offering side applies a matching answer.
The usual ordering rules still hold: answers need a remote offer, candidates
need a remote description, and an answer to someone else's offer is rejected.
*/

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use log::debug;

use webrtc_http_protocol::one_to_one::{IceCandidate, SdpType, SessionDescription};

use crate::peer::{
    ChannelState, DataChannel, PeerConnection, PeerConnector, PeerEvent, PeerEvents,
};
use crate::{Error, Result};

const SDP_PREFIX: &str = "loopback";
const CANDIDATE_PREFIX: &str = "candidate:loopback";

/// Shared registry of loopback peers. Clones see the same peers.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    next_peer: AtomicU64,
    candidates_applied: AtomicUsize,
    peers: Mutex<HashMap<u64, Weak<LoopbackPeer>>>,
}

impl LoopbackNetwork {
    /// Number of remote candidates accepted by any peer of this network.
    pub fn candidates_applied(&self) -> usize {
        self.inner.candidates_applied.load(Ordering::SeqCst)
    }

    fn peer(&self, id: u64) -> Option<Arc<LoopbackPeer>> {
        lock(&self.inner.peers).get(&id).and_then(Weak::upgrade)
    }
}

#[async_trait]
impl PeerConnector for LoopbackNetwork {
    async fn connect(&self, events: PeerEvents) -> Result<Arc<dyn PeerConnection>> {
        let id = self.inner.next_peer.fetch_add(1, Ordering::SeqCst) + 1;
        let peer = Arc::new(LoopbackPeer {
            id,
            network: self.clone(),
            events,
            state: Mutex::default(),
        });
        lock(&self.inner.peers).insert(id, Arc::downgrade(&peer));
        debug!("loopback peer {id} created");
        Ok(peer)
    }
}

#[derive(Default)]
struct PeerState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_peer: Option<u64>,
    channel: Option<Arc<LoopbackChannel>>,
    closed: bool,
}

pub struct LoopbackPeer {
    id: u64,
    network: LoopbackNetwork,
    events: PeerEvents,
    state: Mutex<PeerState>,
}

impl LoopbackPeer {
    fn check_open(&self) -> Result<MutexGuard<'_, PeerState>> {
        let state = lock(&self.state);
        if state.closed {
            return Err(Error::Peer("peer connection is closed".to_owned()));
        }
        Ok(state)
    }

    /// Called on the offering side once the answer is applied.
    fn link(&self, answerer: &LoopbackPeer) {
        let Some(local) = lock(&self.state).channel.clone() else {
            debug!("loopback peer {} has no data channel to open", self.id);
            return;
        };
        let remote = Arc::new(LoopbackChannel::new(local.label.clone(), answerer.events.clone()));
        *lock(&local.remote) = Arc::downgrade(&remote);
        *lock(&remote.remote) = Arc::downgrade(&local);
        lock(&answerer.state).channel = Some(remote.clone());

        let _ = answerer.events.send(PeerEvent::DataChannel(remote.clone()));
        remote.set_state(ChannelState::Open);
        let _ = answerer.events.send(PeerEvent::ChannelOpen);
        local.set_state(ChannelState::Open);
        let _ = self.events.send(PeerEvent::ChannelOpen);
    }
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        let mut state = self.check_open()?;
        let channel = Arc::new(LoopbackChannel::new(label.to_owned(), self.events.clone()));
        state.channel = Some(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.check_open()?;
        Ok(SessionDescription::offer(format!("{SDP_PREFIX} offer {}", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let state = self.check_open()?;
        match (&state.remote, state.remote_peer) {
            (Some(remote), Some(offerer)) if remote.kind == SdpType::Offer => Ok(
                SessionDescription::answer(format!("{SDP_PREFIX} answer {} for {offerer}", self.id)),
            ),
            _ => Err(Error::Peer("cannot answer without a remote offer".to_owned())),
        }
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let mut state = self.check_open()?;
        state.local = Some(description);
        drop(state);
        // gathering starts with the local description
        let _ = self.events.send(PeerEvent::IceCandidate(IceCandidate {
            candidate: format!("{CANDIDATE_PREFIX} {}", self.id),
            sdp_mid: Some("0".to_owned()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let sdp = description.sdp.clone();
        let words: Vec<&str> = sdp.split_whitespace().collect();
        match (description.kind, words.as_slice()) {
            (SdpType::Offer, [SDP_PREFIX, "offer", offerer]) => {
                let offerer: u64 = offerer
                    .parse()
                    .map_err(|_| Error::Peer("malformed loopback offer".to_owned()))?;
                if self.network.peer(offerer).is_none() {
                    return Err(Error::Peer(format!("offer from unknown peer {offerer}")));
                }
                let mut state = self.check_open()?;
                state.remote = Some(description);
                state.remote_peer = Some(offerer);
                Ok(())
            }
            (SdpType::Answer, [SDP_PREFIX, "answer", answerer, "for", offerer]) => {
                let (answerer, offerer): (u64, u64) = match (answerer.parse(), offerer.parse()) {
                    (Ok(answerer), Ok(offerer)) => (answerer, offerer),
                    _ => return Err(Error::Peer("malformed loopback answer".to_owned())),
                };
                if offerer != self.id {
                    return Err(Error::Peer(format!(
                        "answer belongs to the offer of peer {offerer}"
                    )));
                }
                let answering_peer = self
                    .network
                    .peer(answerer)
                    .ok_or_else(|| Error::Peer(format!("answer from unknown peer {answerer}")))?;
                {
                    let mut state = self.check_open()?;
                    if state.local.as_ref().map(|local| local.kind) != Some(SdpType::Offer) {
                        return Err(Error::Peer("answer received without a local offer".to_owned()));
                    }
                    state.remote = Some(description);
                    state.remote_peer = Some(answerer);
                }
                self.link(&answering_peer);
                Ok(())
            }
            _ => Err(Error::Peer(format!(
                "unsupported session description: {}",
                description.sdp
            ))),
        }
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let state = self.check_open()?;
        let Some(remote_peer) = state.remote_peer else {
            return Err(Error::Peer(
                "remote description must be set before adding candidates".to_owned(),
            ));
        };
        let expected = format!("{CANDIDATE_PREFIX} {remote_peer}");
        if candidate.candidate != expected {
            return Err(Error::Peer(format!(
                "candidate {} does not belong to peer {remote_peer}",
                candidate.candidate
            )));
        }
        self.network
            .inner
            .candidates_applied
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let channel = {
            let mut state = lock(&self.state);
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.channel.take()
        };
        if let Some(channel) = channel {
            channel.shut_down();
        }
        lock(&self.network.inner.peers).remove(&self.id);
        debug!("loopback peer {} closed", self.id);
        Ok(())
    }
}

pub struct LoopbackChannel {
    label: String,
    state: Mutex<ChannelState>,
    events: PeerEvents,
    remote: Mutex<Weak<LoopbackChannel>>,
}

impl LoopbackChannel {
    fn new(label: String, events: PeerEvents) -> Self {
        LoopbackChannel {
            label,
            state: Mutex::new(ChannelState::Connecting),
            events,
            remote: Mutex::new(Weak::new()),
        }
    }

    fn set_state(&self, state: ChannelState) {
        *lock(&self.state) = state;
    }

    /// Close both ends and tell both owners.
    fn shut_down(&self) {
        let remote = lock(&self.remote).upgrade();
        for channel in std::iter::once(self).chain(remote.as_deref()) {
            let was_open = {
                let mut state = lock(&channel.state);
                let was_open = *state != ChannelState::Closed;
                *state = ChannelState::Closed;
                was_open
            };
            if was_open {
                let _ = channel.events.send(PeerEvent::ChannelClosed);
            }
        }
    }
}

#[async_trait]
impl DataChannel for LoopbackChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn state(&self) -> ChannelState {
        *lock(&self.state)
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(Error::ChannelNotOpen(state));
        }
        let remote = lock(&self.remote).upgrade().ok_or(Error::ChannelNotOpen(ChannelState::Closed))?;
        remote
            .events
            .send(PeerEvent::ChannelMessage(text))
            .map_err(|_| Error::Peer("remote peer is gone".to_owned()))
    }

    async fn close(&self) -> Result<()> {
        self.shut_down();
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peer::DATA_CHANNEL_LABEL;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    async fn pair(
        network: &LoopbackNetwork,
    ) -> (
        Arc<dyn PeerConnection>,
        UnboundedReceiver<PeerEvent>,
        Arc<dyn PeerConnection>,
        UnboundedReceiver<PeerEvent>,
    ) {
        let (offerer_tx, offerer_rx) = mpsc::unbounded_channel();
        let (answerer_tx, answerer_rx) = mpsc::unbounded_channel();
        let offerer = network.connect(offerer_tx).await.unwrap();
        let answerer = network.connect(answerer_tx).await.unwrap();
        (offerer, offerer_rx, answerer, answerer_rx)
    }

    fn drain(rx: &mut UnboundedReceiver<PeerEvent>) -> Vec<PeerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn candidate_of(events: &[PeerEvent]) -> IceCandidate {
        events
            .iter()
            .find_map(|event| match event {
                PeerEvent::IceCandidate(candidate) => Some(candidate.clone()),
                _ => None,
            })
            .expect("no candidate gathered")
    }

    #[tokio::test]
    async fn negotiation_opens_channel_on_both_sides() {
        let network = LoopbackNetwork::default();
        let (offerer, mut offerer_rx, answerer, mut answerer_rx) = pair(&network).await;

        let local_channel = offerer.create_data_channel(DATA_CHANNEL_LABEL).await.unwrap();
        let offer = offerer.create_offer().await.unwrap();
        offerer.set_local_description(offer.clone()).await.unwrap();
        answerer.set_remote_description(offer).await.unwrap();
        let answer = answerer.create_answer().await.unwrap();
        answerer.set_local_description(answer.clone()).await.unwrap();
        offerer.set_remote_description(answer).await.unwrap();

        assert_eq!(local_channel.state(), ChannelState::Open);
        let offerer_events = drain(&mut offerer_rx);
        assert!(offerer_events.iter().any(|e| matches!(e, PeerEvent::ChannelOpen)));

        let answerer_events = drain(&mut answerer_rx);
        let remote_channel = answerer_events
            .iter()
            .find_map(|event| match event {
                PeerEvent::DataChannel(channel) => Some(channel.clone()),
                _ => None,
            })
            .expect("answerer never got the channel");
        assert_eq!(remote_channel.label(), DATA_CHANNEL_LABEL);

        remote_channel.send_text("ping".to_owned()).await.unwrap();
        match offerer_rx.try_recv().unwrap() {
            PeerEvent::ChannelMessage(text) => assert_eq!(text, "ping"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn candidates_need_remote_description() {
        let network = LoopbackNetwork::default();
        let (offerer, mut offerer_rx, answerer, _answerer_rx) = pair(&network).await;

        offerer.create_data_channel(DATA_CHANNEL_LABEL).await.unwrap();
        let offer = offerer.create_offer().await.unwrap();
        offerer.set_local_description(offer.clone()).await.unwrap();
        let candidate = candidate_of(&drain(&mut offerer_rx));

        assert!(answerer.add_ice_candidate(candidate.clone()).await.is_err());
        answerer.set_remote_description(offer).await.unwrap();
        answerer.add_ice_candidate(candidate).await.unwrap();
        assert_eq!(network.candidates_applied(), 1);
    }

    #[tokio::test]
    async fn answer_for_another_offer_is_rejected() {
        let network = LoopbackNetwork::default();
        let (first, _first_rx, answerer, _answerer_rx) = pair(&network).await;
        let (second_tx, _second_rx) = mpsc::unbounded_channel();
        let second = network.connect(second_tx).await.unwrap();

        let offer = first.create_offer().await.unwrap();
        first.set_local_description(offer.clone()).await.unwrap();
        let other_offer = second.create_offer().await.unwrap();
        second.set_local_description(other_offer).await.unwrap();

        answerer.set_remote_description(offer).await.unwrap();
        let answer = answerer.create_answer().await.unwrap();
        assert!(second.set_remote_description(answer).await.is_err());
    }

    #[tokio::test]
    async fn closing_a_peer_closes_both_channel_ends() {
        let network = LoopbackNetwork::default();
        let (offerer, mut offerer_rx, answerer, mut answerer_rx) = pair(&network).await;
        let channel = offerer.create_data_channel(DATA_CHANNEL_LABEL).await.unwrap();
        let offer = offerer.create_offer().await.unwrap();
        offerer.set_local_description(offer.clone()).await.unwrap();
        answerer.set_remote_description(offer).await.unwrap();
        let answer = answerer.create_answer().await.unwrap();
        offerer.set_remote_description(answer).await.unwrap();
        drain(&mut offerer_rx);
        drain(&mut answerer_rx);

        offerer.close().await.unwrap();

        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(drain(&mut answerer_rx)
            .iter()
            .any(|e| matches!(e, PeerEvent::ChannelClosed)));
        assert!(matches!(
            channel.send_text("late".to_owned()).await,
            Err(Error::ChannelNotOpen(ChannelState::Closed))
        ));
    }
}
