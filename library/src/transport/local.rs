use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::broadcast::{self, error::RecvError};

use webrtc_http_protocol::one_to_one::SignalMessage;
use webrtc_http_protocol::{ClientId, SessionId, LOCAL_READY};

use super::SignalingTransport;
use crate::Result;

const TOPIC_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct LocalFrame {
    sender: u64,
    payload: String,
}

/// Process-local publish/subscribe bus, one topic per session.
///
/// Subscribers never see their own frames. Clones share topics.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<LocalFrame>>>>,
    next_subscriber: Arc<AtomicU64>,
}

impl LocalBus {
    pub fn open(&self, session_id: &SessionId) -> LocalTransport {
        let topic = session_id.local_topic();
        let subscriber = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone();
        let rx = tx.subscribe();
        debug!("subscriber {subscriber} joined {topic}");
        LocalTransport {
            bus: self.clone(),
            session_id: session_id.clone(),
            topic,
            subscriber,
            tx,
            rx,
        }
    }
}

pub struct LocalTransport {
    bus: LocalBus,
    session_id: SessionId,
    topic: String,
    subscriber: u64,
    tx: broadcast::Sender<LocalFrame>,
    rx: broadcast::Receiver<LocalFrame>,
}

impl LocalTransport {
    fn encode(&self, message: &SignalMessage) -> Result<Option<String>> {
        match message {
            SignalMessage::Ready { .. } => Ok(Some(LOCAL_READY.to_owned())),
            SignalMessage::Register { .. }
            | SignalMessage::Search { .. }
            | SignalMessage::Found { .. }
            | SignalMessage::NotFound { .. } => Ok(None),
            _ => Ok(Some(message.to_json()?)),
        }
    }

    fn decode(&self, payload: &str) -> Option<SignalMessage> {
        let payload = payload.trim();
        if payload == LOCAL_READY || payload.trim_matches('"') == LOCAL_READY {
            return Some(SignalMessage::Ready {
                server_name: self.session_id.clone(),
                client_id: Some(ClientId::local()),
                from: None,
            });
        }
        match SignalMessage::from_json(payload) {
            Ok(message) => Some(message),
            Err(error) => {
                warn!("discarding payload on {}: {error}", self.topic);
                None
            }
        }
    }
}

#[async_trait]
impl SignalingTransport for LocalTransport {
    async fn send(&mut self, message: SignalMessage) -> Result<()> {
        let Some(payload) = self.encode(&message)? else {
            debug!("{} has no registry, not posting {}", self.topic, message.kind());
            return Ok(());
        };
        let frame = LocalFrame {
            sender: self.subscriber,
            payload,
        };
        if self.tx.send(frame).is_err() {
            debug!("nobody listens on {}", self.topic);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<SignalMessage> {
        loop {
            match self.rx.recv().await {
                Ok(frame) if frame.sender == self.subscriber => continue,
                Ok(frame) => {
                    if let Some(message) = self.decode(&frame.payload) {
                        return Some(message);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("subscriber {} lagged behind on {} by {skipped} frames", self.subscriber, self.topic);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        let mut topics = self
            .bus
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // our own receiver is still alive here
        if self.tx.receiver_count() <= 1 {
            topics.remove(&self.topic);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;
    use webrtc_http_protocol::one_to_one::SessionDescription;

    async fn recv_soon(transport: &mut LocalTransport) -> Option<SignalMessage> {
        tokio::time::timeout(Duration::from_millis(100), transport.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn ready_travels_as_bare_literal() {
        let bus = LocalBus::default();
        let session = SessionId::new("abc");
        let mut server = bus.open(&session);
        let mut client = bus.open(&session);

        client
            .send(SignalMessage::Ready {
                server_name: session.clone(),
                client_id: Some(ClientId::local()),
                from: None,
            })
            .await
            .unwrap();

        assert_eq!(
            recv_soon(&mut server).await,
            Some(SignalMessage::Ready {
                server_name: session,
                client_id: Some(ClientId::local()),
                from: None,
            })
        );
    }

    #[tokio::test]
    async fn own_frames_are_not_echoed() {
        let bus = LocalBus::default();
        let session = SessionId::new("abc");
        let mut lonely = bus.open(&session);
        lonely
            .send(SignalMessage::Offer {
                offer: SessionDescription::offer("v=0"),
                client_id: ClientId::local(),
                server_name: session.clone(),
                from: None,
            })
            .await
            .unwrap();
        assert_eq!(recv_soon(&mut lonely).await, None);
    }

    #[tokio::test]
    async fn sessions_do_not_cross_talk() {
        let bus = LocalBus::default();
        let mut first = bus.open(&SessionId::new("one"));
        let mut other = bus.open(&SessionId::new("two"));
        let mut listener = bus.open(&SessionId::new("one"));
        other
            .send(SignalMessage::Ready {
                server_name: SessionId::new("two"),
                client_id: None,
                from: None,
            })
            .await
            .unwrap();
        assert_eq!(recv_soon(&mut first).await, None);
        assert_eq!(recv_soon(&mut listener).await, None);
    }

    #[tokio::test]
    async fn malformed_payloads_are_skipped() {
        let bus = LocalBus::default();
        let session = SessionId::new("abc");
        let mut receiver = bus.open(&session);
        let raw = bus.open(&session);
        raw.tx
            .send(LocalFrame {
                sender: raw.subscriber,
                payload: "{broken".to_owned(),
            })
            .unwrap();
        raw.tx
            .send(LocalFrame {
                sender: raw.subscriber,
                payload: "\"ready\"".to_owned(),
            })
            .unwrap();
        assert!(matches!(
            recv_soon(&mut receiver).await,
            Some(SignalMessage::Ready { .. })
        ));
    }

    #[tokio::test]
    async fn registry_messages_stay_local() {
        let bus = LocalBus::default();
        let session = SessionId::new("abc");
        let mut server = bus.open(&session);
        let mut client = bus.open(&session);
        server
            .send(SignalMessage::Register {
                server_name: session.clone(),
            })
            .await
            .unwrap();
        assert_eq!(recv_soon(&mut client).await, None);
    }

    #[test]
    fn last_subscriber_removes_topic() {
        let bus = LocalBus::default();
        let session = SessionId::new("abc");
        let first = bus.open(&session);
        let second = bus.open(&session);
        drop(first);
        assert!(bus.topics.lock().unwrap().contains_key("channel_abc"));
        drop(second);
        assert!(bus.topics.lock().unwrap().is_empty());
    }
}
