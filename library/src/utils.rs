use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

use webrtc_http_protocol::one_to_one::SessionDescription;

use crate::peer::PeerConnection;
use crate::{Error, Result};

/// Specifies what kind of peer connection to create
#[derive(Debug, Clone)]
pub enum ConnectionType {
    /// Within local network
    Local,
    /// Setup with STUN server, WAN capabilities but can fail
    Stun { host: String },
    /// Setup with STUN and TURN hosts and fallback to TURN if needed, most stable connection
    StunAndTurn {
        host: String,
        username: String,
        credential: String,
    },
}

impl ConnectionType {
    pub(crate) fn rtc_configuration(&self) -> RTCConfiguration {
        use ConnectionType::{Local, Stun, StunAndTurn};
        let ice_servers = match self {
            Local => Vec::new(),
            Stun { host } => vec![RTCIceServer {
                urls: vec![format!("stun:{host}")],
                ..Default::default()
            }],
            StunAndTurn {
                host,
                username,
                credential,
            } => vec![
                RTCIceServer {
                    urls: vec![format!("stun:{host}")],
                    ..Default::default()
                },
                RTCIceServer {
                    urls: vec![format!("turn:{host}")],
                    username: username.clone(),
                    credential: credential.clone(),
                    ..Default::default()
                },
            ],
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

pub(crate) async fn create_sdp_offer(
    peer_connection: &dyn PeerConnection,
) -> Result<SessionDescription> {
    let offer = peer_connection
        .create_offer()
        .await
        .map_err(|error| Error::Negotiation(format!("failed to create an SDP offer: {error}")))?;
    peer_connection
        .set_local_description(offer.clone())
        .await
        .map_err(|error| Error::Negotiation(format!("failed to set local description: {error}")))?;

    Ok(offer)
}

pub(crate) async fn create_sdp_answer(
    peer_connection: &dyn PeerConnection,
    offer: SessionDescription,
) -> Result<SessionDescription> {
    peer_connection
        .set_remote_description(offer)
        .await
        .map_err(|error| Error::Negotiation(format!("failed to set remote description: {error}")))?;

    let answer = peer_connection
        .create_answer()
        .await
        .map_err(|error| Error::Negotiation(format!("failed to create an SDP answer: {error}")))?;
    peer_connection
        .set_local_description(answer.clone())
        .await
        .map_err(|error| Error::Negotiation(format!("failed to set local description: {error}")))?;

    Ok(answer)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::loopback::LoopbackNetwork;
    use crate::peer::{PeerConnector, DATA_CHANNEL_LABEL};
    use tokio::sync::mpsc;

    #[test]
    fn local_connection_has_no_ice_servers() {
        assert!(ConnectionType::Local.rtc_configuration().ice_servers.is_empty());
    }

    #[test]
    fn stun_and_turn_configures_both_servers() {
        let configuration = ConnectionType::StunAndTurn {
            host: "example.org:3478".to_owned(),
            username: "user".to_owned(),
            credential: "secret".to_owned(),
        }
        .rtc_configuration();
        assert_eq!(configuration.ice_servers.len(), 2);
        assert_eq!(configuration.ice_servers[0].urls, vec!["stun:example.org:3478"]);
        assert_eq!(configuration.ice_servers[1].urls, vec!["turn:example.org:3478"]);
        assert_eq!(configuration.ice_servers[1].username, "user");
    }

    #[tokio::test]
    async fn test_create_sdp_offer_and_answer_is_successful() {
        let network = LoopbackNetwork::default();
        let (offerer_tx, _offerer_rx) = mpsc::unbounded_channel();
        let (answerer_tx, _answerer_rx) = mpsc::unbounded_channel();
        let offerer = network.connect(offerer_tx).await.unwrap();
        let answerer = network.connect(answerer_tx).await.unwrap();

        offerer.create_data_channel(DATA_CHANNEL_LABEL).await.unwrap();
        let offer = create_sdp_offer(&*offerer).await.unwrap();
        let answer = create_sdp_answer(&*answerer, offer).await.unwrap();
        offerer.set_remote_description(answer).await.unwrap();
    }

    #[tokio::test]
    async fn test_answer_without_valid_offer_fails() {
        let network = LoopbackNetwork::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let answerer = network.connect(tx).await.unwrap();
        let result = create_sdp_answer(&*answerer, SessionDescription::offer("v=0")).await;
        assert!(matches!(result, Err(Error::Negotiation(_))));
    }
}
