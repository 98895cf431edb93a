//! [PeerConnector] backed by webrtc-rs.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use webrtc_http_protocol::one_to_one::{IceCandidate, SdpType, SessionDescription};

use crate::peer::{
    ChannelState, DataChannel, PeerConnection, PeerConnector, PeerEvent, PeerEvents,
};
use crate::utils::ConnectionType;
use crate::{Error, Result};

#[async_trait]
impl PeerConnector for ConnectionType {
    async fn connect(&self, events: PeerEvents) -> Result<Arc<dyn PeerConnection>> {
        let api = APIBuilder::new().build();
        let peer_connection = Arc::new(api.new_peer_connection(self.rtc_configuration()).await?);

        let tx = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::IceCandidate(from_rtc_candidate(init)));
                    }
                    Err(error) => warn!("failed to serialize local ICE candidate: {error}"),
                }
            })
        }));

        let tx = events.clone();
        peer_connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let tx = tx.clone();
            Box::pin(async move {
                info!("remote data channel arrived: {}", channel.label());
                let channel = WebRtcChannel {
                    rtc_channel: channel,
                };
                // the arrival has to be reported before the open handler can fire
                let _ = tx.send(PeerEvent::DataChannel(Arc::new(channel.clone())));
                channel.forward_events(tx);
            })
        }));

        let tx = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let tx = tx.clone();
                Box::pin(async move {
                    debug!("peer connection state: {state}");
                    if state == RTCPeerConnectionState::Failed {
                        let _ = tx.send(PeerEvent::ConnectionFailed(
                            "peer connection failed".to_owned(),
                        ));
                    }
                })
            },
        ));

        Ok(Arc::new(WebRtcPeer {
            peer_connection,
            events,
        }))
    }
}

pub struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    events: PeerEvents,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let rtc_channel = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await?;
        let channel = WebRtcChannel { rtc_channel };
        channel.forward_events(self.events.clone());
        Ok(Arc::new(channel))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.peer_connection.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.peer_connection
            .set_local_description(description)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.peer_connection
            .set_remote_description(description)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct WebRtcChannel {
    rtc_channel: Arc<RTCDataChannel>,
}

impl WebRtcChannel {
    fn forward_events(&self, events: PeerEvents) {
        let tx = events.clone();
        self.rtc_channel.on_open(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PeerEvent::ChannelOpen);
            })
        }));

        let tx = events.clone();
        self.rtc_channel
            .on_message(Box::new(move |message: DataChannelMessage| {
                let tx = tx.clone();
                Box::pin(async move {
                    match String::from_utf8(message.data.to_vec()) {
                        Ok(text) => {
                            let _ = tx.send(PeerEvent::ChannelMessage(text));
                        }
                        Err(_) => warn!("dropping non UTF-8 data channel message"),
                    }
                })
            }));

        let tx = events;
        self.rtc_channel.on_close(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PeerEvent::ChannelClosed);
            })
        }));
    }
}

#[async_trait]
impl DataChannel for WebRtcChannel {
    fn label(&self) -> String {
        self.rtc_channel.label().to_owned()
    }

    fn state(&self) -> ChannelState {
        match self.rtc_channel.ready_state() {
            RTCDataChannelState::Open => ChannelState::Open,
            RTCDataChannelState::Closing => ChannelState::Closing,
            RTCDataChannelState::Closed => ChannelState::Closed,
            _ => ChannelState::Connecting,
        }
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(Error::ChannelNotOpen(state));
        }
        self.rtc_channel.send_text(text).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.rtc_channel.close().await?;
        Ok(())
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let SessionDescription { kind, sdp } = description;
    let description = match kind {
        SdpType::Offer => RTCSessionDescription::offer(sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp)?,
        SdpType::Rollback => {
            return Err(Error::Peer("rollback descriptions are not supported".to_owned()))
        }
    };
    Ok(description)
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}
