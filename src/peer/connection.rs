use crate::error::{Error, Result};
use crate::peer::channel::{
    ChannelEvent, ChannelEvents, ChannelFactory, NegotiationChannel, TransportState,
};
use crate::peer::ice::{analyze_candidates, dump_candidate, dump_selected_pair};
use crate::peer::media::LocalMedia;
use crate::peer::types::{IceCandidate, SdpKind, ServerConfig, SessionDescription};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as CodecRegistry;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        RTCPeerConnection,
    },
};

/// Opens webrtc peer connections for calls
pub struct RtcChannelFactory {
    ice_servers: Vec<ServerConfig>,
}

impl RtcChannelFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl ChannelFactory for RtcChannelFactory {
    async fn open(
        &self,
        peer_id: &str,
        media: Option<&LocalMedia>,
        events: ChannelEvents,
    ) -> Result<Arc<dyn NegotiationChannel>> {
        let channel = new_peer(peer_id, &self.ice_servers, media, events).await?;
        Ok(Arc::new(channel))
    }
}

pub struct RtcChannel {
    peer_id: String,
    pc: Arc<RTCPeerConnection>,
}

fn build_api() -> Result<API> {
    let mut codecs = CodecRegistry::default();
    codecs.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut codecs)?;
    Ok(APIBuilder::new()
        .with_media_engine(codecs)
        .with_interceptor_registry(registry)
        .build())
}

/// Builds the peer connection for `peer_id` and wires its callbacks to `events`
async fn new_peer(
    peer_id: &str,
    ice_servers: &[ServerConfig],
    media: Option<&LocalMedia>,
    events: ChannelEvents,
) -> Result<RtcChannel> {
    let api = build_api()?;
    let pc = Arc::new(api.new_peer_connection(rtc_config(ice_servers)).await?);

    if let Some(media) = media {
        for track in &media.tracks {
            let sender = pc
                .add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            // RTCP must be drained for interceptors to work
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }
    }

    let gathered: Arc<Mutex<Vec<IceCandidate>>> = Arc::default();
    let tx = events.clone();
    let peer = peer_id.to_string();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let gathered = gathered.clone();
        match cand {
            Some(c) => {
                dump_candidate(&peer, "LOCAL", &c);
                match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate::from(init);
                        gathered
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(candidate.clone());
                        let _ = tx.send(ChannelEvent::CandidateGathered(candidate));
                    }
                    Err(e) => warn!("Failed to serialize local candidate for {}: {}", peer, e),
                }
            }
            None => {
                debug!("ICE gathering completed for {}", peer);
                let all = gathered.lock().unwrap_or_else(PoisonError::into_inner);
                analyze_candidates(&peer, &all);
            }
        }
        Box::pin(async {})
    }));

    let tx = events.clone();
    let peer = peer_id.to_string();
    let weak = Arc::downgrade(&pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("Peer connection to {} changed to: {:?}", peer, st);
        let state = match st {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
                TransportState::New
            }
            RTCPeerConnectionState::Connecting => TransportState::Connecting,
            RTCPeerConnectionState::Connected => TransportState::Connected,
            RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
            RTCPeerConnectionState::Failed => TransportState::Failed,
            RTCPeerConnectionState::Closed => TransportState::Closed,
        };
        let _ = tx.send(ChannelEvent::StateChanged(state));

        let pc = weak.upgrade();
        let peer = peer.clone();
        Box::pin(async move {
            if let (TransportState::Failed, Some(pc)) = (state, pc) {
                dump_selected_pair(&peer, &pc, "BEFORE-FAIL").await;
            }
        })
    }));

    let tx = events;
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let _ = tx.send(ChannelEvent::RemoteTrack {
                kind: track.kind().to_string(),
                track_id: track.id(),
            });
            Box::pin(async {})
        },
    ));

    Ok(RtcChannel {
        peer_id: peer_id.to_string(),
        pc,
    })
}

fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpKind::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpKind::Rollback => {
            return Err(Error::Negotiation("rollback is not supported".into()));
        }
    };
    Ok(rtc)
}

#[async_trait]
impl NegotiationChannel for RtcChannel {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing peer connection to {}", self.peer_id);
        self.pc.close().await?;
        Ok(())
    }
}
