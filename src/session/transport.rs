//! Media transport seam
//!
//! The negotiation machine talks to its peer connection exclusively through
//! [`PeerTransport`], so the state machine can be driven in tests without
//! live ICE. [`WebRtcPeerTransport`] is the production implementation over
//! webrtc-rs; its callbacks (local candidates, remote tracks) are forwarded
//! into the console event loop as [`TransportEvent`]s tagged with the slot
//! and session generation they belong to.

use crate::session::SlotId;
use crate::signaling::protocol::IceCandidate;
use crate::sink::RemoteStream;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// Event a transport pushes back into the owning event loop
#[derive(Debug)]
pub struct TransportEvent {
    pub slot: SlotId,
    /// Session generation the transport was created for; stale events are
    /// dropped by the orchestrator
    pub generation: u64,
    pub kind: TransportEventKind,
}

#[derive(Debug)]
pub enum TransportEventKind {
    /// A locally discovered candidate; `None` marks gathering complete
    LocalCandidate(Option<IceCandidate>),
    /// First media arrived from the remote peer
    RemoteTrack(RemoteStream),
}

/// One session's exclusive handle to its media transport
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Apply the remote peer's offer
    async fn apply_remote_offer(&self, sdp: String) -> Result<()>;

    /// Synthesize the local answer, apply it locally, and return its SDP
    async fn create_answer(&self) -> Result<String>;

    /// Apply one remote ICE candidate, in delivery order
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Release the transport. Must be idempotent.
    async fn close(&self) -> Result<()>;
}

/// Creates a fresh transport per negotiation session
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(
        &self,
        slot: SlotId,
        generation: u64,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>>;
}

/// Production factory backed by webrtc-rs
pub struct WebRtcTransportFactory {
    ice_servers: Vec<String>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerTransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        slot: SlotId,
        generation: u64,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("failed to register codecs: {e}")))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::WebRtc(format!("failed to register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| Error::WebRtc(format!("failed to create peer connection: {e}")))?,
        );

        let candidate_events = events.clone();
        let candidate_slot = slot.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let events = candidate_events.clone();
            let slot = candidate_slot.clone();
            Box::pin(async move {
                let payload = match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => Some(IceCandidate {
                            candidate: init.candidate,
                            sdp_m_line_index: u32::from(init.sdp_mline_index.unwrap_or(0)),
                            sdp_mid: init.sdp_mid,
                        }),
                        Err(err) => {
                            warn!(slot = %slot, "failed to serialize local candidate: {err}");
                            return;
                        }
                    },
                    None => None,
                };
                let _ = events
                    .send(TransportEvent {
                        slot,
                        generation,
                        kind: TransportEventKind::LocalCandidate(payload),
                    })
                    .await;
            })
        }));

        let track_events = events;
        let track_slot = slot;
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            let slot = track_slot.clone();
            Box::pin(async move {
                let video_tracks = usize::from(track.kind() == RTPCodecType::Video);
                debug!(slot = %slot, kind = %track.kind(), "remote track received");
                let stream = RemoteStream {
                    id: if track.stream_id().is_empty() {
                        track.id()
                    } else {
                        track.stream_id()
                    },
                    video_tracks,
                    track: Some(track),
                };
                let _ = events
                    .send(TransportEvent {
                        slot,
                        generation,
                        kind: TransportEventKind::RemoteTrack(stream),
                    })
                    .await;
            })
        }));

        Ok(Arc::new(WebRtcPeerTransport { peer_connection }))
    }
}

/// [`PeerTransport`] over a live `RTCPeerConnection`
pub struct WebRtcPeerTransport {
    peer_connection: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerTransport for WebRtcPeerTransport {
    async fn apply_remote_offer(&self, sdp: String) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|e| Error::Negotiation(format!("invalid remote offer: {e}")))?;
        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("remote description rejected: {e}")))
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to create answer: {e}")))?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| Error::Negotiation(format!("local description rejected: {e}")))?;
        Ok(answer.sdp)
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: Some(candidate.sdp_m_line_index as u16),
            username_fragment: None,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::Negotiation(format!("ICE candidate rejected: {e}")))
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtc(format!("failed to close peer connection: {e}")))
    }
}
