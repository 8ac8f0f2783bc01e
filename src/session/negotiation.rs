//! Per-session SDP/ICE negotiation state machine
//!
//! One machine exists per preview session, bound to a single remote
//! producer. It never touches the socket directly; outbound traffic goes
//! through the shared [`SignalingChannel`] and media work through the
//! session's exclusive [`PeerTransport`].
//!
//! Ordering rule: the server-confirmed session id must be known before any
//! outbound `peer` message is sent. A remote offer or locally discovered
//! candidate that arrives earlier is buffered, not dropped, and drained the
//! moment `sessionStarted` lands.

use crate::session::transport::PeerTransport;
use crate::session::SlotId;
use crate::signaling::channel::SignalingChannel;
use crate::signaling::protocol::{
    IceCandidate, OutgoingMessage, PeerMessage, PeerMessageInner, SdpMessage,
};
use crate::sink::RemoteStream;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Negotiation phases. `Closed` is terminal and reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    AwaitingSessionId,
    AwaitingRemoteDescription,
    AwaitingLocalDescriptionSent,
    Negotiating,
    Active,
    Closed,
}

/// What to do with a remote track announcement
#[derive(Debug)]
pub enum TrackOutcome {
    /// Stream carries video; the machine is `Active`, attach it
    Attach(RemoteStream),
    /// Protocol violation (no video sub-track) or stale; session was closed
    Reject,
}

/// Driver for one offer/answer + ICE-trickle exchange
pub struct Negotiation {
    slot: SlotId,
    peer_id: String,
    generation: u64,
    state: NegotiationState,
    session_id: Option<String>,
    transport: Arc<dyn PeerTransport>,
    /// Remote offer that arrived before the session id was confirmed
    pending_offer: Option<String>,
    /// Remote candidates that arrived before the remote description applied
    pending_remote_candidates: Vec<IceCandidate>,
    /// Local candidates discovered before the session id was confirmed
    pending_local_candidates: Vec<IceCandidate>,
}

impl Negotiation {
    pub fn new(
        slot: SlotId,
        peer_id: String,
        generation: u64,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            slot,
            peer_id,
            generation,
            state: NegotiationState::Idle,
            session_id: None,
            transport,
            pending_offer: None,
            pending_remote_candidates: Vec::new(),
            pending_local_candidates: Vec::new(),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == NegotiationState::Closed
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Request session registration with the signaling server
    pub fn start(&mut self, channel: &SignalingChannel) {
        debug_assert_eq!(self.state, NegotiationState::Idle);
        info!(slot = %self.slot, peer = %self.peer_id, "starting negotiation session");
        channel.send(&OutgoingMessage::StartSession {
            peer_id: self.peer_id.clone(),
        });
        self.state = NegotiationState::AwaitingSessionId;
    }

    /// Record the server-assigned session id and drain anything buffered
    /// while it was unknown
    pub async fn on_session_started(&mut self, channel: &SignalingChannel, session_id: String) {
        if self.is_closed() {
            return;
        }
        if self.session_id.is_some() {
            warn!(slot = %self.slot, "duplicate sessionStarted ignored");
            return;
        }
        info!(slot = %self.slot, session = %session_id, "session confirmed");
        self.session_id = Some(session_id);

        for candidate in std::mem::take(&mut self.pending_local_candidates) {
            self.send_peer(channel, PeerMessageInner::Ice(candidate));
        }
        if let Some(offer) = self.pending_offer.take() {
            self.apply_offer(channel, offer).await;
        }
    }

    /// Handle a remote session description
    pub async fn on_remote_sdp(&mut self, channel: &SignalingChannel, sdp: SdpMessage) {
        if self.is_closed() {
            return;
        }
        match sdp {
            SdpMessage::Offer { sdp } => {
                if self.session_id.is_none() {
                    // The id and the description arrive independently;
                    // sending is withheld until both are available.
                    debug!(slot = %self.slot, "buffering offer until session id is confirmed");
                    self.pending_offer = Some(sdp);
                    return;
                }
                self.apply_offer(channel, sdp).await;
            }
            SdpMessage::Answer { .. } => {
                warn!(slot = %self.slot, "unexpected answer from producer, closing");
                self.close().await;
            }
        }
    }

    /// Apply a remote candidate, preserving delivery order
    pub async fn on_remote_ice(&mut self, candidate: IceCandidate) {
        match self.state {
            NegotiationState::Closed => {}
            NegotiationState::Idle
            | NegotiationState::AwaitingSessionId
            | NegotiationState::AwaitingRemoteDescription => {
                // Remote description not applied yet; hold in order
                self.pending_remote_candidates.push(candidate);
            }
            _ => {
                if let Err(err) = self.transport.add_remote_candidate(candidate).await {
                    warn!(slot = %self.slot, "remote candidate rejected: {err}");
                    self.close().await;
                }
            }
        }
    }

    /// Transmit (or buffer) a locally discovered candidate. `None` marks
    /// gathering complete and is never transmitted.
    pub fn on_local_candidate(
        &mut self,
        channel: &SignalingChannel,
        candidate: Option<IceCandidate>,
    ) {
        if self.is_closed() {
            return;
        }
        let Some(candidate) = candidate else {
            debug!(slot = %self.slot, "local candidate gathering complete");
            return;
        };
        if self.session_id.is_some() {
            self.send_peer(channel, PeerMessageInner::Ice(candidate));
        } else {
            self.pending_local_candidates.push(candidate);
        }
    }

    /// Handle the first inbound media announcement
    pub async fn on_remote_track(&mut self, stream: RemoteStream) -> TrackOutcome {
        if self.is_closed() {
            return TrackOutcome::Reject;
        }
        if stream.video_tracks == 0 {
            warn!(slot = %self.slot, stream = %stream.id, "remote stream has no video track, closing");
            self.close().await;
            return TrackOutcome::Reject;
        }
        info!(slot = %self.slot, stream = %stream.id, "media active");
        self.state = NegotiationState::Active;
        TrackOutcome::Attach(stream)
    }

    /// Tear the machine down. Idempotent; releases the media transport and
    /// leaves no state mutating afterwards.
    pub async fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        debug!(slot = %self.slot, "closing negotiation");
        self.state = NegotiationState::Closed;
        self.pending_offer = None;
        self.pending_remote_candidates.clear();
        self.pending_local_candidates.clear();
        if let Err(err) = self.transport.close().await {
            warn!(slot = %self.slot, "transport close failed: {err}");
        }
    }

    async fn apply_offer(&mut self, channel: &SignalingChannel, sdp: String) {
        self.state = NegotiationState::AwaitingRemoteDescription;
        if let Err(err) = self.transport.apply_remote_offer(sdp).await {
            warn!(slot = %self.slot, "remote offer rejected: {err}");
            self.close().await;
            return;
        }
        // A stop may have been processed while the description applied
        if self.is_closed() {
            return;
        }

        self.state = NegotiationState::AwaitingLocalDescriptionSent;
        let answer = match self.transport.create_answer().await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(slot = %self.slot, "local answer rejected: {err}");
                self.close().await;
                return;
            }
        };
        if self.is_closed() {
            return;
        }

        self.send_peer(
            channel,
            PeerMessageInner::Sdp(SdpMessage::Answer { sdp: answer }),
        );
        self.state = NegotiationState::Negotiating;

        for candidate in std::mem::take(&mut self.pending_remote_candidates) {
            if self.is_closed() {
                return;
            }
            if let Err(err) = self.transport.add_remote_candidate(candidate).await {
                warn!(slot = %self.slot, "buffered remote candidate rejected: {err}");
                self.close().await;
                return;
            }
        }
    }

    fn send_peer(&self, channel: &SignalingChannel, inner: PeerMessageInner) {
        let Some(session_id) = self.session_id.clone() else {
            // Callers check; this is the last line of defense for ordering
            warn!(slot = %self.slot, "refusing to send peer message without a session id");
            return;
        };
        channel.send(&OutgoingMessage::Peer(PeerMessage { session_id, inner }));
    }
}
