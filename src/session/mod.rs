//! Preview session orchestration
//!
//! Turns a "preview camera C" intent into signaling traffic, correlates the
//! eventual producer appearance back to the requesting slot, and owns every
//! resulting session end to end. Guarantees at most one active session per
//! preview slot and deterministic teardown on every exit path.

pub mod negotiation;
pub mod transport;

use crate::registry::RegistryView;
use crate::signaling::channel::SignalingChannel;
use crate::signaling::protocol::{
    Camera, OutgoingMessage, PeerMessage, PeerMessageInner, PeerStatus,
};
use crate::sink::VideoSink;
use negotiation::{Negotiation, TrackOutcome};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};
use transport::{PeerTransportFactory, TransportEvent, TransportEventKind};

/// Opaque handle correlating a session to the UI video sink it feeds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotId(String);

impl SlotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SlotId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Drives preview sessions for all slots of one console
pub struct SessionOrchestrator {
    channel: SignalingChannel,
    registry: Arc<RwLock<RegistryView>>,
    factory: Arc<dyn PeerTransportFactory>,
    sink: Arc<dyn VideoSink>,
    events_tx: mpsc::Sender<TransportEvent>,
    status: watch::Sender<String>,

    /// Slot -> camera id awaiting a producer (the correlation key)
    awaiting: HashMap<SlotId, String>,
    /// Live or in-progress sessions, at most one per slot
    sessions: HashMap<SlotId, Negotiation>,
    /// Producer peer id -> slot, for routing `sessionStarted`
    peer_routes: HashMap<String, SlotId>,
    /// Server session id -> slot, for routing `peer`/`endSession`
    session_routes: HashMap<String, SlotId>,
    /// Session ids already torn down on this connection. Late traffic for
    /// them must be discarded, never routed into a replacement session.
    retired_sessions: HashSet<String>,
    /// Slot -> camera id of its current session (for stop messages and
    /// preview-flag cleanup)
    camera_of: HashMap<SlotId, String>,
    /// Monotonic stamp distinguishing a slot's successive sessions; stale
    /// transport completions carry an older stamp and are dropped
    next_generation: u64,
}

impl SessionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: SignalingChannel,
        registry: Arc<RwLock<RegistryView>>,
        factory: Arc<dyn PeerTransportFactory>,
        sink: Arc<dyn VideoSink>,
        events_tx: mpsc::Sender<TransportEvent>,
        status: watch::Sender<String>,
    ) -> Self {
        Self {
            channel,
            registry,
            factory,
            sink,
            events_tx,
            status,
            awaiting: HashMap::new(),
            sessions: HashMap::new(),
            peer_routes: HashMap::new(),
            session_routes: HashMap::new(),
            retired_sessions: HashSet::new(),
            camera_of: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Publish a human-readable phase description
    pub fn set_status(&self, text: impl Into<String>) {
        let _ = self.status.send(text.into());
    }

    /// Record the slot's awaiting-producer correlation and ask the server to
    /// bring the camera's producer online.
    ///
    /// Re-requesting on a slot simply overwrites the correlation key; a late
    /// producer match for the previous camera no longer matches and is
    /// ignored.
    pub async fn request_preview(&mut self, slot: SlotId, camera: &Camera) {
        info!(slot = %slot, camera = %camera.id, "preview requested");
        self.awaiting.insert(slot, camera.id.clone());
        self.registry
            .write()
            .await
            .set_preview_open(&camera.id, true);
        self.channel.send(&OutgoingMessage::Preview {
            id: camera.id.clone(),
            url: camera.url.clone(),
        });
        self.set_status(format!("preview requested for {}", camera.id));
    }

    /// Check a producer announcement against the awaiting correlations and
    /// start a negotiation session on a match
    pub async fn handle_peer_status(&mut self, status: &PeerStatus) {
        if !status.producing() {
            return;
        }
        let Some(camera_id) = status.camera_id().map(str::to_string) else {
            return;
        };
        let Some(peer_id) = status.peer_id.clone() else {
            warn!("producer status without a peer id");
            return;
        };
        let Some(slot) = self
            .awaiting
            .iter()
            .find(|(_, awaited)| **awaited == camera_id)
            .map(|(slot, _)| slot.clone())
        else {
            debug!(peer = %peer_id, camera = %camera_id, "producer not awaited, retained for later");
            return;
        };

        self.awaiting.remove(&slot);
        self.start_session(slot, camera_id, peer_id).await;
    }

    async fn start_session(&mut self, slot: SlotId, camera_id: String, peer_id: String) {
        // At most one session per slot: fully release the old one first
        self.teardown_slot(&slot).await;

        self.next_generation += 1;
        let generation = self.next_generation;
        let transport = match self
            .factory
            .create(slot.clone(), generation, self.events_tx.clone())
            .await
        {
            Ok(transport) => transport,
            Err(err) => {
                warn!(slot = %slot, "failed to create media transport: {err}");
                self.set_status(format!("error: {err}"));
                self.registry.write().await.set_preview_open(&camera_id, false);
                return;
            }
        };

        let mut negotiation = Negotiation::new(slot.clone(), peer_id.clone(), generation, transport);
        negotiation.start(&self.channel);
        self.sessions.insert(slot.clone(), negotiation);
        self.peer_routes.insert(peer_id.clone(), slot.clone());
        self.camera_of.insert(slot.clone(), camera_id);
        self.set_status(format!("negotiating with {peer_id}"));
    }

    /// Route a `sessionStarted` confirmation to its session
    pub async fn handle_session_started(&mut self, session_id: String, peer_id: Option<String>) {
        if self.retired_sessions.contains(&session_id) {
            warn!(session = %session_id, "sessionStarted for ended session, discarded");
            return;
        }
        let slot = match peer_id {
            Some(peer_id) => self.peer_routes.get(&peer_id).cloned(),
            None => self.sole_unconfirmed_slot(),
        };
        let Some(slot) = slot else {
            warn!(session = %session_id, "sessionStarted for unknown session, discarded");
            return;
        };
        let Some(negotiation) = self.sessions.get_mut(&slot) else {
            warn!(slot = %slot, "sessionStarted after teardown, discarded");
            return;
        };
        self.session_routes.insert(session_id.clone(), slot.clone());
        negotiation.on_session_started(&self.channel, session_id).await;
        self.reap_if_closed(&slot).await;
    }

    /// Route a remote description or candidate to its session
    pub async fn handle_peer_message(&mut self, message: PeerMessage) {
        if self.retired_sessions.contains(&message.session_id) {
            warn!(session = %message.session_id, "peer message for ended session, discarded");
            return;
        }
        let slot = match self.session_routes.get(&message.session_id) {
            Some(slot) => Some(slot.clone()),
            // The server's peer frame can overtake sessionStarted; with a
            // single unconfirmed session a never-seen id is unambiguous
            // and the payload is buffered
            None => self.sole_unconfirmed_slot(),
        };
        let Some(slot) = slot else {
            warn!(session = %message.session_id, "peer message for unknown session, discarded");
            return;
        };
        let Some(negotiation) = self.sessions.get_mut(&slot) else {
            warn!(slot = %slot, "peer message after teardown, discarded");
            return;
        };
        match message.inner {
            PeerMessageInner::Sdp(sdp) => {
                negotiation.on_remote_sdp(&self.channel, sdp).await;
            }
            PeerMessageInner::Ice(candidate) => {
                negotiation.on_remote_ice(candidate).await;
            }
        }
        self.reap_if_closed(&slot).await;
    }

    /// Server-initiated termination
    pub async fn handle_end_session(&mut self, session_id: Option<String>) {
        match session_id {
            Some(session_id) => {
                if let Some(slot) = self.session_routes.get(&session_id).cloned() {
                    info!(slot = %slot, session = %session_id, "session ended by server");
                    self.teardown_slot(&slot).await;
                } else {
                    warn!(session = %session_id, "endSession for unknown session, discarded");
                }
            }
            None => {
                // No correlation on the wire; everything in flight is dead
                warn!("endSession without a session id, tearing down all sessions");
                self.abandon_all().await;
            }
        }
        self.set_status("session ended");
    }

    /// Server-reported error. The wire carries no session correlation, so
    /// every in-flight session is torn down.
    pub async fn handle_error(&mut self, details: &str) {
        warn!("server error: {details}");
        let slots: Vec<SlotId> = self.sessions.keys().cloned().collect();
        for slot in slots {
            self.teardown_slot(&slot).await;
        }
        self.set_status(format!("error: {details}"));
    }

    /// Stop a slot's preview: tell the server, then release local resources
    /// unconditionally (teardown never depends on network success).
    pub async fn stop_preview(&mut self, slot: &SlotId) {
        let camera_id = self
            .camera_of
            .get(slot)
            .or_else(|| self.awaiting.get(slot))
            .cloned();
        if let Some(camera_id) = &camera_id {
            self.channel.send(&OutgoingMessage::StopPreview {
                id: camera_id.clone(),
            });
        }
        self.awaiting.remove(slot);
        if let Some(camera_id) = camera_id {
            self.registry.write().await.set_preview_open(&camera_id, false);
        }
        self.teardown_slot(slot).await;
        self.set_status("preview stopped");
    }

    /// Dispatch a transport callback, dropping it when it belongs to a
    /// session that has since been replaced or closed
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        let Some(negotiation) = self.sessions.get_mut(&event.slot) else {
            debug!(slot = %event.slot, "transport event for released session, dropped");
            return;
        };
        if negotiation.generation() != event.generation {
            debug!(
                slot = %event.slot,
                event_generation = event.generation,
                session_generation = negotiation.generation(),
                "stale transport event dropped"
            );
            return;
        }
        match event.kind {
            TransportEventKind::LocalCandidate(candidate) => {
                negotiation.on_local_candidate(&self.channel, candidate);
            }
            TransportEventKind::RemoteTrack(stream) => {
                match negotiation.on_remote_track(stream).await {
                    TrackOutcome::Attach(stream) => {
                        self.sink.attach(&event.slot, stream).await;
                        self.set_status("preview active");
                    }
                    TrackOutcome::Reject => {
                        self.teardown_slot(&event.slot).await;
                    }
                }
            }
        }
        self.reap_if_closed(&event.slot).await;
    }

    /// Abandon every in-flight preview: sessions, correlations, routes.
    /// Used when the control channel drops; nothing is resumed afterwards.
    pub async fn abandon_all(&mut self) {
        let slots: Vec<SlotId> = self
            .sessions
            .keys()
            .cloned()
            .chain(self.awaiting.keys().cloned())
            .collect();
        for slot in slots {
            self.teardown_slot(&slot).await;
        }
        self.awaiting.clear();
        // Session ids are per-connection; nothing on the next connection
        // can legitimately reuse one, so the tombstones go too
        self.retired_sessions.clear();
        debug!("all sessions and correlations abandoned");
    }

    /// Number of live sessions (diagnostics)
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a slot still awaits a producer match
    pub fn is_awaiting(&self, slot: &SlotId) -> bool {
        self.awaiting.contains_key(slot)
    }

    async fn teardown_slot(&mut self, slot: &SlotId) {
        if let Some(mut negotiation) = self.sessions.remove(slot) {
            negotiation.close().await;
            self.peer_routes
                .retain(|_, routed| routed != slot);
            let retired = &mut self.retired_sessions;
            self.session_routes.retain(|session_id, routed| {
                if routed == slot {
                    retired.insert(session_id.clone());
                    return false;
                }
                true
            });
            self.sink.detach(slot).await;
        }
        if let Some(camera_id) = self.camera_of.remove(slot) {
            self.registry.write().await.set_preview_open(&camera_id, false);
        }
    }

    /// A session closed itself (negotiation failure); release its slot
    async fn reap_if_closed(&mut self, slot: &SlotId) {
        let closed = self
            .sessions
            .get(slot)
            .is_some_and(|negotiation| negotiation.is_closed());
        if closed {
            self.teardown_slot(slot).await;
            self.set_status("preview closed");
        }
    }

    fn sole_unconfirmed_slot(&self) -> Option<SlotId> {
        let mut unconfirmed = self
            .sessions
            .iter()
            .filter(|(_, negotiation)| negotiation.session_id().is_none());
        let (slot, _) = unconfirmed.next()?;
        if unconfirmed.next().is_some() {
            return None;
        }
        Some(slot.clone())
    }
}
