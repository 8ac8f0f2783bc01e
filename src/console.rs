//! Top-level console lifecycle
//!
//! Owns the process-wide control channel, the registry view, and the
//! session orchestrator, and multiplexes their events through one
//! cooperative loop: channel events, transport callbacks and operator
//! commands are handled strictly in arrival order, so no component ever
//! observes interleaved mutation.

use crate::config::ConsoleConfig;
use crate::registry::{CameraEntry, RegistryView};
use crate::session::transport::{
    PeerTransportFactory, TransportEvent, WebRtcTransportFactory,
};
use crate::session::{SessionOrchestrator, SlotId};
use crate::signaling::channel::{ChannelEvent, SignalingChannel};
use crate::signaling::protocol::{
    Camera, IncomingMessage, OutgoingMessage, PeerStatus,
};
use crate::sink::VideoSink;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Operator intents executed by the event loop
enum Command {
    RequestPreview {
        slot: SlotId,
        camera_id: String,
    },
    StopPreview {
        slot: SlotId,
    },
    AddCamera {
        name: String,
        location: String,
        url: String,
    },
    EditCamera(Camera),
    RemoveCamera {
        id: String,
    },
    RefreshCameras,
    PeerId {
        reply: oneshot::Sender<Option<String>>,
    },
    Shutdown,
}

/// Handle to a running console instance.
///
/// All methods are cheap message sends into the event loop; reads of the
/// camera cache go through a shared snapshot.
pub struct Console {
    channel: SignalingChannel,
    registry: Arc<RwLock<RegistryView>>,
    status_rx: watch::Receiver<String>,
    cmd_tx: mpsc::Sender<Command>,
    loop_task: JoinHandle<()>,
    channel_task: JoinHandle<()>,
}

impl Console {
    /// Start a console against the configured signaling server with the
    /// production WebRTC transport
    pub fn spawn(config: ConsoleConfig, sink: Arc<dyn VideoSink>) -> Result<Self> {
        let factory = Arc::new(WebRtcTransportFactory::new(config.ice_servers.clone()));
        Self::spawn_with_factory(config, sink, factory)
    }

    /// Start a console with an injected transport factory (tests drive the
    /// negotiation machine through this seam)
    pub fn spawn_with_factory(
        config: ConsoleConfig,
        sink: Arc<dyn VideoSink>,
        factory: Arc<dyn PeerTransportFactory>,
    ) -> Result<Self> {
        config.validate()?;

        let channel = SignalingChannel::new(config.clone());
        let registry = Arc::new(RwLock::new(RegistryView::new()));
        let (status_tx, status_rx) = watch::channel("connecting".to_string());
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let orchestrator = SessionOrchestrator::new(
            channel.clone(),
            Arc::clone(&registry),
            factory,
            sink,
            events_tx,
            status_tx,
        );

        let channel_runner = channel.clone();
        let channel_task = tokio::spawn(async move { channel_runner.run().await });

        let event_loop = EventLoop {
            channel: channel.clone(),
            registry: Arc::clone(&registry),
            orchestrator,
            peer_id: None,
        };
        let chan_rx = channel.subscribe();
        let loop_task = tokio::spawn(event_loop.run(chan_rx, events_rx, cmd_rx));

        Ok(Self {
            channel,
            registry,
            status_rx,
            cmd_tx,
            loop_task,
            channel_task,
        })
    }

    /// Watchable human-readable status text, updated at each phase
    /// transition
    pub fn status(&self) -> watch::Receiver<String> {
        self.status_rx.clone()
    }

    /// Snapshot of the cached camera list
    pub async fn cameras(&self) -> Vec<CameraEntry> {
        self.registry.read().await.cameras().to_vec()
    }

    /// Identity assigned by the server on the current connection, if any
    pub async fn peer_id(&self) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::PeerId { reply }).await?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Request a live preview of a camera into the given slot
    pub async fn request_preview(&self, slot: SlotId, camera_id: impl Into<String>) -> Result<()> {
        self.command(Command::RequestPreview {
            slot,
            camera_id: camera_id.into(),
        })
        .await
    }

    /// Stop whatever the slot currently previews
    pub async fn stop_preview(&self, slot: SlotId) -> Result<()> {
        self.command(Command::StopPreview { slot }).await
    }

    pub async fn add_camera(
        &self,
        name: impl Into<String>,
        location: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<()> {
        self.command(Command::AddCamera {
            name: name.into(),
            location: location.into(),
            url: url.into(),
        })
        .await
    }

    pub async fn edit_camera(&self, camera: Camera) -> Result<()> {
        self.command(Command::EditCamera(camera)).await
    }

    pub async fn remove_camera(&self, id: impl Into<String>) -> Result<()> {
        self.command(Command::RemoveCamera { id: id.into() }).await
    }

    /// Re-request the camera list snapshot
    pub async fn refresh_cameras(&self) -> Result<()> {
        self.command(Command::RefreshCameras).await
    }

    /// Tear the console down: all sessions, then the control channel
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
        let _ = self.loop_task.await;
        self.channel.shutdown();
        let _ = self.channel_task.await;
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| Error::Shutdown)
    }
}

struct EventLoop {
    channel: SignalingChannel,
    registry: Arc<RwLock<RegistryView>>,
    orchestrator: SessionOrchestrator,
    peer_id: Option<String>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut chan_rx: broadcast::Receiver<ChannelEvent>,
        mut events_rx: mpsc::Receiver<TransportEvent>,
        mut cmd_rx: mpsc::Receiver<Command>,
    ) {
        loop {
            tokio::select! {
                event = chan_rx.recv() => match event {
                    Ok(event) => self.handle_channel_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "event loop lagged behind the control channel");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(event) = events_rx.recv() => {
                    self.orchestrator.handle_transport_event(event).await;
                }
                command = cmd_rx.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.orchestrator.abandon_all().await;
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
            }
        }
        info!("console event loop stopped");
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Ready { generation } => {
                info!(generation, "control channel ready, announcing roles");
                self.orchestrator.set_status("connected");
                // Role announcement and list refresh are re-issued on every
                // (re)connect; nothing else is replayed.
                self.channel
                    .send(&OutgoingMessage::SetPeerStatus(PeerStatus::listener()));
                self.channel.send(&OutgoingMessage::ListCameras);
            }
            ChannelEvent::Message { message, .. } => self.handle_message(message).await,
            ChannelEvent::ProtocolError { details, .. } => {
                self.orchestrator
                    .set_status(format!("protocol error: {details}"));
            }
            ChannelEvent::Closed { generation } => {
                warn!(generation, "control channel lost, resetting local state");
                self.orchestrator.set_status("disconnected, reconnecting");
                self.peer_id = None;
                self.orchestrator.abandon_all().await;
                self.registry.write().await.clear_transient();
            }
        }
    }

    async fn handle_message(&mut self, message: IncomingMessage) {
        match message {
            IncomingMessage::Welcome { peer_id } => {
                info!(peer_id = %peer_id, "welcomed by signaling server");
                self.peer_id = Some(peer_id);
            }
            IncomingMessage::ListCameras { cameras } => {
                self.registry.write().await.apply_snapshot(cameras);
            }
            IncomingMessage::PeerStatusChanged(status) => {
                self.registry.write().await.record_peer_status(status.clone());
                self.orchestrator.handle_peer_status(&status).await;
            }
            IncomingMessage::SessionStarted {
                session_id,
                peer_id,
            } => {
                self.orchestrator
                    .handle_session_started(session_id, peer_id)
                    .await;
            }
            IncomingMessage::StartSession { .. } => {
                // Producer-directed; a listener console never serves media
                debug!("ignoring producer-directed startSession");
            }
            IncomingMessage::Peer(message) => {
                self.orchestrator.handle_peer_message(message).await;
            }
            IncomingMessage::EndSession { session_id } => {
                self.orchestrator.handle_end_session(session_id).await;
            }
            IncomingMessage::Error { details } => {
                self.orchestrator.handle_error(&details).await;
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::RequestPreview { slot, camera_id } => {
                let camera = self
                    .registry
                    .read()
                    .await
                    .camera(&camera_id)
                    .map(|entry| entry.camera.clone());
                match camera {
                    Some(camera) => self.orchestrator.request_preview(slot, &camera).await,
                    None => {
                        warn!(camera = %camera_id, "preview requested for unknown camera");
                        self.orchestrator
                            .set_status(format!("unknown camera {camera_id}"));
                    }
                }
            }
            Command::StopPreview { slot } => {
                self.orchestrator.stop_preview(&slot).await;
            }
            Command::AddCamera {
                name,
                location,
                url,
            } => {
                self.channel.send(&OutgoingMessage::AddCamera {
                    name,
                    location,
                    url,
                });
            }
            Command::EditCamera(camera) => {
                self.channel.send(&OutgoingMessage::EditCamera(camera));
            }
            Command::RemoveCamera { id } => {
                self.channel.send(&OutgoingMessage::RemoveCamera { id });
            }
            Command::RefreshCameras => {
                self.channel.send(&OutgoingMessage::ListCameras);
            }
            Command::PeerId { reply } => {
                let _ = reply.send(self.peer_id.clone());
            }
            Command::Shutdown => unreachable!("handled by the select loop"),
        }
    }
}
