//! # camconsole
//!
//! Signaling and preview-session core for a camera admin console.
//!
//! The crate keeps an authoritative local view of registered cameras and
//! online producer peers over a persistent control channel, and establishes
//! live peer-to-peer media sessions on demand:
//!
//! - [`signaling`] — the reconnecting control-channel client and the JSON
//!   wire envelope it speaks
//! - [`registry`] — the cached camera list and peer statuses, reconciled
//!   against server snapshots without losing transient UI state
//! - [`session`] — the per-slot session orchestrator and the SDP/ICE
//!   negotiation state machine
//! - [`console`] — the top-level event loop tying the pieces together
//!
//! ```no_run
//! use camconsole::{Console, ConsoleConfig, LogSink, SlotId};
//! use std::sync::Arc;
//!
//! # async fn run() -> camconsole::Result<()> {
//! let console = Console::spawn(
//!     ConsoleConfig::new("ws://127.0.0.1:8080/ws"),
//!     Arc::new(LogSink),
//! )?;
//! console.request_preview(SlotId::new("main"), "camera-1").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod console;
pub mod error;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod sink;

pub use config::ConsoleConfig;
pub use console::Console;
pub use error::{Error, Result};
pub use registry::{CameraEntry, RegistryView};
pub use session::negotiation::NegotiationState;
pub use session::transport::{
    PeerTransport, PeerTransportFactory, TransportEvent, TransportEventKind,
    WebRtcTransportFactory,
};
pub use session::{SessionOrchestrator, SlotId};
pub use signaling::{
    Camera, ChannelEvent, IceCandidate, IncomingMessage, OutgoingMessage, PeerMessage,
    PeerMessageInner, PeerRole, PeerStatus, SdpMessage, SignalingChannel,
};
pub use sink::{LogSink, RemoteStream, VideoSink};
