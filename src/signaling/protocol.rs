//! Wire envelope for the signaling control channel
//!
//! One JSON object per text frame, discriminated by a `type` field. The
//! dialect is the camelCase camera-signalling protocol spoken by the
//! backend: peer status announcements, camera CRUD, preview control and
//! per-session SDP/ICE exchange.
//!
//! Inbound payloads parse into closed tagged variants; an unknown `type` or
//! a malformed body is a parse error handled by the channel, never a crash.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A registered video source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Camera {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub url: String,
}

/// Role a peer announces on the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Supplies live media for a camera
    Producer,
    /// Observes camera state (the admin console)
    Listener,
}

/// Latest announced status of a peer. Only the most recent status per peer
/// id is meaningful; earlier ones are overwritten.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    #[serde(default)]
    pub roles: Vec<PeerRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl PeerStatus {
    /// Status announcing this connection as a listener
    pub fn listener() -> Self {
        Self {
            roles: vec![PeerRole::Listener],
            peer_id: None,
            meta: None,
        }
    }

    pub fn producing(&self) -> bool {
        self.roles.contains(&PeerRole::Producer)
    }

    pub fn listening(&self) -> bool {
        self.roles.contains(&PeerRole::Listener)
    }

    /// Camera id this producer serves, from `meta.id`
    pub fn camera_id(&self) -> Option<&str> {
        self.meta.as_ref()?.get("id")?.as_str()
    }
}

/// SDP payload of a `peer` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SdpMessage {
    Offer { sdp: String },
    Answer { sdp: String },
}

/// ICE payload of a `peer` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_m_line_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
}

/// Session-correlated negotiation payload: either a description or a single
/// trickled candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerMessageInner {
    Sdp(SdpMessage),
    Ice(IceCandidate),
}

/// A `peer` frame: negotiation traffic tagged with the server-assigned
/// session id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMessage {
    pub session_id: String,
    #[serde(flatten)]
    pub inner: PeerMessageInner,
}

/// Messages the console sends to the signaling server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutgoingMessage {
    /// Announce this connection's role(s)
    SetPeerStatus(PeerStatus),
    /// Request the current camera list
    ListCameras,
    /// Create a camera (the server assigns the id)
    #[serde(rename_all = "camelCase")]
    AddCamera {
        name: String,
        location: String,
        url: String,
    },
    /// Update a camera
    EditCamera(Camera),
    /// Delete a camera
    #[serde(rename_all = "camelCase")]
    RemoveCamera { id: String },
    /// Ask the server to bring a camera's producer online
    #[serde(rename_all = "camelCase")]
    Preview { id: String, url: String },
    /// Ask the server to shut the camera's producer down
    #[serde(rename_all = "camelCase")]
    StopPreview { id: String },
    /// Begin a negotiation session with a producer peer
    #[serde(rename_all = "camelCase")]
    StartSession { peer_id: String },
    /// Local description or local ICE candidate
    Peer(PeerMessage),
    /// Tear a session down
    #[serde(rename_all = "camelCase")]
    EndSession { session_id: String },
}

impl fmt::Display for OutgoingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Messages the signaling server sends to the console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IncomingMessage {
    /// Post-connect identity assignment
    #[serde(rename_all = "camelCase")]
    Welcome { peer_id: String },
    /// Full camera list snapshot
    #[serde(rename_all = "camelCase")]
    ListCameras { cameras: Vec<Camera> },
    /// Producer/listener availability change
    PeerStatusChanged(PeerStatus),
    /// Confirms a `startSession` request. The server also names the
    /// producer peer, which the routing layer uses for correlation.
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
    },
    /// Producer-directed session kick-off; a listener console ignores it
    #[serde(rename_all = "camelCase")]
    StartSession {
        session_id: String,
        peer_id: String,
    },
    /// Remote description or remote ICE candidate
    Peer(PeerMessage),
    /// Server-initiated session termination
    #[serde(rename_all = "camelCase")]
    EndSession {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Server-reported error
    Error { details: String },
}
