//! Locally cached view of cameras and peer availability
//!
//! The registry owns the in-memory camera collection; the server is the
//! source of truth and replaces it wholesale with every `listCameras`
//! snapshot. Reconciliation is merge-by-id, not blind replace: the
//! per-camera `preview_open` flag is transient UI state and survives
//! snapshots that still contain the camera.

use crate::signaling::protocol::{Camera, PeerStatus};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A camera row plus its transient UI state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraEntry {
    pub camera: Camera,
    /// Whether a preview modal/slot is open for this camera
    pub preview_open: bool,
}

/// Read-mostly cache of cameras and the latest known peer statuses
#[derive(Debug, Default)]
pub struct RegistryView {
    cameras: Vec<CameraEntry>,
    peers: HashMap<String, PeerStatus>,
}

impl RegistryView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a full camera-list snapshot.
    ///
    /// Each incoming record is matched by id against the previous list; a
    /// match keeps its `preview_open` flag, a new camera defaults to closed,
    /// and cameras absent from the snapshot are dropped.
    pub fn apply_snapshot(&mut self, cameras: Vec<Camera>) {
        let previous: HashMap<String, bool> = self
            .cameras
            .drain(..)
            .map(|entry| (entry.camera.id.clone(), entry.preview_open))
            .collect();

        self.cameras = cameras
            .into_iter()
            .map(|camera| {
                let preview_open = previous.get(&camera.id).copied().unwrap_or(false);
                CameraEntry {
                    camera,
                    preview_open,
                }
            })
            .collect();
        debug!(count = self.cameras.len(), "applied camera snapshot");
    }

    /// Record a peer status, latest-wins by peer id
    pub fn record_peer_status(&mut self, status: PeerStatus) {
        match status.peer_id.clone() {
            Some(peer_id) => {
                self.peers.insert(peer_id, status);
            }
            None => {
                warn!("discarding peer status without a peer id");
            }
        }
    }

    /// Latest known status for a peer
    pub fn peer_status(&self, peer_id: &str) -> Option<&PeerStatus> {
        self.peers.get(peer_id)
    }

    /// Set the transient preview flag for a camera
    pub fn set_preview_open(&mut self, camera_id: &str, open: bool) {
        if let Some(entry) = self
            .cameras
            .iter_mut()
            .find(|entry| entry.camera.id == camera_id)
        {
            entry.preview_open = open;
        }
    }

    pub fn camera(&self, camera_id: &str) -> Option<&CameraEntry> {
        self.cameras.iter().find(|entry| entry.camera.id == camera_id)
    }

    pub fn cameras(&self) -> &[CameraEntry] {
        &self.cameras
    }

    /// Forget transient state after a control-channel disconnect: all
    /// preview flags close and cached peer statuses are dropped (peer ids
    /// are per-connection and meaningless on the next generation).
    pub fn clear_transient(&mut self) {
        for entry in &mut self.cameras {
            entry.preview_open = false;
        }
        self.peers.clear();
    }
}
