//! Video sink contract
//!
//! Each preview slot exposes an addressable sink that accepts one live
//! media-stream handle. Attaching a new handle replaces any previous one;
//! detaching happens on teardown.

use crate::session::SlotId;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use webrtc::track::track_remote::TrackRemote;

/// Handle to a live remote media stream
#[derive(Clone)]
pub struct RemoteStream {
    /// Stream id announced by the remote peer
    pub id: String,
    /// Number of video sub-tracks; zero is a protocol violation and the
    /// session owning the stream is torn down instead of attached
    pub video_tracks: usize,
    /// The underlying track, when the stream comes from a live peer
    /// connection (tests construct handles without one)
    pub track: Option<Arc<TrackRemote>>,
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("id", &self.id)
            .field("video_tracks", &self.video_tracks)
            .field("has_track", &self.track.is_some())
            .finish()
    }
}

/// Receives live streams for preview slots
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Attach a stream to the slot's sink, replacing any previous one
    async fn attach(&self, slot: &SlotId, stream: RemoteStream);

    /// Detach whatever the slot currently shows
    async fn detach(&self, slot: &SlotId);
}

/// Sink that only logs attach/detach; useful for the CLI and for soak runs
/// without a renderer
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl VideoSink for LogSink {
    async fn attach(&self, slot: &SlotId, stream: RemoteStream) {
        info!(slot = %slot, stream = %stream.id, video_tracks = stream.video_tracks, "stream attached");
    }

    async fn detach(&self, slot: &SlotId) {
        info!(slot = %slot, "stream detached");
    }
}
