//! Local capture media.
//!
//! One local audio/video stream is shared by every call. [`MediaPool`]
//! acquires it lazily on first use, counts which peers hold it and hands it
//! back to the [`MediaEngine`] exactly once, when the last holder lets go.

use crate::error::{Error, Result};
use crate::utils::random_id;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Handle to an acquired local stream
#[derive(Clone)]
pub struct LocalMedia {
    pub id: String,
    pub tracks: Vec<Arc<TrackLocalStaticSample>>,
}

impl LocalMedia {
    /// Stream with no tracks, for engines that only account for acquisition
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Where the local preview of a freshly acquired stream goes
pub const LOCAL_PREVIEW: &str = "local-preview";

#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn acquire_local_media(&self) -> Result<LocalMedia>;
    async fn release(&self, media: LocalMedia);
    /// Routes `media` to a rendering sink
    async fn attach(&self, media: &LocalMedia, sink: &str) -> Result<()>;
}

/// Opus microphone and VP8 camera tracks.
///
/// Samples are written by whatever owns the capture device; the engine only
/// creates the tracks the peer connections send.
#[derive(Default)]
pub struct TrackMediaEngine;

impl TrackMediaEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaEngine for TrackMediaEngine {
    async fn acquire_local_media(&self) -> Result<LocalMedia> {
        let stream_id = format!("meshlobby-{}", random_id());
        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            stream_id.clone(),
        ));
        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            stream_id.clone(),
        ));
        info!("Local media {} ready", stream_id);
        Ok(LocalMedia {
            id: stream_id,
            tracks: vec![audio, video],
        })
    }

    async fn release(&self, media: LocalMedia) {
        info!("Local media {} released", media.id);
    }

    async fn attach(&self, media: &LocalMedia, sink: &str) -> Result<()> {
        debug!("Local media {} attached to {}", media.id, sink);
        Ok(())
    }
}

#[derive(Default)]
struct PoolState {
    media: Option<LocalMedia>,
    users: HashSet<String>,
}

pub struct MediaPool {
    engine: Arc<dyn MediaEngine>,
    state: Mutex<PoolState>,
}

impl MediaPool {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            engine,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Returns the shared stream, acquiring it if nobody holds it yet
    pub async fn acquire(&self, peer_id: &str) -> Result<LocalMedia> {
        let mut state = self.state.lock().await;
        if let Some(media) = &state.media {
            let media = media.clone();
            state.users.insert(peer_id.to_string());
            return Ok(media);
        }

        let media = self
            .engine
            .acquire_local_media()
            .await
            .map_err(|e| match e {
                Error::MediaAcquisition(_) => e,
                other => Error::MediaAcquisition(other.to_string()),
            })?;
        debug!("Acquired local media {} for {}", media.id, peer_id);
        if let Err(e) = self.engine.attach(&media, LOCAL_PREVIEW).await {
            warn!("Local preview unavailable: {}", e);
        }
        state.media = Some(media.clone());
        state.users.insert(peer_id.to_string());
        Ok(media)
    }

    /// Drops `peer_id`'s hold; the stream goes back when no holder is left
    pub async fn release_for(&self, peer_id: &str) {
        let released = {
            let mut state = self.state.lock().await;
            if !state.users.remove(peer_id) || !state.users.is_empty() {
                None
            } else {
                state.media.take()
            }
        };
        if let Some(media) = released {
            debug!("Last holder {} gone, releasing {}", peer_id, media.id);
            self.engine.release(media).await;
        }
    }

    /// Releases the stream regardless of holders
    pub async fn stop(&self) {
        let released = {
            let mut state = self.state.lock().await;
            state.users.clear();
            state.media.take()
        };
        if let Some(media) = released {
            self.engine.release(media).await;
        }
    }

    pub async fn is_held(&self) -> bool {
        self.state.lock().await.media.is_some()
    }

    #[cfg(test)]
    async fn holders(&self) -> usize {
        self.state.lock().await.users.len()
    }
}
