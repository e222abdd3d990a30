//! Camera and microphone lifecycle for the local participant

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use carelink_protocol::TrackKind;
use tokio::sync::RwLock;

use crate::error::MediaError;
use crate::notify::{Notification, Notifier};

use super::{DeviceInfo, MediaConstraints, MediaDevices, MediaStream};

#[derive(Debug, Clone)]
pub struct LocalMediaState {
    pub stream: Option<MediaStream>,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub loading: bool,
    pub error: Option<MediaError>,
}

impl Default for LocalMediaState {
    fn default() -> Self {
        Self {
            stream: None,
            video_enabled: true,
            audio_enabled: true,
            loading: false,
            error: None,
        }
    }
}

/// Owns the local capture stream
///
/// Every acquisition and every `stop_stream` bumps a generation counter.
/// An acquisition that resolves after a newer request or a stop releases
/// what it got instead of publishing it.
#[derive(Clone)]
pub struct LocalMediaController {
    devices: Arc<dyn MediaDevices>,
    notifier: Arc<dyn Notifier>,
    state: Arc<RwLock<LocalMediaState>>,
    generation: Arc<AtomicU64>,
}

impl LocalMediaController {
    pub fn new(devices: Arc<dyn MediaDevices>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            devices,
            notifier,
            state: Arc::new(RwLock::new(LocalMediaState::default())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Acquire a fresh stream, replacing any current one
    ///
    /// Without explicit constraints the last-known enabled flags are used.
    /// Returns `None` on device failure or when a newer request or a stop
    /// superseded this one.
    pub async fn get_media_stream(&self, constraints: Option<MediaConstraints>) -> Option<MediaStream> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let constraints = {
            let mut state = self.state.write().await;
            if let Some(previous) = state.stream.take() {
                previous.stop();
            }
            state.loading = true;
            state.error = None;
            constraints.unwrap_or(MediaConstraints {
                audio: state.audio_enabled,
                video: state.video_enabled,
            })
        };

        let result = self.devices.get_user_media(constraints).await;

        let mut state = self.state.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Media acquisition superseded, releasing tracks");
            if let Ok(stream) = &result {
                stream.stop();
            }
            return None;
        }
        state.loading = false;

        match result {
            Ok(stream) => {
                tracing::info!(
                    "Acquired local media ({} tracks, audio={}, video={})",
                    stream.tracks().len(),
                    constraints.audio,
                    constraints.video
                );
                if let Some(previous) = state.stream.replace(stream.clone()) {
                    previous.stop();
                }
                Some(stream)
            }
            Err(e) => {
                tracing::warn!("Failed to acquire local media: {}", e);
                self.notifier.notify(Notification::error(
                    "Camera or microphone unavailable",
                    e.user_message(),
                ));
                state.error = Some(e);
                None
            }
        }
    }

    /// Flip the video tracks' enabled flag; a no-op without a stream
    pub async fn toggle_video(&self) -> bool {
        self.toggle(TrackKind::Video).await
    }

    /// Flip the audio tracks' enabled flag; a no-op without a stream
    pub async fn toggle_audio(&self) -> bool {
        self.toggle(TrackKind::Audio).await
    }

    async fn toggle(&self, kind: TrackKind) -> bool {
        let mut state = self.state.write().await;
        let current = match kind {
            TrackKind::Video => state.video_enabled,
            TrackKind::Audio => state.audio_enabled,
        };
        let Some(stream) = state.stream.as_ref() else {
            return current;
        };

        let enabled = !current;
        for track in stream.tracks_of(kind) {
            track.set_enabled(enabled);
        }
        match kind {
            TrackKind::Video => state.video_enabled = enabled,
            TrackKind::Audio => state.audio_enabled = enabled,
        }
        tracing::debug!("Local {} enabled: {}", kind.as_str(), enabled);
        enabled
    }

    /// Stop every track and reset to defaults; safe to call repeatedly
    pub async fn stop_stream(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        if let Some(stream) = state.stream.take() {
            stream.stop();
            tracing::info!("Stopped local media stream {}", stream.id());
        }
        *state = LocalMediaState::default();
    }

    pub async fn enumerate_devices(&self) -> Vec<DeviceInfo> {
        match self.devices.enumerate_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("Failed to enumerate media devices: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn state(&self) -> LocalMediaState {
        self.state.read().await.clone()
    }

    pub async fn stream(&self) -> Option<MediaStream> {
        self.state.read().await.stream.clone()
    }

    pub async fn is_video_enabled(&self) -> bool {
        self.state.read().await.video_enabled
    }

    pub async fn is_audio_enabled(&self) -> bool {
        self.state.read().await.audio_enabled
    }
}
