//! Local media: tracks, streams and the capture device seam

pub mod local;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use carelink_protocol::TrackKind;
use tokio::sync::watch;
use uuid::Uuid;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::{MediaError, RtcError};
use crate::rtc::SendParameters;

pub use local::{LocalMediaController, LocalMediaState};

/// A single local capture track
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    live: AtomicBool,
    send_parameters: watch::Sender<SendParameters>,
    sample_track: Option<Arc<TrackLocalStaticSample>>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
            send_parameters: watch::Sender::new(SendParameters::default()),
            sample_track: None,
        }
    }

    pub fn with_sample_track(
        kind: TrackKind,
        label: impl Into<String>,
        sample_track: Arc<TrackLocalStaticSample>,
    ) -> Self {
        Self {
            sample_track: Some(sample_track),
            ..Self::new(kind, label)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Disabled tracks stay negotiated but send nothing
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Release the device; a stopped track never restarts
    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::debug!("Stopped {} track {}", self.kind.as_str(), self.id);
        }
    }

    pub fn sample_track(&self) -> Option<&Arc<TrackLocalStaticSample>> {
        self.sample_track.as_ref()
    }

    pub fn send_parameters(&self) -> SendParameters {
        self.send_parameters.borrow().clone()
    }

    pub fn update_send_parameters(&self, parameters: SendParameters) {
        self.send_parameters.send_replace(parameters);
    }

    /// Encoders follow sender limits through this receiver
    pub fn watch_send_parameters(&self) -> watch::Receiver<SendParameters> {
        self.send_parameters.subscribe()
    }

    /// Write an encoded frame. Returns false when the track is muted or stopped.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool, RtcError> {
        if !self.is_live() || !self.is_enabled() {
            return Ok(false);
        }
        match &self.sample_track {
            Some(track) => {
                track.write_sample(sample).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Tracks acquired together from one capture request
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    AudioInput,
    AudioOutput,
    VideoInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
}

/// Capture device access
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError>;

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_final() {
        let track = MediaTrack::new(TrackKind::Video, "cam");
        track.set_enabled(false);
        track.stop();
        track.set_enabled(true);
        assert!(!track.is_live());
        assert!(track.is_enabled());
    }

    #[test]
    fn test_stream_filters_by_kind() {
        let stream = MediaStream::new(
            "s",
            vec![
                Arc::new(MediaTrack::new(TrackKind::Audio, "mic")),
                Arc::new(MediaTrack::new(TrackKind::Video, "cam")),
            ],
        );
        assert_eq!(stream.tracks_of(TrackKind::Video).count(), 1);
        assert!(stream.is_active());
        stream.stop();
        assert!(!stream.is_active());
    }

    #[tokio::test]
    async fn test_muted_track_skips_samples() {
        let track = MediaTrack::new(TrackKind::Audio, "mic");
        track.set_enabled(false);
        assert!(!track.write_sample(&Sample::default()).await.unwrap());
    }
}
