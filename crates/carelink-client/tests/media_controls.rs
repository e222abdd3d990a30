//! Local media acquisition and track toggles

mod common;

use std::sync::Arc;

use carelink_client::error::MediaError;
use carelink_client::media::{DeviceKind, MediaConstraints};
use carelink_client::LocalMediaController;
use carelink_protocol::TrackKind;
use common::{FakeDevices, RecordingNotifier, eventually};

fn controller() -> (LocalMediaController, Arc<FakeDevices>, Arc<RecordingNotifier>) {
    let devices = Arc::new(FakeDevices::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let media = LocalMediaController::new(devices.clone(), notifier.clone());
    (media, devices, notifier)
}

#[tokio::test]
async fn test_toggle_video_and_audio() {
    let (media, _, _) = controller();
    let stream = media.get_media_stream(None).await.unwrap();
    assert_eq!(stream.tracks().len(), 2);

    assert!(!media.toggle_video().await);
    assert!(!media.is_video_enabled().await);
    assert!(stream.tracks_of(TrackKind::Video).all(|t| !t.is_enabled()));
    assert!(stream.tracks_of(TrackKind::Audio).all(|t| t.is_enabled()));

    assert!(!media.toggle_audio().await);
    assert!(stream.tracks_of(TrackKind::Audio).all(|t| !t.is_enabled()));

    assert!(media.toggle_video().await);
    assert!(stream.tracks_of(TrackKind::Video).all(|t| t.is_enabled()));
}

#[tokio::test]
async fn test_toggle_without_stream_is_noop() {
    let (media, _, _) = controller();
    assert!(media.toggle_video().await);
    assert!(media.toggle_audio().await);
    assert!(media.is_video_enabled().await);
}

#[tokio::test]
async fn test_stop_stream_resets_defaults() {
    let (media, devices, _) = controller();
    media.get_media_stream(None).await.unwrap();
    media.toggle_video().await;

    media.stop_stream().await;
    media.stop_stream().await;

    assert!(devices.issued()[0].tracks().iter().all(|t| !t.is_live()));
    let state = media.state().await;
    assert!(state.stream.is_none());
    assert!(state.video_enabled && state.audio_enabled);
    assert!(!state.loading);

    // Toggling after stop does not fail and the next stream starts enabled
    assert!(media.toggle_video().await);
    let stream = media.get_media_stream(None).await.unwrap();
    assert!(stream.tracks().iter().all(|t| t.is_enabled()));
}

#[tokio::test]
async fn test_new_stream_replaces_previous() {
    let (media, devices, _) = controller();
    media.get_media_stream(None).await.unwrap();
    media.get_media_stream(None).await.unwrap();

    let issued = devices.issued();
    assert_eq!(issued.len(), 2);
    assert!(!issued[0].is_active());
    assert!(issued[1].is_active());
}

#[tokio::test]
async fn test_overlapping_acquisitions_leave_one_live_stream() {
    let (devices, gate) = FakeDevices::gated();
    let devices = Arc::new(devices);
    let media = LocalMediaController::new(devices.clone(), Arc::new(RecordingNotifier::default()));

    let first = tokio::spawn({
        let media = media.clone();
        async move { media.get_media_stream(None).await }
    });
    eventually(|| devices.requests() == 1).await;
    let second = tokio::spawn({
        let media = media.clone();
        async move { media.get_media_stream(None).await }
    });
    eventually(|| devices.requests() == 2).await;

    gate.notify_one();
    gate.notify_one();
    let first = first.await.unwrap();
    let second = second.await.unwrap();

    // Only the newest request publishes its stream
    assert!(first.is_none());
    let published = second.unwrap();

    let issued = devices.issued();
    assert_eq!(issued.len(), 2);
    let live: Vec<_> = issued.iter().filter(|s| s.is_active()).collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id(), published.id());
    assert_eq!(media.stream().await.unwrap().id(), published.id());
    assert!(!media.state().await.loading);
}

#[tokio::test]
async fn test_explicit_constraints() {
    let (media, _, _) = controller();
    let stream = media
        .get_media_stream(Some(MediaConstraints {
            audio: true,
            video: false,
        }))
        .await
        .unwrap();
    assert_eq!(stream.tracks().len(), 1);
    assert_eq!(stream.tracks()[0].kind(), TrackKind::Audio);
}

#[tokio::test]
async fn test_acquisition_failure_is_reported() {
    let (media, devices, notifier) = controller();
    devices.fail_with(Some(MediaError::DeviceNotFound("camera".into())));

    assert!(media.get_media_stream(None).await.is_none());

    let state = media.state().await;
    assert_eq!(state.error, Some(MediaError::DeviceNotFound("camera".into())));
    assert!(!state.loading);
    let notifications = notifier.all();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].message, "No camera or microphone was found.");

    // A successful retry clears the error
    devices.fail_with(None);
    assert!(media.get_media_stream(None).await.is_some());
    assert!(media.state().await.error.is_none());
}

#[tokio::test]
async fn test_enumerate_devices() {
    let (media, devices, _) = controller();
    let found = media.enumerate_devices().await;
    assert_eq!(found.len(), 2);
    assert!(found.iter().any(|d| d.kind == DeviceKind::VideoInput));

    devices.fail_with(Some(MediaError::PermissionDenied));
    assert!(media.enumerate_devices().await.is_empty());
}
