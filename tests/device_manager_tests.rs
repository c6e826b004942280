// Integration tests for device enumeration, selection and stream ownership

mod common;

use common::MockPlatform;
use interview_call::media::{
    DeviceConfig, DeviceManager, FileDevice, FilePlatform, MediaConstraints, MediaKind,
    MediaPlatform,
};
use interview_call::MediaError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn manager(platform: &Arc<MockPlatform>, video: bool) -> DeviceManager {
    DeviceManager::new(
        platform.clone(),
        DeviceConfig {
            video,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_refresh_defaults_to_first_device() {
    let platform = MockPlatform::standard();
    let devices = manager(&platform, false);

    devices.refresh_devices().await.unwrap();

    assert_eq!(devices.selected_audio_device().await.as_deref(), Some("mic-1"));
    assert_eq!(devices.selected_video_device().await.as_deref(), Some("cam-1"));
    assert_eq!(devices.devices(MediaKind::Audio).await.len(), 2);
    assert_eq!(devices.devices(MediaKind::Video).await.len(), 1);
}

#[tokio::test]
async fn test_refresh_keeps_existing_selection() {
    let platform = MockPlatform::standard();
    let devices = manager(&platform, false);

    devices.select_audio_device("mic-2").await.unwrap();
    devices.refresh_devices().await.unwrap();

    assert_eq!(devices.selected_audio_device().await.as_deref(), Some("mic-2"));
}

#[tokio::test]
async fn test_unplugged_selection_falls_back_to_remaining_device() {
    let platform = MockPlatform::standard();
    let devices = manager(&platform, false);
    devices.refresh_devices().await.unwrap();
    devices.select_audio_device("mic-2").await.unwrap();

    platform.remove_device("mic-2");
    devices.refresh_devices().await.unwrap();

    assert_eq!(devices.selected_audio_device().await.as_deref(), Some("mic-1"));
    assert_eq!(devices.devices(MediaKind::Audio).await.len(), 1);

    platform.remove_device("mic-1");
    devices.refresh_devices().await.unwrap();
    assert_eq!(devices.selected_audio_device().await, None);
    assert_eq!(devices.selected_video_device().await.as_deref(), Some("cam-1"));
}

#[tokio::test]
async fn test_enable_twice_releases_first_stream() {
    let platform = MockPlatform::standard();
    let devices = manager(&platform, true);

    let first = devices.enable().await.unwrap();
    let second = devices.enable().await.unwrap();

    assert!(!first.is_active(), "First stream must be fully stopped");
    assert!(platform.acquired_tracks(0).iter().all(|t| !t.is_live()));
    assert!(second.is_active());

    let current = devices.current_stream().await.unwrap();
    assert_eq!(current.id(), second.id());
    assert_eq!(platform.acquisitions.load(Ordering::SeqCst), 2);

    devices.disable().await;
}

#[tokio::test]
async fn test_disable_is_idempotent() {
    let platform = MockPlatform::standard();
    let devices = manager(&platform, false);

    devices.disable().await;

    let stream = devices.enable().await.unwrap();
    devices.disable().await;
    devices.disable().await;

    assert!(!stream.is_active());
    assert!(devices.current_stream().await.is_none());
    assert!(!devices.is_ready().await);
    assert!(!devices.is_enabled().await);
    assert!(!devices.is_audio_allowed());
}

#[tokio::test]
async fn test_select_while_live_reacquires_on_new_device() {
    let platform = MockPlatform::standard();
    let devices = manager(&platform, false);
    devices.refresh_devices().await.unwrap();

    let first = devices.enable().await.unwrap();
    assert_eq!(first.primary_audio_track().unwrap().device_id(), "mic-1");

    assert!(devices.select_audio_device("mic-2").await.unwrap());

    let current = devices.current_stream().await.unwrap();
    assert_eq!(current.primary_audio_track().unwrap().device_id(), "mic-2");
    assert!(!first.is_active());
    assert!(devices.is_audio_allowed());
}

#[tokio::test]
async fn test_select_same_device_is_noop() {
    let platform = MockPlatform::standard();
    let devices = manager(&platform, false);
    devices.refresh_devices().await.unwrap();
    devices.enable().await.unwrap();

    assert!(!devices.select_audio_device("mic-1").await.unwrap());
    assert_eq!(platform.acquisitions.load(Ordering::SeqCst), 1);

    devices.disable().await;
}

#[tokio::test]
async fn test_select_without_stream_does_not_acquire() {
    let platform = MockPlatform::standard();
    let devices = manager(&platform, false);

    assert!(devices.select_video_device("cam-1").await.unwrap());
    assert_eq!(platform.acquisitions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_permission_check_flags_device_mismatch() {
    let platform = MockPlatform::standard();
    let devices = manager(&platform, false);
    devices.refresh_devices().await.unwrap();

    devices
        .enable_with(MediaConstraints {
            audio_device_id: Some("mic-2".into()),
            ..Default::default()
        })
        .await
        .unwrap();

    let (audio, video) = devices.check_permissions().await;
    assert!(!audio, "Stream is on mic-2 while mic-1 is selected");
    assert!(!video);
    assert!(!devices.is_audio_allowed());

    devices.disable().await;
}

#[tokio::test]
async fn test_permission_check_follows_video_track() {
    let platform = MockPlatform::standard();
    let devices = manager(&platform, true);
    devices.refresh_devices().await.unwrap();

    let stream = devices.enable().await.unwrap();
    assert_eq!(devices.check_permissions().await, (true, true));

    for track in stream.video_tracks() {
        track.stop();
    }
    assert_eq!(devices.check_permissions().await, (true, false));
    assert!(!devices.is_video_allowed());

    devices.disable().await;
}

#[tokio::test]
async fn test_acquisition_failure_leaves_manager_not_ready() {
    let platform = MockPlatform::standard();
    let devices = manager(&platform, false);
    platform.fail_next(MediaError::PermissionDenied("user dismissed prompt".into()));

    let err = devices.enable().await.unwrap_err();

    assert!(matches!(err, MediaError::PermissionDenied(_)));
    assert!(!devices.is_ready().await);
    assert!(devices.current_stream().await.is_none());

    // The next attempt is independent of the failure
    devices.enable().await.unwrap();
    assert!(devices.is_ready().await);
    devices.disable().await;
}

#[tokio::test(start_paused = true)]
async fn test_device_change_burst_refreshes_once() {
    let platform = MockPlatform::standard();
    let devices = manager(&platform, false);
    devices.watch_device_changes();

    for _ in 0..3 {
        platform.fire_change();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        platform.enumerations.load(Ordering::SeqCst),
        0,
        "Refresh must wait for a quiet period"
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(platform.enumerations.load(Ordering::SeqCst), 1);

    devices.shutdown().await;
}

#[tokio::test]
async fn test_file_platform_replays_wav_in_frames() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("voice.wav");

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..16000 {
        writer.write_sample(((i % 100) * 100) as i16).unwrap();
    }
    writer.finalize().unwrap();

    let platform = FilePlatform::new(
        vec![FileDevice {
            id: "wav-mic".into(),
            label: "Recorded answer".into(),
            kind: MediaKind::Audio,
            path: Some(path),
        }],
        100,
    );

    let stream = platform
        .get_user_media(&MediaConstraints::audio_only())
        .await
        .unwrap();
    let track = stream.primary_audio_track().unwrap();
    let mut frames = track.subscribe();

    let frame = tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .expect("no frame delivered")
        .unwrap();

    assert_eq!(frame.sample_rate, 16000);
    assert_eq!(frame.channels, 1);
    assert_eq!(frame.samples.len(), 1600);
    assert_eq!(&frame.samples[..3], &[0, 100, 200]);

    stream.stop_all();
}

#[tokio::test]
async fn test_file_platform_denied_permission() {
    let platform = FilePlatform::new(Vec::new(), 100);
    platform.set_permission_granted(false);

    let err = platform
        .get_user_media(&MediaConstraints::audio_only())
        .await
        .unwrap_err();
    assert!(matches!(err, MediaError::PermissionDenied(_)));
}
