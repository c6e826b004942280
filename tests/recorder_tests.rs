// Integration tests for the local call recorder

mod common;

use common::tone_frame;
use interview_call::media::{MediaKind, MediaStream, MediaTrack};
use interview_call::recording::{LocalRecorder, RecorderConfig, WavEncoderFactory};
use interview_call::RecorderFault;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn recorder(dir: &TempDir) -> LocalRecorder {
    LocalRecorder::new(
        Arc::new(WavEncoderFactory),
        RecorderConfig {
            flush_poll: Duration::from_millis(10),
            download_dir: dir.path().to_path_buf(),
            ..Default::default()
        },
    )
}

fn audio_stream() -> (MediaStream, Arc<MediaTrack>) {
    let track = MediaTrack::new(MediaKind::Audio, "mic-1", "Built-in Microphone");
    (MediaStream::new(vec![Arc::clone(&track)]), track)
}

#[tokio::test]
async fn test_nothing_recorded_means_nothing_downloaded() {
    let dir = TempDir::new().unwrap();
    let recorder = recorder(&dir);

    assert!(recorder.materialize().is_none());
    assert_eq!(recorder.download("interview-empty").unwrap(), None);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_stop_without_start_is_noop() {
    let dir = TempDir::new().unwrap();
    let mut recorder = recorder(&dir);

    recorder.stop().await.unwrap();
    assert!(!recorder.is_recording());
}

#[tokio::test]
async fn test_start_requires_live_audio() {
    let dir = TempDir::new().unwrap();
    let mut recorder = recorder(&dir);

    let (stream, track) = audio_stream();
    track.stop();

    assert!(matches!(
        recorder.start(&stream),
        Err(RecorderFault::NoActiveStream)
    ));
    assert!(!recorder.is_recording());

    let camera_only = MediaStream::new(vec![MediaTrack::new(MediaKind::Video, "cam-1", "Camera")]);
    assert!(matches!(
        recorder.start(&camera_only),
        Err(RecorderFault::NoActiveStream)
    ));
}

#[tokio::test]
async fn test_start_fails_without_supported_encoding() {
    let dir = TempDir::new().unwrap();
    let mut recorder = LocalRecorder::new(
        Arc::new(WavEncoderFactory),
        RecorderConfig {
            mime_candidates: vec!["video/webm;codecs=vp9".into(), "video/mp4".into()],
            download_dir: dir.path().to_path_buf(),
            ..Default::default()
        },
    );
    let (stream, _track) = audio_stream();

    match recorder.start(&stream) {
        Err(RecorderFault::UnsupportedEncoding(tried)) => assert_eq!(tried.len(), 2),
        other => panic!("expected UnsupportedEncoding, got {:?}", other),
    }
    assert!(!recorder.is_recording());
}

#[tokio::test]
async fn test_records_and_downloads_wav() {
    let dir = TempDir::new().unwrap();
    let mut recorder = recorder(&dir);
    let (stream, track) = audio_stream();

    recorder.start(&stream).unwrap();
    assert!(recorder.is_recording());
    assert_eq!(recorder.mime_type(), Some("audio/wav"));

    // One second of 48 kHz audio
    for _ in 0..10 {
        track.push_frame(tone_frame(4800, 48000, 440.0, 8000));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    recorder.stop().await.unwrap();
    assert!(!recorder.is_recording());
    assert_eq!(recorder.chunk_count(), 1, "Data arrives as one final chunk");

    let path = recorder.download("interview-abc").unwrap().expect("recording file");
    assert_eq!(path, dir.path().join("interview-abc.wav"));

    let reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 8000, "Bitrate budget downsamples to 8 kHz");
    assert_eq!(reader.len(), 8000);
}

#[tokio::test]
async fn test_muted_track_records_silence() {
    let dir = TempDir::new().unwrap();
    let mut recorder = recorder(&dir);
    let (stream, track) = audio_stream();

    recorder.start(&stream).unwrap();
    track.set_enabled(false);
    for _ in 0..4 {
        track.push_frame(tone_frame(1600, 16000, 440.0, 8000));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    recorder.stop().await.unwrap();

    let path = recorder.download("muted").unwrap().unwrap();
    let mut reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.len(), 3200);
    assert!(reader.samples::<i16>().all(|s| s.unwrap() == 0));
}

#[tokio::test]
async fn test_stop_without_frames_reports_no_data() {
    let dir = TempDir::new().unwrap();
    let mut recorder = recorder(&dir);
    let (stream, _track) = audio_stream();

    recorder.start(&stream).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), recorder.stop())
        .await
        .expect("stop must not hang");

    assert!(matches!(result, Err(RecorderFault::NoData)));
    assert!(recorder.materialize().is_none());
}

#[tokio::test]
async fn test_restart_clears_previous_recording() {
    let dir = TempDir::new().unwrap();
    let mut recorder = recorder(&dir);
    let (stream, track) = audio_stream();

    recorder.start(&stream).unwrap();
    track.push_frame(tone_frame(1600, 16000, 440.0, 8000));
    tokio::time::sleep(Duration::from_millis(50)).await;
    recorder.stop().await.unwrap();
    assert_eq!(recorder.chunk_count(), 1);

    recorder.start(&stream).unwrap();
    assert_eq!(recorder.chunk_count(), 0);

    let _ = recorder.stop().await;
}

#[tokio::test]
async fn test_switch_stream_continues_same_recording() {
    let dir = TempDir::new().unwrap();
    let mut recorder = recorder(&dir);
    let (first_stream, first) = audio_stream();
    let second = MediaTrack::new(MediaKind::Audio, "mic-2", "USB Headset");
    let second_stream = MediaStream::new(vec![Arc::clone(&second)]);

    recorder.start(&first_stream).unwrap();
    for _ in 0..2 {
        first.push_frame(tone_frame(1600, 16000, 440.0, 8000));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    recorder.switch_stream(&second_stream).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The old microphone is no longer listened to
    first.push_frame(tone_frame(1600, 16000, 440.0, 8000));
    for _ in 0..2 {
        second.push_frame(tone_frame(1600, 16000, 440.0, 8000));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    recorder.stop().await.unwrap();

    assert_eq!(recorder.chunk_count(), 1);
    let path = recorder.download("switched").unwrap().unwrap();
    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.len(), 3200);
}

#[tokio::test]
async fn test_switch_stream_while_idle_is_noop() {
    let dir = TempDir::new().unwrap();
    let mut recorder = recorder(&dir);
    let (stream, _track) = audio_stream();

    recorder.switch_stream(&stream).unwrap();
    assert!(!recorder.is_recording());
}
