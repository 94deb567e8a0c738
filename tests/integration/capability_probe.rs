// Capability probing through real trial processes

use ffbench::config::ProbeConfig;
use ffbench::engine::capability::{CapabilityMatrix, CapabilityProber, ProbeSettings, probe_matrix};
use ffbench::engine::encode::FfmpegTrialRunner;
use ffbench::engine::hardware::EncoderListing;
use ffbench::engine::{AccelerationChoice, CancelToken, CodecId};
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use tempfile::TempDir;

use crate::common::fake_ffmpeg::FakeFfmpeg;
use crate::common::fixtures::{fast_encode_config, tools};

fn prober(ffmpeg: &str, dir: &TempDir, timeout: Duration) -> CapabilityProber<FfmpegTrialRunner> {
    let settings = ProbeSettings {
        trial_timeout: timeout,
        ..ProbeSettings::default()
    };
    let runner = FfmpegTrialRunner::new(&tools(ffmpeg), &fast_encode_config());
    let scratch = dir.path().join("scratch");
    fs::create_dir_all(&scratch).unwrap();
    CapabilityProber::new(runner, settings).with_scratch_dir(scratch)
}

fn input(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("probe_input.y4m");
    fs::write(&path, b"YUV4MPEG2 W256 H256 F25:1\n").unwrap();
    path
}

#[test]
fn test_software_only_host() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Selective.install(dir.path());
    let listing = EncoderListing::parse(concat!(
        "Encoders:\n",
        " V..... = Video\n",
        " ------\n",
        " V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC\n",
        " V....D h264_nvenc           NVIDIA NVENC H.264 encoder\n",
    ));
    let prober = prober(&ffmpeg, &dir, Duration::from_secs(5)).with_listing(listing);

    let (tx, rx) = mpsc::channel();
    let entries = prober.probe(&input(&dir), Some(&tx), &CancelToken::new());
    drop(tx);

    assert_eq!(entries.len(), 20);
    let matrix = CapabilityMatrix::from_entries(entries);
    for codec in CodecId::VIDEO {
        assert!(matrix.is_available(codec, AccelerationChoice::None), "{} software", codec);
        for accel in AccelerationChoice::ALL.into_iter().filter(|a| a.is_hardware()) {
            assert!(!matrix.is_available(codec, accel), "{}/{}", codec, accel);
        }
    }

    let nvenc = matrix.get(CodecId::H264, AccelerationChoice::Nvidia).unwrap();
    assert_eq!(nvenc.encoder.as_deref(), Some("h264_nvenc"));
    assert_eq!(nvenc.listed, Some(true));
    assert!(nvenc.error.as_deref().unwrap().contains("Error initializing output stream"));

    let unmapped = matrix.get(CodecId::Vp9, AccelerationChoice::Nvidia).unwrap();
    assert_eq!(unmapped.encoder, None);
    assert_eq!(unmapped.error.as_deref(), Some("no nvidia encoder for vp9"));

    let events: Vec<_> = rx.iter().collect();
    assert_eq!(events.len(), 20);
    assert!(events.iter().enumerate().all(|(i, e)| e.index == i + 1 && e.total == 20));
    assert_eq!(events.iter().filter(|e| e.available).count(), 4);

    // Trial outputs are cleaned up with the run
    let leftovers = fs::read_dir(dir.path().join("scratch")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_unknown_encoder_on_exit_zero_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::UnknownEncoder.install(dir.path());
    let prober = prober(&ffmpeg, &dir, Duration::from_secs(5));

    let entries = prober.probe_pairs(
        &[(CodecId::H264, AccelerationChoice::Nvidia)],
        &input(&dir),
        None,
        &CancelToken::new(),
    );

    assert_eq!(entries.len(), 1);
    assert!(!entries[0].available);
    assert!(entries[0].error.as_deref().unwrap().contains("Unknown encoder"));
}

#[test]
fn test_hung_trial_is_bounded_by_timeout() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Hang.install(dir.path());
    let prober = prober(&ffmpeg, &dir, Duration::from_secs(1));

    let started = std::time::Instant::now();
    let entries = prober.probe_pairs(
        &[(CodecId::Hevc, AccelerationChoice::Intel)],
        &input(&dir),
        None,
        &CancelToken::new(),
    );

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!entries[0].available);
    assert!(entries[0].error.as_deref().unwrap().contains("timed out"));
}

#[test]
fn test_missing_ffmpeg_marks_every_pair() {
    let dir = TempDir::new().unwrap();
    let prober = prober("ffbench-test-no-such-ffmpeg", &dir, Duration::from_secs(5));

    let entries = prober.probe(&input(&dir), None, &CancelToken::new());

    assert_eq!(entries.len(), probe_matrix().len());
    assert!(entries.iter().all(|e| !e.available));
    let mapped: Vec<_> = entries.iter().filter(|e| e.encoder.is_some()).collect();
    assert!(
        mapped
            .iter()
            .all(|e| e.error.as_deref().is_some_and(|m| m.contains("ffbench-test-no-such-ffmpeg")))
    );
}

#[test]
fn test_probe_settings_follow_config() {
    let mut config = ProbeConfig::default();
    config.frames = 3;
    config.trial_timeout_secs = 2;

    let settings = ProbeSettings::from(&config);
    assert_eq!(settings.frames, 3);
    assert_eq!(settings.trial_timeout, Duration::from_secs(2));
    assert_eq!(settings.width, 256);
}
