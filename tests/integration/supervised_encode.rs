// Production encodes against scripted stand-ins for ffmpeg

use ffbench::config::EncodeConfig;
use ffbench::engine::supervisor;
use ffbench::engine::{
    CancelToken, CodecId, EncodeRequest, Encoder, EngineError, ProgressEvent, ProgressSender,
};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use crate::common::fake_ffmpeg::{FakeFfmpeg, OUTPUT_BYTES};
use crate::common::fixtures::{fast_encode_config, tools};

fn encoder(fake: FakeFfmpeg, dir: &TempDir, settings: EncodeConfig) -> Encoder {
    Encoder::new(tools(&fake.install(dir.path())), settings)
}

fn request(dir: &TempDir) -> EncodeRequest {
    EncodeRequest::new(dir.path().join("input.y4m"), dir.path().join("out").join("clip.mp4"))
        .codec(CodecId::H264)
        .crf(23)
}

#[test]
fn test_successful_encode_reports_progress_and_size() {
    let dir = TempDir::new().unwrap();
    let encoder = encoder(FakeFfmpeg::Ok, &dir, fast_encode_config());
    let request = request(&dir);

    let (tx, rx) = mpsc::sync_channel(32);
    let mut progress = ProgressSender::plain(tx);
    let report = encoder
        .encode(&request, Some(&mut progress), &CancelToken::new())
        .unwrap();
    drop(progress);

    let outcome = report.outcome;
    assert!(outcome.success);
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.file_size_bytes, Some(OUTPUT_BYTES.len() as u64));
    assert_eq!(outcome.avg_fps, Some(50.0));
    assert!(outcome.wall_clock_secs > 0.0);
    assert_eq!(report.command.encoder, "libx264");

    let events: Vec<ProgressEvent> = rx.iter().collect();
    assert!(!events.is_empty());
    assert!(events.windows(2).all(|w| w[0].elapsed_secs <= w[1].elapsed_secs));
    let last = events.last().unwrap();
    assert_eq!(last.elapsed_secs, 2.0);
    assert_eq!(last.percent, Some(100.0));
}

#[test]
fn test_unknown_encoder_with_exit_zero_fails() {
    let dir = TempDir::new().unwrap();
    let encoder = encoder(FakeFfmpeg::UnknownEncoder, &dir, fast_encode_config());
    let request = request(&dir);

    let err = encoder
        .encode::<()>(&request, None, &CancelToken::new())
        .unwrap_err();
    match err {
        EngineError::EncodeFailure { exit_code, message, .. } => {
            assert_eq!(exit_code, Some(0));
            assert!(message.contains("Unknown encoder 'h264_nvenc'"));
        }
        other => panic!("expected encode failure, got {:?}", other),
    }
    assert!(!request.destination.exists());
}

#[test]
fn test_failure_reduces_diagnostics_and_removes_partial_output() {
    let dir = TempDir::new().unwrap();
    let encoder = encoder(FakeFfmpeg::Fail, &dir, fast_encode_config());
    let request = request(&dir);

    let err = encoder
        .encode::<()>(&request, None, &CancelToken::new())
        .unwrap_err();
    match &err {
        EngineError::EncodeFailure {
            exit_code,
            message,
            details,
        } => {
            assert_eq!(*exit_code, Some(1));
            assert_eq!(message, "Error opening input file input.mkv.; Conversion failed!");
            assert!(details.contains("Error opening input file"));
        }
        other => panic!("expected encode failure, got {:?}", other),
    }
    assert!(err.details().is_some());
    assert!(!request.destination.exists());
}

#[test]
fn test_clean_exit_without_output_is_failure() {
    let dir = TempDir::new().unwrap();
    let encoder = encoder(FakeFfmpeg::Silent, &dir, fast_encode_config());

    let err = encoder
        .encode::<()>(&request(&dir), None, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::EncodeFailure { ref message, .. } if message.contains("produced no output")
    ));
}

#[test]
fn test_timeout_kills_the_encoder() {
    let dir = TempDir::new().unwrap();
    let settings = EncodeConfig {
        timeout_secs: Some(1),
        ..fast_encode_config()
    };
    let encoder = encoder(FakeFfmpeg::Hang, &dir, settings);

    let started = Instant::now();
    let err = encoder
        .encode::<()>(&request(&dir), None, &CancelToken::new())
        .unwrap_err();

    assert!(matches!(err, EngineError::TrialTimeout { after } if after == Duration::from_secs(1)));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_cancel_terminates_and_keeps_partial_output() {
    let dir = TempDir::new().unwrap();
    let encoder = encoder(FakeFfmpeg::Hang, &dir, fast_encode_config());
    let request = request(&dir);
    let cancel = CancelToken::new();

    let started = Instant::now();
    let result = thread::scope(|s| {
        let worker = s.spawn(|| encoder.encode::<()>(&request, None, &cancel));
        thread::sleep(Duration::from_millis(300));
        cancel.cancel();
        worker.join().unwrap()
    });

    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(request.destination.exists());
}

#[test]
fn test_missing_tool_is_reported_by_name() {
    let dir = TempDir::new().unwrap();
    let encoder = Encoder::new(tools("ffbench-test-no-such-ffmpeg"), fast_encode_config());

    let err = encoder
        .encode::<()>(&request(&dir), None, &CancelToken::new())
        .unwrap_err();
    assert!(err.is_tool_missing());
    assert!(err.to_string().contains("ffbench-test-no-such-ffmpeg"));
}

#[test]
fn test_supervisor_collects_both_streams() {
    let mut handle = supervisor::launch("sh", ["-c", "echo out; echo err >&2; exit 3"]).unwrap();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    loop {
        match handle.next_chunk(Duration::from_secs(5)) {
            supervisor::ChunkPoll::Chunk(chunk) => match chunk.stream {
                supervisor::StreamId::Stdout => stdout.extend(chunk.data),
                supervisor::StreamId::Stderr => stderr.extend(chunk.data),
            },
            supervisor::ChunkPoll::Idle => {}
            supervisor::ChunkPoll::Closed => break,
        }
    }

    let status = handle.wait().unwrap();
    assert_eq!(status.code(), Some(3));
    assert_eq!(stdout, b"out\n");
    assert_eq!(stderr, b"err\n");
}

