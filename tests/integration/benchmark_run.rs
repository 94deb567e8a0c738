// Benchmark runs through real trial processes, then reduced and persisted

use ffbench::config::BenchmarkConfig;
use ffbench::engine::benchmark::{
    BenchmarkControl, BenchmarkEvent, BenchmarkScheduler, BenchmarkStore, TrialStatus,
    select_entries,
};
use ffbench::engine::capability::CapabilityMatrix;
use ffbench::engine::encode::FfmpegTrialRunner;
use ffbench::engine::reduce::{Podium, best_by_speed};
use ffbench::engine::{AccelerationChoice, CodecId, EngineError, FailureKind};
use ffbench::report;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use crate::common::fake_ffmpeg::{FakeFfmpeg, OUTPUT_BYTES};
use crate::common::fixtures::{entry, fast_encode_config, snapshot, tools, video_media};

fn scheduler(ffmpeg: &str, dir: &TempDir) -> BenchmarkScheduler<FfmpegTrialRunner> {
    let config = BenchmarkConfig {
        trial_timeout_secs: 5,
        ..BenchmarkConfig::default()
    };
    let scratch = dir.path().join("scratch");
    fs::create_dir_all(&scratch).unwrap();
    BenchmarkScheduler::new(
        FfmpegTrialRunner::new(&tools(ffmpeg), &fast_encode_config()),
        &config,
    )
    .with_scratch_dir(scratch)
}

fn test_input(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("clip.y4m");
    fs::write(&path, b"YUV4MPEG2 W256 H256 F25:1\n").unwrap();
    path
}

/// Cached matrix where NVENC once worked but the driver has since gone away
fn cached_matrix() -> CapabilityMatrix {
    CapabilityMatrix::from_entries([
        entry(CodecId::H264, AccelerationChoice::None, true),
        entry(CodecId::H264, AccelerationChoice::Nvidia, true),
        entry(CodecId::H264, AccelerationChoice::Amd, false),
        entry(CodecId::Hevc, AccelerationChoice::None, true),
    ])
}

#[test]
fn test_run_records_every_selected_entry() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Selective.install(dir.path());
    let selection = select_entries(&cached_matrix(), &[]);
    assert_eq!(selection.len(), 3);

    let (tx, rx) = mpsc::sync_channel(256);
    let run = scheduler(&ffmpeg, &dir)
        .run(
            &selection,
            &test_input(&dir),
            &video_media(2.0),
            snapshot(),
            Some(&tx),
            &BenchmarkControl::new(),
        )
        .unwrap();
    drop(tx);

    assert_eq!(run.trials.len(), 3);
    assert!(!run.cancelled);
    assert!(run.finished_at.is_some());
    assert_eq!(run.completed(), 2);
    assert_eq!(run.failed(), 1);

    let nvenc = &run.trials[1];
    assert_eq!(nvenc.status, TrialStatus::Failed);
    assert_eq!(nvenc.encoder.as_deref(), Some("h264_nvenc"));
    assert_eq!(nvenc.outcome.failure, Some(FailureKind::EncoderUnavailable));

    for trial in [&run.trials[0], &run.trials[2]] {
        assert_eq!(trial.status, TrialStatus::Complete);
        assert_eq!(trial.outcome.file_size_bytes, Some(OUTPUT_BYTES.len() as u64));
        assert_eq!(trial.reported_speed, Some(2.0));
        let wall = trial.outcome.wall_clock_secs;
        assert!(wall > 0.0);
        let expected_speed = 2.0 / wall;
        assert!((trial.outcome.avg_speed.unwrap() - expected_speed).abs() < 1e-9);
        let expected_kbps = OUTPUT_BYTES.len() as f64 * 8.0 / wall / 1000.0;
        assert!((trial.throughput_kbps.unwrap() - expected_kbps).abs() < 1e-9);
    }

    let podium = Podium::of(&run.outcomes());
    assert!(matches!(podium.speed, Some(0) | Some(2)));
    assert_ne!(podium.fps, Some(1));
    let outcomes = run.outcomes();
    let (best, _) = best_by_speed(&outcomes).unwrap();
    assert_ne!(best, 1);

    let events: Vec<BenchmarkEvent> = rx.iter().collect();
    let statuses: Vec<(usize, TrialStatus)> = events
        .iter()
        .filter_map(|e| match e {
            BenchmarkEvent::TrialStatus { index, status, .. } => Some((*index, *status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        &statuses[..3],
        &[
            (1, TrialStatus::Pending),
            (2, TrialStatus::Pending),
            (3, TrialStatus::Pending)
        ]
    );
    assert_eq!(
        &statuses[3..],
        &[
            (1, TrialStatus::Running),
            (1, TrialStatus::Complete),
            (2, TrialStatus::Running),
            (2, TrialStatus::Failed),
            (3, TrialStatus::Running),
            (3, TrialStatus::Complete),
        ]
    );
    assert!(matches!(
        events.last(),
        Some(BenchmarkEvent::Finished {
            completed: 2,
            failed: 1,
            cancelled: false
        })
    ));

    let table = report::benchmark_report(&run);
    assert!(table.contains("FAILED"));
    assert!(table.contains("Fastest: "));
}

#[test]
fn test_stop_request_before_start_runs_nothing() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Ok.install(dir.path());
    let control = BenchmarkControl::new();
    control.cancel_after_current();

    let run = scheduler(&ffmpeg, &dir)
        .run(
            &select_entries(&cached_matrix(), &[]),
            &test_input(&dir),
            &video_media(2.0),
            snapshot(),
            None,
            &control,
        )
        .unwrap();

    assert!(run.trials.is_empty());
    assert!(run.cancelled);
    assert!(report::benchmark_report(&run).ends_with("No successful trials."));
}

#[test]
fn test_missing_input_is_rejected_before_any_trial() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Ok.install(dir.path());

    let err = scheduler(&ffmpeg, &dir)
        .run(
            &select_entries(&cached_matrix(), &[]),
            &dir.path().join("missing.y4m"),
            &video_media(2.0),
            snapshot(),
            None,
            &BenchmarkControl::new(),
        )
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidRequest(ref msg) if msg.contains("missing.y4m")));
}

#[test]
fn test_history_appends_frozen_runs() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Ok.install(dir.path());
    let selection = select_entries(&cached_matrix(), &[(CodecId::Hevc, AccelerationChoice::None)]);
    let store = BenchmarkStore::new(dir.path().join("history").join("benchmarks.json"));

    let scheduler = scheduler(&ffmpeg, &dir);
    for _ in 0..2 {
        let run = scheduler
            .run(
                &selection,
                &test_input(&dir),
                &video_media(2.0),
                snapshot(),
                None,
                &BenchmarkControl::new(),
            )
            .unwrap();
        store.append(&run).unwrap();
    }

    let history = store.load().unwrap();
    assert_eq!(history.len(), 2);
    assert_ne!(history[0].id, history[1].id);
    assert!(history.iter().all(|run| run.trials.len() == 1 && run.completed() == 1));
    assert_eq!(history[0].trials[0].entry.codec, CodecId::Hevc);
}

#[test]
fn test_cancel_now_terminates_in_flight_trial() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Hang.install(dir.path());
    let selection = select_entries(&cached_matrix(), &[]);
    assert_eq!(selection.len(), 3);
    let scheduler = scheduler(&ffmpeg, &dir);
    let input = test_input(&dir);
    let control = BenchmarkControl::new();

    let started = Instant::now();
    let run = thread::scope(|s| {
        let handle = s.spawn(|| {
            scheduler.run(
                &selection,
                &input,
                &video_media(2.0),
                snapshot(),
                None,
                &control,
            )
        });
        thread::sleep(Duration::from_millis(300));
        control.cancel_now();
        handle.join().unwrap()
    })
    .unwrap();

    // Well inside the 5s trial timeout, so the stop came from the cancel
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(run.cancelled);
    assert_eq!(run.trials.len(), 1);
    let trial = &run.trials[0];
    assert_eq!(trial.status, TrialStatus::Failed);
    assert_eq!(trial.outcome.failure, Some(FailureKind::Cancelled));
    assert_eq!(run.completed(), 0);
}
