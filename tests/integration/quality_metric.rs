// Quality scoring through ffmpeg's psnr/ssim filters

use ffbench::config::BenchmarkConfig;
use ffbench::engine::benchmark::{BenchmarkControl, BenchmarkScheduler, TrialStatus};
use ffbench::engine::collab::{FfmpegQualityMetric, QualityMetric};
use ffbench::engine::encode::FfmpegTrialRunner;
use ffbench::engine::{AccelerationChoice, CodecId, EngineError};
use ffbench::report;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

use crate::common::fake_ffmpeg::FakeFfmpeg;
use crate::common::fixtures::{entry, fast_encode_config, snapshot, tools, video_media};

fn media_pair(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let reference = dir.path().join("reference.y4m");
    let encoded = dir.path().join("encoded.mp4");
    fs::write(&reference, b"YUV4MPEG2 W256 H256 F25:1\n").unwrap();
    fs::write(&encoded, b"fake encoded data").unwrap();
    (reference, encoded)
}

#[test]
fn test_measure_reads_filter_summaries() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Scored.install(dir.path());
    let (reference, encoded) = media_pair(&dir);

    let metric = FfmpegQualityMetric::new(&tools(&ffmpeg), Duration::from_secs(5));
    let scores = metric.measure(&reference, &encoded).unwrap();

    assert_eq!(scores.psnr, Some(42.01));
    assert_eq!(scores.ssim, Some(0.985));
    assert_eq!(scores.vmaf, None);
}

#[test]
fn test_failed_comparison_is_an_encode_failure() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Unscored.install(dir.path());
    let (reference, encoded) = media_pair(&dir);

    let metric = FfmpegQualityMetric::new(&tools(&ffmpeg), Duration::from_secs(5));
    let err = metric.measure(&reference, &encoded).unwrap_err();

    match err {
        EngineError::EncodeFailure {
            exit_code, details, ..
        } => {
            assert_eq!(exit_code, Some(1));
            assert!(details.contains("Error while filtering"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_benchmark_scores_completed_trials() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Scored.install(dir.path());
    let input = dir.path().join("clip.y4m");
    fs::write(&input, b"YUV4MPEG2 W256 H256 F25:1\n").unwrap();
    let scratch = dir.path().join("scratch");
    fs::create_dir_all(&scratch).unwrap();

    let config = BenchmarkConfig {
        trial_timeout_secs: 5,
        ..BenchmarkConfig::default()
    };
    let scheduler = BenchmarkScheduler::new(
        FfmpegTrialRunner::new(&tools(&ffmpeg), &fast_encode_config()),
        &config,
    )
    .with_scratch_dir(scratch)
    .with_quality(FfmpegQualityMetric::new(&tools(&ffmpeg), Duration::from_secs(5)));

    let selection = [
        entry(CodecId::H264, AccelerationChoice::None, true),
        entry(CodecId::Hevc, AccelerationChoice::None, true),
    ];
    let run = scheduler
        .run(
            &selection,
            &input,
            &video_media(2.0),
            snapshot(),
            None,
            &BenchmarkControl::new(),
        )
        .unwrap();

    assert_eq!(run.completed(), 2);
    for trial in &run.trials {
        assert_eq!(trial.status, TrialStatus::Complete);
        let quality = trial.quality.expect("completed trial is scored");
        assert_eq!(quality.psnr, Some(42.01));
        assert_eq!(quality.ssim, Some(0.985));
    }
    assert!(report::benchmark_report(&run).contains("PSNR 42.01 dB"));
}
