// Tests for worker pool and message handling

use ffbench::engine::worker::{WorkerMessage, WorkerPool};
use ffbench::engine::{
    AccelerationChoice, BuildNotice, CancelToken, CodecId, EncodeJob, EncodeRequest, Encoder,
    JobStatus,
};
use std::time::Duration;
use tempfile::TempDir;

use crate::common::fake_ffmpeg::FakeFfmpeg;
use crate::common::fixtures::{fast_encode_config, tools};

/// Collect messages until the worker reports idle
fn drain_until_idle(pool: &WorkerPool, worker_id: usize) -> Vec<WorkerMessage> {
    let mut messages = Vec::new();
    loop {
        let msg = pool
            .receiver()
            .recv_timeout(Duration::from_secs(10))
            .expect("worker went quiet");
        let idle = matches!(msg, WorkerMessage::WorkerIdle { worker_id: id } if id == worker_id);
        messages.push(msg);
        if idle {
            return messages;
        }
    }
}

#[test]
fn test_job_runs_to_completion_with_notices_and_progress() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Ok.install(dir.path());
    let encoder = Encoder::new(tools(&ffmpeg), fast_encode_config());

    let request = EncodeRequest::new(dir.path().join("in.y4m"), dir.path().join("out.webm"))
        .codec(CodecId::Vp9)
        .acceleration(AccelerationChoice::Amd);
    let job = EncodeJob::new(request);
    let job_id = job.id;
    let mut tracked = job.clone();

    let pool = WorkerPool::new(1);
    pool.spawn_worker(7, job, encoder, CancelToken::new()).unwrap();
    let messages = drain_until_idle(&pool, 7);
    for msg in &messages {
        msg.apply_to(&mut tracked);
    }
    assert_eq!(tracked.status, JobStatus::Done);
    assert_eq!(tracked.last_error, None);

    assert!(matches!(
        messages.first(),
        Some(WorkerMessage::JobStarted { job_id: id, worker_id: 7 }) if *id == job_id
    ));
    assert!(messages.iter().any(|m| matches!(
        m,
        WorkerMessage::Notice { notice: BuildNotice::DowngradedToSoftware { .. }, .. }
    )));
    assert!(messages.iter().any(|m| matches!(m, WorkerMessage::Progress { .. })));
    assert!(messages.iter().any(|m| matches!(
        m,
        WorkerMessage::JobCompleted { outcome, .. } if outcome.success
    )));
    assert_eq!(pool.active_count(), 0);
}

#[test]
fn test_failed_job_carries_details() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Fail.install(dir.path());
    let encoder = Encoder::new(tools(&ffmpeg), fast_encode_config());

    let request = EncodeRequest::new(dir.path().join("in.mkv"), dir.path().join("out.mp4"))
        .codec(CodecId::H264);
    let pool = WorkerPool::new(1);
    pool.spawn_worker(0, EncodeJob::new(request), encoder, CancelToken::new())
        .unwrap();

    let failed = drain_until_idle(&pool, 0)
        .into_iter()
        .find_map(|m| match m {
            WorkerMessage::JobFailed {
                error,
                details,
                cancelled,
                ..
            } => Some((error, details, cancelled)),
            _ => None,
        })
        .expect("job should fail");

    assert!(failed.0.contains("Conversion failed!"));
    assert!(failed.1.is_some_and(|d| d.contains("Error opening input file")));
    assert!(!failed.2);
}

#[test]
fn test_slots_are_enforced_while_busy() {
    let dir = TempDir::new().unwrap();
    let ffmpeg = FakeFfmpeg::Hang.install(dir.path());
    let encoder = Encoder::new(tools(&ffmpeg), fast_encode_config());
    let cancel = CancelToken::new();

    let job = |name: &str| {
        EncodeJob::new(
            EncodeRequest::new(dir.path().join("in.y4m"), dir.path().join(name))
                .codec(CodecId::H264),
        )
    };

    let pool = WorkerPool::new(1);
    let mut tracked = job("a.mp4");
    pool.spawn_worker(0, tracked.clone(), encoder.clone(), cancel.clone())
        .unwrap();
    assert!(!pool.can_spawn());
    assert!(pool.spawn_worker(1, job("b.mp4"), encoder, cancel.clone()).is_err());

    cancel.cancel();
    let messages = drain_until_idle(&pool, 0);
    assert!(
        messages
            .iter()
            .any(|m| matches!(m, WorkerMessage::JobFailed { cancelled: true, .. }))
    );
    for msg in &messages {
        msg.apply_to(&mut tracked);
    }
    assert_eq!(tracked.status, JobStatus::Cancelled);
    assert!(pool.can_spawn());
}
