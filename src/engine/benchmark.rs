//! Benchmark Scheduler: runs selected (codec, acceleration) entries against
//! real test media, one trial at a time, and records every outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use super::capability::{CapabilityEntry, CapabilityMatrix, ScratchDir, TrialArtifact};
use super::collab::{QualityMetric, QualityScores};
use super::core::{
    AccelerationChoice, CodecId, CommandBuilder, EncodeOutcome, EncodeRequest, FailureKind,
    MediaInfo, PresetCatalog, ProgressEvent, load_json, save_json_atomic,
};
use super::encode::{CancelToken, ProgressSender, TrialPlan, TrialRunner};
use super::error::{EngineError, EngineResult};
use super::hardware::SystemSnapshot;
use crate::config::BenchmarkConfig;

/// Caller-side control over a running benchmark.
///
/// `cancel_after_current` lets the in-flight trial finish; `cancel_now`
/// also terminates it through the supervisor.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkControl {
    stop_requested: Arc<AtomicBool>,
    abort: CancelToken,
}

impl BenchmarkControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_after_current(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn cancel_now(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.abort.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn abort_token(&self) -> &CancelToken {
        &self.abort
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

/// One finished trial: the entry that was selected and what happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkTrial {
    pub entry: CapabilityEntry,
    pub status: TrialStatus,
    pub outcome: EncodeOutcome,
    /// Encoder that actually ran
    pub encoder: Option<String>,
    /// Output bitrate from file size over wall-clock time
    pub throughput_kbps: Option<f64>,
    /// Speed as reported by the encoder (relative to media time)
    pub reported_speed: Option<f64>,
    /// Scores against the test input, when quality scoring was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityScores>,
}

/// The real test input a run used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMediaDescriptor {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub size_bytes: Option<u64>,
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl TestMediaDescriptor {
    pub fn from_media(path: &Path, media: &MediaInfo) -> Option<Self> {
        let video = media.video();
        Some(Self {
            path: path.to_path_buf(),
            duration_secs: media.duration_secs?,
            size_bytes: media.size_bytes,
            container: media.container.clone(),
            video_codec: video.and_then(|v| v.codec.clone()),
            width: video.and_then(|v| v.width),
            height: video.and_then(|v| v.height),
        })
    }
}

/// Ordered trials plus the context they ran in. Frozen once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub system: SystemSnapshot,
    pub media: TestMediaDescriptor,
    pub trials: Vec<BenchmarkTrial>,
    /// Stopped before every selected entry ran
    #[serde(default)]
    pub cancelled: bool,
}

impl BenchmarkRun {
    fn start(system: SystemSnapshot, media: TestMediaDescriptor) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            system,
            media,
            trials: Vec::new(),
            cancelled: false,
        }
    }

    pub fn outcomes(&self) -> Vec<EncodeOutcome> {
        self.trials.iter().map(|t| t.outcome.clone()).collect()
    }

    pub fn completed(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Complete)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Failed)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BenchmarkEvent {
    TrialStatus {
        /// 1-based position in the selection
        index: usize,
        total: usize,
        codec: CodecId,
        acceleration: AccelerationChoice,
        status: TrialStatus,
    },
    Progress {
        index: usize,
        event: ProgressEvent,
    },
    Finished {
        completed: usize,
        failed: usize,
        cancelled: bool,
    },
}

/// Available entries, optionally narrowed to `selectors` (kept in matrix order)
pub fn select_entries(
    matrix: &CapabilityMatrix,
    selectors: &[(CodecId, AccelerationChoice)],
) -> Vec<CapabilityEntry> {
    matrix
        .available()
        .filter(|e| selectors.is_empty() || selectors.contains(&e.key()))
        .cloned()
        .collect()
}

/// Runs benchmark trials sequentially through a [`TrialRunner`].
pub struct BenchmarkScheduler<R> {
    runner: R,
    trial_timeout: Duration,
    min_input_duration_secs: f64,
    presets: PresetCatalog,
    scratch_parent: PathBuf,
    quality: Option<Box<dyn QualityMetric + Send + Sync>>,
}

impl<R: TrialRunner> BenchmarkScheduler<R> {
    pub fn new(runner: R, config: &BenchmarkConfig) -> Self {
        Self {
            runner,
            trial_timeout: config.trial_timeout(),
            min_input_duration_secs: config.min_input_duration_secs,
            presets: PresetCatalog::empty(),
            scratch_parent: std::env::temp_dir(),
            quality: None,
        }
    }

    /// Score every completed trial's output against the test input before
    /// it is discarded. A scoring failure is logged and leaves the trial's
    /// quality empty; the trial itself still counts as complete.
    pub fn with_quality(mut self, metric: impl QualityMetric + Send + Sync + 'static) -> Self {
        self.quality = Some(Box::new(metric));
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_parent = dir.into();
        self
    }

    fn validate_input(&self, input: &Path, media: &MediaInfo) -> EngineResult<TestMediaDescriptor> {
        if !input.is_file() {
            return Err(EngineError::InvalidRequest(format!(
                "test input {} does not exist",
                input.display()
            )));
        }
        let descriptor = TestMediaDescriptor::from_media(input, media).ok_or_else(|| {
            EngineError::InvalidRequest(format!(
                "test input {} has no known duration",
                input.display()
            ))
        })?;
        if descriptor.duration_secs < self.min_input_duration_secs {
            return Err(EngineError::InvalidRequest(format!(
                "test input is {:.2}s long, need at least {:.2}s",
                descriptor.duration_secs, self.min_input_duration_secs
            )));
        }
        if media.video().is_none() {
            return Err(EngineError::InvalidRequest(
                "test input has no video stream".into(),
            ));
        }
        Ok(descriptor)
    }

    /// Run `selection` in order against `input`.
    ///
    /// Only a bad test input is an error. Failed trials are recorded and the
    /// run continues; a stop request ends the run between trials and the
    /// entries not yet started are left out.
    pub fn run(
        &self,
        selection: &[CapabilityEntry],
        input: &Path,
        media: &MediaInfo,
        system: SystemSnapshot,
        events: Option<&SyncSender<BenchmarkEvent>>,
        control: &BenchmarkControl,
    ) -> EngineResult<BenchmarkRun> {
        let descriptor = self.validate_input(input, media)?;
        let scratch = ScratchDir::create(&self.scratch_parent, "bench")?;
        let mut run = BenchmarkRun::start(system, descriptor);
        let total = selection.len();

        info!(run_id = %run.id, total, input = %input.display(), "Starting benchmark");

        let emit = |event: BenchmarkEvent| {
            if let Some(tx) = events {
                let _ = tx.send(event);
            }
        };

        for (i, entry) in selection.iter().enumerate() {
            emit(BenchmarkEvent::TrialStatus {
                index: i + 1,
                total,
                codec: entry.codec,
                acceleration: entry.acceleration,
                status: TrialStatus::Pending,
            });
        }

        for (i, entry) in selection.iter().enumerate() {
            if control.is_stop_requested() {
                info!(run_id = %run.id, ran = i, total, "Benchmark cancelled");
                run.cancelled = true;
                break;
            }

            let index = i + 1;
            emit(BenchmarkEvent::TrialStatus {
                index,
                total,
                codec: entry.codec,
                acceleration: entry.acceleration,
                status: TrialStatus::Running,
            });

            let trial = self.run_trial(index, entry, input, media, &scratch.path, events, control);

            info!(
                codec = %entry.codec,
                acceleration = %entry.acceleration,
                status = ?trial.status,
                wall_clock_s = trial.outcome.wall_clock_secs,
                "Trial {} of {} finished",
                index,
                total
            );
            emit(BenchmarkEvent::TrialStatus {
                index,
                total,
                codec: entry.codec,
                acceleration: entry.acceleration,
                status: trial.status,
            });
            run.trials.push(trial);
        }

        if !run.cancelled && run.trials.len() < total {
            run.cancelled = true;
        }
        run.finished_at = Some(Utc::now());
        emit(BenchmarkEvent::Finished {
            completed: run.completed(),
            failed: run.failed(),
            cancelled: run.cancelled,
        });

        Ok(run)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_trial(
        &self,
        index: usize,
        entry: &CapabilityEntry,
        input: &Path,
        media: &MediaInfo,
        scratch: &Path,
        events: Option<&SyncSender<BenchmarkEvent>>,
        control: &BenchmarkControl,
    ) -> BenchmarkTrial {
        let failed = |outcome: EncodeOutcome, encoder: Option<String>| BenchmarkTrial {
            entry: entry.clone(),
            status: TrialStatus::Failed,
            outcome,
            encoder,
            throughput_kbps: None,
            reported_speed: None,
            quality: None,
        };

        let output = scratch.join(format!(
            "bench_{:02}_{}_{}.{}",
            index,
            entry.codec,
            entry.acceleration,
            entry.codec.default_container()
        ));
        let _artifact = TrialArtifact {
            path: output.clone(),
        };

        let request = EncodeRequest::new(input, &output)
            .codec(entry.codec)
            .acceleration(entry.acceleration)
            .overwrite(true);
        let command = match CommandBuilder::new(&self.presets)
            .with_media(Some(media))
            .build(&request)
        {
            Ok(command) => command,
            Err(e) => {
                return failed(EncodeOutcome::failed(FailureKind::ExitCode, e.to_string(), 0.0), None);
            }
        };
        if command.downgraded() {
            // Running software here would mislabel the result
            return failed(
                EncodeOutcome::failed(
                    FailureKind::EncoderUnavailable,
                    format!("no {} encoder for {}", entry.acceleration, entry.codec),
                    0.0,
                ),
                None,
            );
        }

        let plan = TrialPlan::from_command(&command, &output)
            .with_timeout(self.trial_timeout)
            .with_known_duration(media.duration_secs);

        let mut progress = events.map(|tx| {
            ProgressSender::new(tx.clone(), move |event| BenchmarkEvent::Progress { index, event })
        });

        let started = Instant::now();
        let result = self
            .runner
            .run_trial(&plan, control.abort_token(), progress.as_mut());
        let wall = started.elapsed().as_secs_f64();

        let mut outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(encoder = %command.encoder, error = %e, "Benchmark trial could not start");
                return failed(
                    EncodeOutcome::failed(FailureKind::Launch, e.to_string(), wall),
                    Some(command.encoder),
                );
            }
        };

        // Wall-clock time measured here is authoritative
        outcome.wall_clock_secs = wall;
        let reported_speed = outcome.avg_speed;

        if !outcome.success {
            return BenchmarkTrial {
                reported_speed,
                ..failed(outcome, Some(command.encoder))
            };
        }

        let throughput_kbps = outcome
            .file_size_bytes
            .filter(|_| wall > 0.0)
            .map(|bytes| bytes as f64 * 8.0 / wall / 1000.0);
        if wall > 0.0 {
            if let Some(duration) = media.duration_secs {
                outcome.avg_speed = Some(duration / wall);
            }
        }

        let quality = self
            .quality
            .as_ref()
            .and_then(|metric| match metric.measure(input, &output) {
                Ok(scores) => Some(scores),
                Err(e) => {
                    warn!(encoder = %command.encoder, error = %e, "Quality scoring failed");
                    None
                }
            });

        BenchmarkTrial {
            entry: entry.clone(),
            status: TrialStatus::Complete,
            outcome,
            encoder: Some(command.encoder),
            throughput_kbps,
            reported_speed,
            quality,
        }
    }
}

/// Benchmark history: a JSON list of frozen runs, replaced atomically
#[derive(Debug, Clone)]
pub struct BenchmarkStore {
    path: PathBuf,
}

impl BenchmarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> EngineResult<Vec<BenchmarkRun>> {
        Ok(load_json(&self.path)?.unwrap_or_default())
    }

    pub fn append(&self, run: &BenchmarkRun) -> EngineResult<()> {
        let mut runs = self.load()?;
        runs.push(run.clone());
        save_json_atomic(&self.path, &runs)?;
        info!(path = %self.path.display(), run_id = %run.id, runs = runs.len(), "Saved benchmark run");
        Ok(())
    }
}
