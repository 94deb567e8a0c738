//! Supervised encode pipeline: Supervisor -> ProgressParser -> progress
//! channel -> [`EncodeOutcome`].

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::collab::MetadataProbe;
use super::core::{
    BuiltCommand, CommandBuilder, EncodeOutcome, EncodeRequest, FailureKind, MediaInfo,
    PresetCatalog, ProgressEvent, ProgressParser,
};
use super::error::{EngineError, EngineResult};
use super::supervisor::{self, ChunkPoll};
use crate::config::{EncodeConfig, ToolsConfig};

/// How long the run loop waits for output before re-checking limits
const TICK: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag, cheap to clone and share across threads
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Producer side of a bounded progress channel.
///
/// Never blocks the encode: when the channel is full the newest event is
/// parked and replaces any older parked one, so consumers may miss
/// intermediate values but always see events in order.
pub struct ProgressSender<T> {
    tx: SyncSender<T>,
    wrap: Box<dyn Fn(ProgressEvent) -> T + Send>,
    parked: Option<ProgressEvent>,
    connected: bool,
}

impl<T> ProgressSender<T> {
    pub fn new(tx: SyncSender<T>, wrap: impl Fn(ProgressEvent) -> T + Send + 'static) -> Self {
        Self {
            tx,
            wrap: Box::new(wrap),
            parked: None,
            connected: true,
        }
    }

    /// Queue the latest event; returns false once the receiver is gone
    pub fn send(&mut self, event: ProgressEvent) -> bool {
        self.parked = Some(event);
        self.flush()
    }

    /// Retry a parked event
    pub fn flush(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        if let Some(event) = self.parked.take() {
            match self.tx.try_send((self.wrap)(event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => self.parked = Some(event),
                Err(TrySendError::Disconnected(_)) => self.connected = false,
            }
        }
        self.connected
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl ProgressSender<ProgressEvent> {
    /// Sender that forwards events unchanged
    pub fn plain(tx: SyncSender<ProgressEvent>) -> Self {
        Self::new(tx, |event| event)
    }
}

/// Per-run supervision settings
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub program: String,
    /// Hard upper bound on the whole run
    pub timeout: Option<Duration>,
    pub progress_interval: Duration,
    /// SIGTERM grace before escalating to a kill on cancellation
    pub grace: Duration,
    pub known_duration: Option<f64>,
    /// File whose size is reported; missing or empty on success is a failure
    pub output: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            progress_interval: super::core::DEFAULT_MIN_INTERVAL,
            grace: Duration::from_secs(3),
            known_duration: None,
            output: None,
        }
    }
}

/// ffmpeg traps SIGINT/SIGTERM/SIGQUIT and exits with
/// "Exiting normally, received signal N", so check both the status and the
/// diagnostic text
#[cfg(unix)]
pub fn was_user_cancelled(status: &ExitStatus, stderr: &str) -> bool {
    use std::os::unix::process::ExitStatusExt;

    if let Some(signal) = status.signal() {
        if matches!(signal, 2 | 3 | 15) {
            return true;
        }
    }

    stderr.contains("received signal 2")
        || stderr.contains("received signal 3")
        || stderr.contains("received signal 15")
}

#[cfg(not(unix))]
pub fn was_user_cancelled(_status: &ExitStatus, stderr: &str) -> bool {
    stderr.contains("received signal")
}

fn forward<T>(event: Option<ProgressEvent>, progress: &mut Option<&mut ProgressSender<T>>) {
    if let (Some(event), Some(sender)) = (event, progress.as_deref_mut()) {
        sender.send(event);
    }
}

fn output_size(path: Option<&Path>) -> Option<u64> {
    path.and_then(|p| fs::metadata(p).ok()).map(|m| m.len())
}

/// Run ffmpeg with `args` under supervision.
///
/// Only launch problems are returned as `Err`; everything that happens after
/// the process started (non-zero exit, timeout, cancellation, missing output)
/// is classified into the returned [`EncodeOutcome`].
pub fn run_ffmpeg<T>(
    args: &[String],
    opts: &RunOptions,
    mut progress: Option<&mut ProgressSender<T>>,
    cancel: &CancelToken,
) -> EngineResult<EncodeOutcome> {
    let started = Instant::now();
    let mut handle = supervisor::launch(&opts.program, args)?;
    let mut parser = ProgressParser::new()
        .with_min_interval(opts.progress_interval)
        .with_known_duration(opts.known_duration);

    let mut stopped: Option<FailureKind> = None;
    let mut exited = false;

    loop {
        match handle.next_chunk(TICK) {
            ChunkPoll::Chunk(chunk) => {
                let event = parser.feed(&chunk.data);
                forward(event, &mut progress);
            }
            ChunkPoll::Idle => {
                if let Some(sender) = progress.as_deref_mut() {
                    sender.flush();
                }
                if !exited && handle.try_wait()?.is_some() {
                    // Pipes may be held open by a grandchild; give them one
                    // more tick, then stop reading
                    exited = true;
                    continue;
                }
                if exited {
                    break;
                }
            }
            ChunkPoll::Closed => break,
        }

        if cancel.is_cancelled() {
            info!(pid = handle.pid(), "Cancelling encode");
            handle.terminate(opts.grace)?;
            stopped = Some(FailureKind::Cancelled);
            break;
        }
        if let Some(limit) = opts.timeout {
            if started.elapsed() >= limit {
                warn!(pid = handle.pid(), timeout_s = limit.as_secs_f64(), "Encode timed out, killing");
                handle.kill()?;
                stopped = Some(FailureKind::Timeout);
                break;
            }
        }
    }

    // Pipes closed: the process is exiting. Keep enforcing limits while it does.
    let status = loop {
        if stopped.is_some() {
            break handle.wait()?;
        }
        if let Some(status) = handle.wait_timeout(TICK)? {
            break status;
        }
        if cancel.is_cancelled() {
            handle.terminate(opts.grace)?;
            stopped = Some(FailureKind::Cancelled);
        } else if opts.timeout.is_some_and(|limit| started.elapsed() >= limit) {
            handle.kill()?;
            stopped = Some(FailureKind::Timeout);
        }
    };

    for chunk in handle.drain_ready() {
        let event = parser.feed(&chunk.data);
        forward(event, &mut progress);
    }
    let tail = parser.flush();
    forward(tail, &mut progress);
    if let Some(sender) = progress.as_deref_mut() {
        sender.flush();
    }

    let wall_clock_secs = started.elapsed().as_secs_f64();
    let verdict = parser.finish(status.code());

    let mut outcome = EncodeOutcome {
        success: verdict.success,
        wall_clock_secs,
        file_size_bytes: None,
        avg_fps: verdict.avg_fps,
        avg_speed: verdict.avg_speed,
        exit_code: status.code(),
        failure: verdict.failure,
        error: verdict.message,
        details: (!verdict.details.is_empty()).then_some(verdict.details),
    };

    let cancelled_by_user = stopped == Some(FailureKind::Cancelled)
        || (!verdict.success && was_user_cancelled(&status, parser.transcript()));

    if stopped == Some(FailureKind::Timeout) {
        outcome.success = false;
        outcome.failure = Some(FailureKind::Timeout);
        outcome.error = Some(format!(
            "timed out after {:.1}s",
            opts.timeout.unwrap_or_default().as_secs_f64()
        ));
    } else if cancelled_by_user {
        outcome.success = false;
        outcome.failure = Some(FailureKind::Cancelled);
        outcome.error = Some("cancelled".to_string());
    } else if outcome.success {
        if let Some(path) = opts.output.as_deref() {
            match output_size(Some(path)) {
                Some(size) if size > 0 => outcome.file_size_bytes = Some(size),
                _ => {
                    outcome.success = false;
                    outcome.failure = Some(FailureKind::MissingOutput);
                    outcome.error = Some(format!(
                        "encoder exited cleanly but produced no output at {}",
                        path.display()
                    ));
                }
            }
        }
    }

    if outcome.success {
        debug!(
            wall_clock_s = wall_clock_secs,
            size = outcome.file_size_bytes,
            fps = outcome.avg_fps,
            "Encode finished"
        );
    } else {
        debug!(
            failure = ?outcome.failure,
            exit_code = ?outcome.exit_code,
            error = outcome.error.as_deref().unwrap_or(""),
            "Encode failed"
        );
    }

    Ok(outcome)
}

/// A single bounded encode to run and measure.
#[derive(Debug, Clone)]
pub struct TrialPlan {
    pub args: Vec<String>,
    pub output: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub known_duration: Option<f64>,
}

impl TrialPlan {
    pub fn from_command(command: &BuiltCommand, output: impl Into<PathBuf>) -> Self {
        Self {
            args: command.args.clone(),
            output: Some(output.into()),
            timeout: None,
            known_duration: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_known_duration(mut self, duration: Option<f64>) -> Self {
        self.known_duration = duration;
        self
    }
}

/// Seam between the prober/scheduler and the external process.
pub trait TrialRunner {
    fn run_trial<T>(
        &self,
        plan: &TrialPlan,
        cancel: &CancelToken,
        progress: Option<&mut ProgressSender<T>>,
    ) -> EngineResult<EncodeOutcome>;
}

/// Runs trials through ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegTrialRunner {
    pub program: String,
    pub progress_interval: Duration,
    pub grace: Duration,
}

impl FfmpegTrialRunner {
    pub fn new(tools: &ToolsConfig, encode: &EncodeConfig) -> Self {
        Self {
            program: tools.ffmpeg.clone(),
            progress_interval: encode.progress_interval(),
            grace: encode.terminate_grace(),
        }
    }
}

impl TrialRunner for FfmpegTrialRunner {
    fn run_trial<T>(
        &self,
        plan: &TrialPlan,
        cancel: &CancelToken,
        progress: Option<&mut ProgressSender<T>>,
    ) -> EngineResult<EncodeOutcome> {
        let opts = RunOptions {
            program: self.program.clone(),
            timeout: plan.timeout,
            progress_interval: self.progress_interval,
            grace: self.grace,
            known_duration: plan.known_duration,
            output: plan.output.clone(),
        };
        run_ffmpeg(&plan.args, &opts, progress, cancel)
    }
}

/// A finished production encode
#[derive(Debug, Clone)]
pub struct EncodeReport {
    pub command: BuiltCommand,
    pub outcome: EncodeOutcome,
}

/// Production encode entry point. Owns its configuration; no global state.
#[derive(Clone)]
pub struct Encoder {
    tools: ToolsConfig,
    settings: EncodeConfig,
    presets: PresetCatalog,
    metadata: Option<Arc<dyn MetadataProbe + Send + Sync>>,
}

impl Encoder {
    pub fn new(tools: ToolsConfig, settings: EncodeConfig) -> Self {
        Self {
            tools,
            settings,
            presets: PresetCatalog::builtin(),
            metadata: None,
        }
    }

    pub fn with_presets(mut self, presets: PresetCatalog) -> Self {
        self.presets = presets;
        self
    }

    pub fn with_metadata(mut self, probe: Arc<dyn MetadataProbe + Send + Sync>) -> Self {
        self.metadata = Some(probe);
        self
    }

    pub fn presets(&self) -> &PresetCatalog {
        &self.presets
    }

    fn media_for(&self, request: &EncodeRequest) -> Option<MediaInfo> {
        let probe = self.metadata.as_ref()?;
        match probe.probe(&request.source) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(source = %request.source.display(), error = %e, "Metadata probe failed, building without it");
                None
            }
        }
    }

    /// Build the command for `request` (probing metadata when a probe is configured)
    pub fn prepare(&self, request: &EncodeRequest) -> EngineResult<(BuiltCommand, Option<MediaInfo>)> {
        let media = self.media_for(request);
        let command = CommandBuilder::new(&self.presets)
            .with_media(media.as_ref())
            .build(request)?;
        Ok((command, media))
    }

    /// Run one encode to completion.
    ///
    /// A failed encode is an `Err`: [`EngineError::EncodeFailure`] with the
    /// reduced message and full details, [`EngineError::TrialTimeout`] or
    /// [`EngineError::Cancelled`]. Partial output is removed on failure and
    /// kept on cancellation.
    pub fn encode<T>(
        &self,
        request: &EncodeRequest,
        progress: Option<&mut ProgressSender<T>>,
        cancel: &CancelToken,
    ) -> EngineResult<EncodeReport> {
        let (command, media) = self.prepare(request)?;
        self.run_prepared(request, command, media.as_ref(), progress, cancel)
    }

    /// Run a command produced by [`Encoder::prepare`] for the same request
    pub fn run_prepared<T>(
        &self,
        request: &EncodeRequest,
        command: BuiltCommand,
        media: Option<&MediaInfo>,
        progress: Option<&mut ProgressSender<T>>,
        cancel: &CancelToken,
    ) -> EngineResult<EncodeReport> {
        if let Some(parent) = request.destination.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let existed_before = request.destination.exists();

        info!(
            source = %request.source.display(),
            destination = %request.destination.display(),
            encoder = %command.encoder,
            "Starting encode"
        );

        let opts = RunOptions {
            program: self.tools.ffmpeg.clone(),
            timeout: self.settings.timeout(),
            progress_interval: self.settings.progress_interval(),
            grace: self.settings.terminate_grace(),
            known_duration: media
                .and_then(|m| m.duration_secs)
                .map(|d| request.max_duration_secs.map_or(d, |cap| d.min(cap))),
            output: Some(request.destination.clone()),
        };

        let outcome = run_ffmpeg(&command.args, &opts, progress, cancel)?;

        if outcome.success {
            return Ok(EncodeReport { command, outcome });
        }

        let cancelled = outcome.failure == Some(FailureKind::Cancelled);
        let may_remove = !existed_before || request.overwrite;
        if !cancelled && may_remove && request.destination.exists() {
            match fs::remove_file(&request.destination) {
                Ok(()) => debug!(path = %request.destination.display(), "Removed partial output"),
                Err(e) => warn!(path = %request.destination.display(), error = %e, "Failed to remove partial output"),
            }
        } else if cancelled && request.destination.exists() {
            debug!(path = %request.destination.display(), "Preserving partial output (cancelled)");
        }

        Err(match outcome.failure {
            Some(FailureKind::Cancelled) => EngineError::Cancelled,
            Some(FailureKind::Timeout) => EngineError::TrialTimeout {
                after: opts.timeout.unwrap_or_default(),
            },
            _ => EngineError::EncodeFailure {
                exit_code: outcome.exit_code,
                message: outcome
                    .error
                    .unwrap_or_else(|| "encoding failed".to_string()),
                details: outcome.details.unwrap_or_default(),
            },
        })
    }
}
