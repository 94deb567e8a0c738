//! Capability Prober: finds out which (codec, acceleration) pairs actually
//! encode on this machine by running tiny disposable trials, and caches the
//! result as a flat list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::core::{
    AccelerationChoice, CodecId, CommandBuilder, EncodeRequest, PresetCatalog, encoder_for,
    load_json, save_json_atomic, temp_sibling,
};
use super::encode::{CancelToken, ProgressSender, RunOptions, TrialPlan, TrialRunner, run_ffmpeg};
use super::error::{EngineError, EngineResult};
use super::hardware::EncoderListing;
use crate::config::ProbeConfig;

/// Availability of one (codec, acceleration) pair at probe time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    pub codec: CodecId,
    pub acceleration: AccelerationChoice,
    /// Encoder that was tried; `None` when no mapping exists
    pub encoder: Option<String>,
    pub available: bool,
    /// Whether `ffmpeg -encoders` lists the encoder (hint only)
    #[serde(default)]
    pub listed: Option<bool>,
    pub probed_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl CapabilityEntry {
    pub fn key(&self) -> (CodecId, AccelerationChoice) {
        (self.codec, self.acceleration)
    }
}

/// Set of entries keyed by (codec, acceleration), kept in probe order.
/// Serialized as a flat list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMatrix {
    entries: Vec<CapabilityEntry>,
}

impl CapabilityMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CapabilityEntry>) -> Self {
        let mut matrix = Self::new();
        for entry in entries {
            matrix.upsert(entry);
        }
        matrix
    }

    /// Insert, or replace the entry for the same pair in place
    pub fn upsert(&mut self, entry: CapabilityEntry) {
        match self.entries.iter_mut().find(|e| e.key() == entry.key()) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn merge(&mut self, entries: impl IntoIterator<Item = CapabilityEntry>) {
        for entry in entries {
            self.upsert(entry);
        }
    }

    pub fn get(&self, codec: CodecId, acceleration: AccelerationChoice) -> Option<&CapabilityEntry> {
        self.entries
            .iter()
            .find(|e| e.codec == codec && e.acceleration == acceleration)
    }

    pub fn is_available(&self, codec: CodecId, acceleration: AccelerationChoice) -> bool {
        self.get(codec, acceleration).is_some_and(|e| e.available)
    }

    pub fn available(&self) -> impl Iterator<Item = &CapabilityEntry> {
        self.entries.iter().filter(|e| e.available)
    }

    pub fn entries(&self) -> &[CapabilityEntry] {
        &self.entries
    }

    /// Most recent probe time, for "last probed at" displays
    pub fn last_probed(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.probed_at).max()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// File-backed matrix. Never invalidated automatically; callers re-probe.
#[derive(Debug, Clone)]
pub struct CapabilityCache {
    path: PathBuf,
}

impl CapabilityCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> EngineResult<Option<CapabilityMatrix>> {
        load_json(&self.path)
    }

    pub fn save(&self, matrix: &CapabilityMatrix) -> EngineResult<()> {
        save_json_atomic(&self.path, matrix)?;
        info!(path = %self.path.display(), entries = matrix.len(), "Saved capability cache");
        Ok(())
    }
}

/// Progress of a probe run ("12 of 20 tested")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEvent {
    /// 1-based position in the probe order
    pub index: usize,
    pub total: usize,
    pub codec: CodecId,
    pub acceleration: AccelerationChoice,
    pub available: bool,
}

/// Probe order: video codecs outer, accelerations inner, software first
pub fn probe_matrix() -> Vec<(CodecId, AccelerationChoice)> {
    CodecId::VIDEO
        .iter()
        .flat_map(|&codec| AccelerationChoice::ALL.iter().map(move |&accel| (codec, accel)))
        .collect()
}

/// Trial output file, removed when dropped
pub(crate) struct TrialArtifact {
    pub(crate) path: PathBuf,
}

impl Drop for TrialArtifact {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove trial output");
            }
        }
    }
}

/// Scratch directory for one probe or benchmark run, removed when dropped
pub(crate) struct ScratchDir {
    pub(crate) path: PathBuf,
}

impl ScratchDir {
    pub(crate) fn create(parent: &Path, prefix: &str) -> EngineResult<Self> {
        let path = parent.join(format!("ffbench-{}-{}", prefix, Uuid::new_v4().simple()));
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Sizes and limits for probe trials
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub trial_timeout: Duration,
    pub frames: u32,
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
}

impl From<&ProbeConfig> for ProbeSettings {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            trial_timeout: config.trial_timeout(),
            frames: config.frames,
            width: config.width,
            height: config.height,
            duration_secs: config.duration_secs,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from(&ProbeConfig::default())
    }
}

/// Arguments that render the synthetic probe input (lavfi test pattern to y4m)
pub fn synthetic_input_args(settings: &ProbeSettings, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-y".into(),
        "-f".into(),
        "lavfi".into(),
        "-i".into(),
        format!(
            "testsrc=size={}x{}:rate=25:duration={}",
            settings.width, settings.height, settings.duration_secs
        ),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-f".into(),
        "yuv4mpegpipe".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Return the synthetic input in `dir`, generating it if absent.
///
/// Written to a temp sibling and renamed into place so concurrent readers
/// never see a partial file.
pub fn ensure_synthetic_input(
    ffmpeg: &str,
    dir: &Path,
    settings: &ProbeSettings,
) -> EngineResult<PathBuf> {
    let path = dir.join(format!(
        "probe_input_{}x{}.y4m",
        settings.width, settings.height
    ));
    if fs::metadata(&path).is_ok_and(|m| m.len() > 0) {
        return Ok(path);
    }

    fs::create_dir_all(dir)?;
    let tmp = temp_sibling(&path);
    let mut opts = RunOptions::new(ffmpeg);
    opts.timeout = Some(settings.trial_timeout);
    opts.output = Some(tmp.clone());

    let outcome = run_ffmpeg::<()>(
        &synthetic_input_args(settings, &tmp),
        &opts,
        None,
        &CancelToken::new(),
    )?;

    if !outcome.success {
        let _ = fs::remove_file(&tmp);
        return Err(EngineError::EncodeFailure {
            exit_code: outcome.exit_code,
            message: outcome
                .error
                .unwrap_or_else(|| "failed to generate probe input".to_string()),
            details: outcome.details.unwrap_or_default(),
        });
    }

    fs::rename(&tmp, &path)?;
    debug!(path = %path.display(), "Generated synthetic probe input");
    Ok(path)
}

/// Runs the probe matrix through a [`TrialRunner`], one trial at a time.
pub struct CapabilityProber<R> {
    runner: R,
    settings: ProbeSettings,
    presets: PresetCatalog,
    listing: Option<EncoderListing>,
    scratch_parent: PathBuf,
}

impl<R: TrialRunner> CapabilityProber<R> {
    pub fn new(runner: R, settings: ProbeSettings) -> Self {
        Self {
            runner,
            settings,
            presets: PresetCatalog::empty(),
            listing: None,
            scratch_parent: std::env::temp_dir(),
        }
    }

    pub fn with_listing(mut self, listing: EncoderListing) -> Self {
        self.listing = Some(listing);
        self
    }

    /// Where per-run scratch directories are created (default: system temp)
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_parent = dir.into();
        self
    }

    /// Probe the full matrix. Trial failures never surface as errors: every
    /// pair yields an entry.
    pub fn probe(
        &self,
        input: &Path,
        events: Option<&Sender<ProbeEvent>>,
        cancel: &CancelToken,
    ) -> Vec<CapabilityEntry> {
        self.probe_pairs(&probe_matrix(), input, events, cancel)
    }

    /// Probe `pairs` in the given order. Cancellation stops between trials
    /// and returns what was probed so far.
    pub fn probe_pairs(
        &self,
        pairs: &[(CodecId, AccelerationChoice)],
        input: &Path,
        events: Option<&Sender<ProbeEvent>>,
        cancel: &CancelToken,
    ) -> Vec<CapabilityEntry> {
        let total = pairs.len();
        let mut entries = Vec::with_capacity(total);

        let scratch = match ScratchDir::create(&self.scratch_parent, "probe") {
            Ok(dir) => Some(dir),
            Err(e) => {
                warn!(error = %e, "Could not create probe scratch directory");
                None
            }
        };
        let mut tool_missing: Option<String> = None;

        info!(total, input = %input.display(), "Probing capability matrix");

        for (i, &(codec, acceleration)) in pairs.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(probed = i, total, "Probe cancelled");
                break;
            }

            let entry = match (&scratch, &tool_missing) {
                (_, Some(err)) => self.unavailable(codec, acceleration, err.clone()),
                (None, _) => self.unavailable(
                    codec,
                    acceleration,
                    "no scratch directory for trial output".to_string(),
                ),
                (Some(dir), None) => {
                    let (entry, missing) = self.run_one(codec, acceleration, input, &dir.path, cancel);
                    if missing {
                        tool_missing = entry.error.clone();
                    }
                    entry
                }
            };

            info!(
                codec = %codec,
                acceleration = %acceleration,
                encoder = entry.encoder.as_deref().unwrap_or("-"),
                available = entry.available,
                "Probed {} of {}",
                i + 1,
                total
            );

            if let Some(tx) = events {
                let _ = tx.send(ProbeEvent {
                    index: i + 1,
                    total,
                    codec,
                    acceleration,
                    available: entry.available,
                });
            }
            entries.push(entry);
        }

        entries
    }

    fn unavailable(
        &self,
        codec: CodecId,
        acceleration: AccelerationChoice,
        error: String,
    ) -> CapabilityEntry {
        let encoder = encoder_for(codec, acceleration);
        CapabilityEntry {
            codec,
            acceleration,
            encoder: encoder.map(str::to_string),
            available: false,
            listed: encoder.and_then(|enc| self.listing.as_ref().map(|l| l.contains(enc))),
            probed_at: Utc::now(),
            duration_ms: 0,
            error: Some(error),
        }
    }

    /// One trial. The flag is true when the encoder binary itself is missing.
    fn run_one(
        &self,
        codec: CodecId,
        acceleration: AccelerationChoice,
        input: &Path,
        scratch: &Path,
        cancel: &CancelToken,
    ) -> (CapabilityEntry, bool) {
        let Some(encoder) = encoder_for(codec, acceleration) else {
            return (
                self.unavailable(
                    codec,
                    acceleration,
                    format!("no {} encoder for {}", acceleration, codec),
                ),
                false,
            );
        };

        let output = scratch.join(format!(
            "trial_{}_{}.{}",
            codec,
            acceleration,
            codec.default_container()
        ));
        let _artifact = TrialArtifact {
            path: output.clone(),
        };

        let mut request = EncodeRequest::new(input, &output)
            .codec(codec)
            .acceleration(acceleration)
            .overwrite(true);
        request.max_frames = Some(self.settings.frames);
        request.no_audio = true;

        let command = match CommandBuilder::new(&self.presets).build(&request) {
            Ok(command) => command,
            Err(e) => return (self.unavailable(codec, acceleration, e.to_string()), false),
        };

        let plan = TrialPlan::from_command(&command, &output)
            .with_timeout(self.settings.trial_timeout)
            .with_known_duration(Some(self.settings.duration_secs));

        let started = Instant::now();
        let result = self
            .runner
            .run_trial(&plan, cancel, None::<&mut ProgressSender<()>>);
        let duration_ms = started.elapsed().as_millis() as u64;

        let listed = self.listing.as_ref().map(|l| l.contains(encoder));
        let entry = |available: bool, error: Option<String>| CapabilityEntry {
            codec,
            acceleration,
            encoder: Some(encoder.to_string()),
            available,
            listed,
            probed_at: Utc::now(),
            duration_ms,
            error,
        };

        match result {
            Ok(outcome) => (entry(outcome.success, outcome.error), false),
            Err(e) => {
                let missing = e.is_tool_missing();
                (entry(false, Some(e.to_string())), missing)
            }
        }
    }
}
