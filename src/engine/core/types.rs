use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Video,
    Audio,
    Image,
}

/// Target codec of an encode request (the generic, software-level identity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecId {
    H264,
    Hevc,
    Av1,
    Vp9,
    Aac,
    Opus,
    Mp3,
    Flac,
    Png,
    Jpeg,
    Webp,
}

impl CodecId {
    pub const ALL: [CodecId; 11] = [
        CodecId::H264,
        CodecId::Hevc,
        CodecId::Av1,
        CodecId::Vp9,
        CodecId::Aac,
        CodecId::Opus,
        CodecId::Mp3,
        CodecId::Flac,
        CodecId::Png,
        CodecId::Jpeg,
        CodecId::Webp,
    ];

    /// Video codecs in capability-matrix order.
    pub const VIDEO: [CodecId; 4] = [CodecId::H264, CodecId::Hevc, CodecId::Av1, CodecId::Vp9];

    pub fn id(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::Av1 => "av1",
            Self::Vp9 => "vp9",
            Self::Aac => "aac",
            Self::Opus => "opus",
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }

    pub fn kind(&self) -> CodecKind {
        match self {
            Self::H264 | Self::Hevc | Self::Av1 | Self::Vp9 => CodecKind::Video,
            Self::Aac | Self::Opus | Self::Mp3 | Self::Flac => CodecKind::Audio,
            Self::Png | Self::Jpeg | Self::Webp => CodecKind::Image,
        }
    }

    /// FFmpeg encoder used when no hardware acceleration applies
    pub fn software_encoder(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::Hevc => "libx265",
            Self::Av1 => "libsvtav1",
            Self::Vp9 => "libvpx-vp9",
            Self::Aac => "aac",
            Self::Opus => "libopus",
            Self::Mp3 => "libmp3lame",
            Self::Flac => "flac",
            Self::Png => "png",
            Self::Jpeg => "mjpeg",
            Self::Webp => "libwebp",
        }
    }

    /// Container extension used when the destination has none
    pub fn default_container(&self) -> &'static str {
        match self {
            Self::H264 | Self::Hevc => "mp4",
            Self::Av1 => "mkv",
            Self::Vp9 => "webm",
            Self::Aac => "m4a",
            Self::Opus => "ogg",
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    /// Codecs that ignore every rate-control knob
    pub fn is_lossless(&self) -> bool {
        matches!(self, Self::Flac | Self::Png)
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for CodecId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h264" | "avc" | "x264" => Ok(Self::H264),
            "hevc" | "h265" | "x265" => Ok(Self::Hevc),
            "av1" => Ok(Self::Av1),
            "vp9" => Ok(Self::Vp9),
            "aac" => Ok(Self::Aac),
            "opus" => Ok(Self::Opus),
            "mp3" => Ok(Self::Mp3),
            "flac" => Ok(Self::Flac),
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" | "mjpeg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            other => Err(format!("unknown codec '{}'", other)),
        }
    }
}

/// Hardware vendor encoder family requested for a codec (or none).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccelerationChoice {
    #[default]
    None,
    Nvidia,
    Amd,
    Intel,
    Apple,
}

impl AccelerationChoice {
    /// Matrix order: software baseline first.
    pub const ALL: [AccelerationChoice; 5] = [
        AccelerationChoice::None,
        AccelerationChoice::Nvidia,
        AccelerationChoice::Amd,
        AccelerationChoice::Intel,
        AccelerationChoice::Apple,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Nvidia => "nvidia",
            Self::Amd => "amd",
            Self::Intel => "intel",
            Self::Apple => "apple",
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for AccelerationChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AccelerationChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "software" | "cpu" => Ok(Self::None),
            "nvidia" | "nvenc" | "cuda" => Ok(Self::Nvidia),
            "amd" | "amf" => Ok(Self::Amd),
            "intel" | "qsv" => Ok(Self::Intel),
            "apple" | "videotoolbox" => Ok(Self::Apple),
            other => Err(format!("unknown acceleration '{}'", other)),
        }
    }
}

/// Quality knobs as supplied by the caller. Any subset may be set; see
/// [`QualityKnobs::authoritative`] for precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityKnobs {
    pub crf: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    pub target_size_bytes: Option<u64>,
}

/// The single rate-control knob that drives an encode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateControl {
    Crf(u32),
    BitrateKbps(u32),
    TargetSizeBytes(u64),
}

impl QualityKnobs {
    /// Target size overrides bitrate, which overrides CRF.
    pub fn authoritative(&self) -> Option<RateControl> {
        if let Some(bytes) = self.target_size_bytes {
            Some(RateControl::TargetSizeBytes(bytes))
        } else if let Some(kbps) = self.bitrate_kbps {
            Some(RateControl::BitrateKbps(kbps))
        } else {
            self.crf.map(RateControl::Crf)
        }
    }

    /// Names of the knobs set by the caller but shadowed by a higher-precedence knob
    pub fn shadowed(&self) -> Vec<&'static str> {
        let mut shadowed = Vec::new();
        match self.authoritative() {
            Some(RateControl::TargetSizeBytes(_)) => {
                if self.bitrate_kbps.is_some() {
                    shadowed.push("bitrate");
                }
                if self.crf.is_some() {
                    shadowed.push("crf");
                }
            }
            Some(RateControl::BitrateKbps(_)) => {
                if self.crf.is_some() {
                    shadowed.push("crf");
                }
            }
            _ => {}
        }
        shadowed
    }
}

/// Immutable description of one encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Explicit codec; when absent the preset must supply one
    #[serde(default)]
    pub codec: Option<CodecId>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub quality: QualityKnobs,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub framerate: Option<f64>,
    #[serde(default)]
    pub acceleration: AccelerationChoice,
    /// Free-form ffmpeg arguments, split shell-style
    #[serde(default)]
    pub extra_args: String,
    #[serde(default)]
    pub audio_bitrate_kbps: Option<u32>,
    /// Drop audio streams from video outputs
    #[serde(default)]
    pub no_audio: bool,
    #[serde(default)]
    pub overwrite: bool,
    /// Stop after this many video frames (trial encodes)
    #[serde(default)]
    pub max_frames: Option<u32>,
    /// Stop after this much media time
    #[serde(default)]
    pub max_duration_secs: Option<f64>,
}

impl EncodeRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            codec: None,
            preset: None,
            quality: QualityKnobs::default(),
            width: None,
            height: None,
            framerate: None,
            acceleration: AccelerationChoice::None,
            extra_args: String::new(),
            audio_bitrate_kbps: None,
            no_audio: false,
            overwrite: false,
            max_frames: None,
            max_duration_secs: None,
        }
    }

    pub fn codec(mut self, codec: CodecId) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = Some(preset.into());
        self
    }

    pub fn acceleration(mut self, acceleration: AccelerationChoice) -> Self {
        self.acceleration = acceleration;
        self
    }

    pub fn crf(mut self, crf: u32) -> Self {
        self.quality.crf = Some(crf);
        self
    }

    pub fn bitrate_kbps(mut self, kbps: u32) -> Self {
        self.quality.bitrate_kbps = Some(kbps);
        self
    }

    pub fn target_size_bytes(mut self, bytes: u64) -> Self {
        self.quality.target_size_bytes = Some(bytes);
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// Transient progress snapshot for one encode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Media time encoded so far (non-decreasing within one encode)
    pub elapsed_secs: f64,
    pub speed: Option<f64>,
    pub fps: Option<f64>,
    pub bitrate_kbps: Option<f64>,
    pub frame: Option<u64>,
    /// Only known once the input duration has been announced
    pub percent: Option<f64>,
    pub eta_secs: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Tool ran and exited non-zero
    ExitCode,
    /// Tool reported the encoder as unknown/unavailable (regardless of exit code)
    EncoderUnavailable,
    Timeout,
    Cancelled,
    /// Exit 0 but no usable output on disk
    MissingOutput,
    /// The tool could not be launched at all
    Launch,
}

/// Terminal value of one encode, created once at process exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeOutcome {
    pub success: bool,
    pub wall_clock_secs: f64,
    /// Size on disk, read from the filesystem after exit
    pub file_size_bytes: Option<u64>,
    pub avg_fps: Option<f64>,
    pub avg_speed: Option<f64>,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub failure: Option<FailureKind>,
    /// Reduced, human-readable diagnostic
    #[serde(default)]
    pub error: Option<String>,
    /// Full captured diagnostic text
    #[serde(default)]
    pub details: Option<String>,
}

impl EncodeOutcome {
    pub fn failed(kind: FailureKind, message: impl Into<String>, wall_clock_secs: f64) -> Self {
        Self {
            success: false,
            wall_clock_secs,
            file_size_bytes: None,
            avg_fps: None,
            avg_speed: None,
            exit_code: None,
            failure: Some(kind),
            error: Some(message.into()),
            details: None,
        }
    }

    pub fn file_size_mb(&self) -> Option<f64> {
        self.file_size_bytes.map(|b| b as f64 / (1024.0 * 1024.0))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

/// One queued production encode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeJob {
    pub id: Uuid,
    pub request: EncodeRequest,
    pub status: JobStatus,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl EncodeJob {
    pub fn new(request: EncodeRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            status: JobStatus::Pending,
            last_error: None,
        }
    }
}
