use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

use super::ffmpeg_info::MediaInfo;
use super::preset::{PresetCatalog, SpeedTier};
use super::types::{AccelerationChoice, CodecId, CodecKind, EncodeRequest, RateControl};
use crate::engine::error::{EngineError, EngineResult};

/// Lowest video bitrate a target-size request may resolve to
pub const MIN_TARGET_VIDEO_KBPS: u32 = 50;

pub const DEFAULT_AUDIO_KBPS: u32 = 128;

/// Hardware encoder for a (codec, acceleration) pair, if one exists
pub fn hardware_encoder(codec: CodecId, accel: AccelerationChoice) -> Option<&'static str> {
    use AccelerationChoice as A;
    use CodecId as C;

    match (codec, accel) {
        (C::H264, A::Nvidia) => Some("h264_nvenc"),
        (C::H264, A::Amd) => Some("h264_amf"),
        (C::H264, A::Intel) => Some("h264_qsv"),
        (C::H264, A::Apple) => Some("h264_videotoolbox"),
        (C::Hevc, A::Nvidia) => Some("hevc_nvenc"),
        (C::Hevc, A::Amd) => Some("hevc_amf"),
        (C::Hevc, A::Intel) => Some("hevc_qsv"),
        (C::Hevc, A::Apple) => Some("hevc_videotoolbox"),
        (C::Av1, A::Nvidia) => Some("av1_nvenc"),
        (C::Av1, A::Amd) => Some("av1_amf"),
        (C::Av1, A::Intel) => Some("av1_qsv"),
        (C::Vp9, A::Intel) => Some("vp9_qsv"),
        _ => None,
    }
}

/// Encoder for a pair, with `none` mapping to the software encoder
pub fn encoder_for(codec: CodecId, accel: AccelerationChoice) -> Option<&'static str> {
    match accel {
        AccelerationChoice::None => Some(codec.software_encoder()),
        hw => hardware_encoder(codec, hw),
    }
}

/// Option dialect an encoder speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderFamily {
    X264,
    X265,
    SvtAv1,
    Vpx,
    Nvenc,
    Amf,
    Qsv,
    VideoToolbox,
    Audio,
    Image,
}

impl EncoderFamily {
    pub fn of(encoder: &str) -> Self {
        if encoder.ends_with("_nvenc") {
            Self::Nvenc
        } else if encoder.ends_with("_amf") {
            Self::Amf
        } else if encoder.ends_with("_qsv") {
            Self::Qsv
        } else if encoder.ends_with("_videotoolbox") {
            Self::VideoToolbox
        } else {
            match encoder {
                "libx264" => Self::X264,
                "libx265" => Self::X265,
                "libsvtav1" => Self::SvtAv1,
                "libvpx-vp9" => Self::Vpx,
                "png" | "mjpeg" | "libwebp" => Self::Image,
                _ => Self::Audio,
            }
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(
            self,
            Self::Nvenc | Self::Amf | Self::Qsv | Self::VideoToolbox
        )
    }
}

/// Observable decision taken while building a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildNotice {
    /// No hardware encoder exists for the pair; the software encoder is used
    DowngradedToSoftware {
        codec: CodecId,
        requested: AccelerationChoice,
        encoder: String,
    },
    /// A lower-precedence quality knob was supplied and ignored
    QualityKnobIgnored {
        knob: String,
        authoritative: String,
    },
    /// The codec has no use for the supplied rate-control knob
    RateControlIgnored { codec: CodecId, knob: String },
}

impl fmt::Display for BuildNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildNotice::DowngradedToSoftware {
                codec,
                requested,
                encoder,
            } => write!(
                f,
                "no {} encoder for {}; using software encoder {}",
                requested, codec, encoder
            ),
            BuildNotice::QualityKnobIgnored {
                knob,
                authoritative,
            } => write!(f, "{} ignored; {} takes precedence", knob, authoritative),
            BuildNotice::RateControlIgnored { codec, knob } => {
                write!(f, "{} has no use for {}; ignored", codec, knob)
            }
        }
    }
}

/// Argument list produced for one request, with the decisions behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltCommand {
    pub args: Vec<String>,
    pub codec: CodecId,
    pub encoder: String,
    /// Acceleration actually used (after any downgrade)
    pub acceleration: AccelerationChoice,
    /// Authoritative knob after layering
    pub rate_control: Option<RateControl>,
    /// Video bitrate handed to the encoder, when bitrate driven
    pub video_bitrate_kbps: Option<u32>,
    pub container: String,
    pub notices: Vec<BuildNotice>,
}

impl BuiltCommand {
    pub fn to_command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(&self.args);
        cmd
    }

    /// Shell-quoted command line for display
    pub fn display(&self, program: &str) -> String {
        let words = std::iter::once(program).chain(self.args.iter().map(String::as_str));
        shlex::try_join(words.clone()).unwrap_or_else(|_| words.collect::<Vec<_>>().join(" "))
    }

    pub fn downgraded(&self) -> bool {
        self.notices
            .iter()
            .any(|n| matches!(n, BuildNotice::DowngradedToSoftware { .. }))
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// Target video bitrate for a target-size request, in kbps.
///
/// `(target_bytes * 8 - audio_kbps * 1000 * duration) / duration / 1000`,
/// floored and never below [`MIN_TARGET_VIDEO_KBPS`].
pub fn target_video_bitrate_kbps(target_bytes: u64, duration_secs: f64, audio_kbps: u32) -> u32 {
    if duration_secs <= 0.0 {
        return MIN_TARGET_VIDEO_KBPS;
    }
    let total_bits = target_bytes as f64 * 8.0;
    let audio_bits = audio_kbps as f64 * 1000.0 * duration_secs;
    let kbps = ((total_bits - audio_bits) / duration_secs / 1000.0).floor();
    if kbps.is_finite() && kbps > MIN_TARGET_VIDEO_KBPS as f64 {
        kbps as u32
    } else {
        MIN_TARGET_VIDEO_KBPS
    }
}

/// Split free-form arguments shell-style. Unbalanced quotes fall back to
/// plain whitespace splitting.
pub fn split_extra_args(extra: &str) -> Vec<String> {
    if extra.trim().is_empty() {
        return Vec::new();
    }
    shlex::split(extra)
        .unwrap_or_else(|| extra.split_whitespace().map(str::to_string).collect())
}

/// Muxer name for `-f` when the destination carries no extension
pub fn muxer_for(container: &str) -> &'static str {
    match container {
        "mkv" => "matroska",
        "webm" => "webm",
        "mov" => "mov",
        "m4a" => "ipod",
        "ogg" => "ogg",
        "mp3" => "mp3",
        "flac" => "flac",
        "png" | "jpg" | "jpeg" => "image2",
        "webp" => "webp",
        _ => "mp4",
    }
}

fn container_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
}

fn default_crf(codec: CodecId) -> u32 {
    match codec {
        CodecId::H264 => 23,
        CodecId::Hevc => 28,
        CodecId::Av1 => 35,
        CodecId::Vp9 => 33,
        _ => 10,
    }
}

fn speed_args(family: EncoderFamily, tier: SpeedTier) -> Vec<String> {
    let pick = |fast: &str, balanced: &str, quality: &str| -> String {
        match tier {
            SpeedTier::Fast => fast,
            SpeedTier::Balanced => balanced,
            SpeedTier::Quality => quality,
        }
        .to_string()
    };

    match family {
        EncoderFamily::X264 | EncoderFamily::X265 => {
            vec!["-preset".into(), pick("veryfast", "medium", "slow")]
        }
        EncoderFamily::SvtAv1 => vec!["-preset".into(), pick("10", "8", "5")],
        EncoderFamily::Vpx => vec![
            "-deadline".into(),
            "good".into(),
            "-cpu-used".into(),
            pick("6", "4", "1"),
        ],
        EncoderFamily::Nvenc => vec!["-preset".into(), pick("p2", "p4", "p6")],
        EncoderFamily::Qsv => vec!["-preset".into(), pick("veryfast", "medium", "veryslow")],
        EncoderFamily::Amf => vec!["-quality".into(), pick("speed", "balanced", "quality")],
        EncoderFamily::VideoToolbox | EncoderFamily::Audio | EncoderFamily::Image => Vec::new(),
    }
}

/// Constant-quality arguments in the encoder's own dialect. Hardware
/// encoders get `-b:v 0` so the rate control stays unconstrained.
fn crf_args(family: EncoderFamily, crf: u32) -> Vec<String> {
    match family {
        EncoderFamily::Nvenc => vec![
            "-rc".into(),
            "vbr".into(),
            "-cq".into(),
            crf.to_string(),
            "-b:v".into(),
            "0".into(),
        ],
        EncoderFamily::Qsv => vec![
            "-global_quality".into(),
            crf.to_string(),
            "-b:v".into(),
            "0".into(),
        ],
        EncoderFamily::Amf => vec![
            "-rc".into(),
            "cqp".into(),
            "-qp_i".into(),
            crf.to_string(),
            "-qp_p".into(),
            crf.to_string(),
            "-b:v".into(),
            "0".into(),
        ],
        EncoderFamily::VideoToolbox => {
            let q = 100u32.saturating_sub(crf * 2).clamp(1, 100);
            vec!["-q:v".into(), q.to_string(), "-b:v".into(), "0".into()]
        }
        _ => vec!["-crf".into(), crf.to_string()],
    }
}

fn structural_args(codec: CodecId, family: EncoderFamily, container: &str) -> Vec<String> {
    let mut args = Vec::new();
    match codec {
        CodecId::H264 if family == EncoderFamily::X264 => {
            args.extend(["-pix_fmt", "yuv420p", "-profile:v", "high"].map(String::from));
        }
        CodecId::Hevc if matches!(container, "mp4" | "mov") => {
            args.extend(["-tag:v", "hvc1"].map(String::from));
        }
        CodecId::Vp9 if family == EncoderFamily::Vpx => {
            args.extend(["-row-mt", "1"].map(String::from));
        }
        _ => {}
    }
    args
}

fn knob_name(rc: &RateControl) -> &'static str {
    match rc {
        RateControl::Crf(_) => "crf",
        RateControl::BitrateKbps(_) => "bitrate",
        RateControl::TargetSizeBytes(_) => "target-size",
    }
}

/// Translates [`EncodeRequest`]s into ffmpeg argument lists.
///
/// Layers, lowest precedence first: codec structural defaults, preset
/// defaults, request overrides. Building performs no I/O.
pub struct CommandBuilder<'a> {
    presets: &'a PresetCatalog,
    media: Option<&'a MediaInfo>,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(presets: &'a PresetCatalog) -> Self {
        Self {
            presets,
            media: None,
        }
    }

    /// Source metadata, used for target-size duration and audio presence
    pub fn with_media(mut self, media: Option<&'a MediaInfo>) -> Self {
        self.media = media;
        self
    }

    fn validate(request: &EncodeRequest) -> EngineResult<()> {
        if request.source.as_os_str().is_empty() {
            return Err(EngineError::InvalidRequest("source path is empty".into()));
        }
        if request.destination.as_os_str().is_empty() {
            return Err(EngineError::InvalidRequest(
                "destination path is empty".into(),
            ));
        }
        if request.source == request.destination {
            return Err(EngineError::InvalidRequest(format!(
                "source and destination are the same file: {}",
                request.source.display()
            )));
        }
        if request.width == Some(0) || request.height == Some(0) {
            return Err(EngineError::InvalidRequest(
                "width and height must be positive".into(),
            ));
        }
        if let Some(fps) = request.framerate {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(EngineError::InvalidRequest(format!(
                    "invalid framerate {}",
                    fps
                )));
            }
        }
        let q = &request.quality;
        if q.crf.is_some_and(|c| c > 63) {
            return Err(EngineError::InvalidRequest(format!(
                "crf {} out of range (0-63)",
                q.crf.unwrap_or_default()
            )));
        }
        if q.bitrate_kbps == Some(0) || q.target_size_bytes == Some(0) {
            return Err(EngineError::InvalidRequest(
                "bitrate and target size must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Media seconds the encode will cover, if known
    fn effective_duration(&self, request: &EncodeRequest) -> Option<f64> {
        let probed = self.media.and_then(|m| m.duration_secs);
        match (probed, request.max_duration_secs) {
            (Some(d), Some(cap)) => Some(d.min(cap)),
            (Some(d), None) => Some(d),
            (None, cap) => cap,
        }
    }

    pub fn build(&self, request: &EncodeRequest) -> EngineResult<BuiltCommand> {
        Self::validate(request)?;

        let preset = match request.preset.as_deref() {
            Some(id) => Some(self.presets.get(id).ok_or_else(|| {
                EngineError::InvalidRequest(format!("unknown preset '{}'", id))
            })?),
            None => None,
        };

        let codec = request
            .codec
            .or(preset.map(|p| p.codec))
            .ok_or_else(|| EngineError::InvalidRequest("no codec specified".into()))?;

        let mut notices = Vec::new();

        // Acceleration remap, with an observable downgrade
        let (encoder, acceleration) = match encoder_for(codec, request.acceleration) {
            Some(enc) => (enc, request.acceleration),
            None => {
                let encoder = codec.software_encoder();
                warn!(
                    codec = %codec,
                    requested = %request.acceleration,
                    encoder,
                    "No hardware encoder mapping, falling back to software"
                );
                notices.push(BuildNotice::DowngradedToSoftware {
                    codec,
                    requested: request.acceleration,
                    encoder: encoder.to_string(),
                });
                (encoder, AccelerationChoice::None)
            }
        };
        let family = EncoderFamily::of(encoder);

        let container = container_of(&request.destination)
            .unwrap_or_else(|| codec.default_container().to_string());

        // Quality layering: request knobs replace preset knobs wholesale
        let request_rc = request.quality.authoritative();
        for knob in request.quality.shadowed() {
            if let Some(rc) = &request_rc {
                notices.push(BuildNotice::QualityKnobIgnored {
                    knob: knob.to_string(),
                    authoritative: knob_name(rc).to_string(),
                });
            }
        }
        let rate_control = request_rc.or_else(|| {
            preset.and_then(|p| {
                p.bitrate_kbps
                    .map(RateControl::BitrateKbps)
                    .or(p.crf.map(RateControl::Crf))
            })
        });

        let audio_kbps = request
            .audio_bitrate_kbps
            .or(preset.and_then(|p| p.audio_bitrate_kbps))
            .unwrap_or(DEFAULT_AUDIO_KBPS);
        let source_has_audio = self.media.map(MediaInfo::has_audio).unwrap_or(true);
        let keep_audio = !request.no_audio && source_has_audio;

        let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into()];
        args.push(if request.overwrite { "-y" } else { "-n" }.into());
        args.push("-i".into());
        args.push(request.source.to_string_lossy().into_owned());

        if let Some(limit) = request.max_duration_secs {
            args.push("-t".into());
            args.push(format!("{}", limit));
        }

        let mut video_bitrate_kbps = None;

        match codec.kind() {
            CodecKind::Video => {
                if let Some(filter) = scale_filter(request.width, request.height) {
                    args.push("-vf".into());
                    args.push(filter);
                }
                if let Some(fps) = request.framerate {
                    args.push("-r".into());
                    args.push(format!("{}", fps));
                }

                args.push("-c:v".into());
                args.push(encoder.to_string());
                args.extend(structural_args(codec, family, &container));
                args.extend(speed_args(
                    family,
                    preset.map(|p| p.speed).unwrap_or_default(),
                ));

                match rate_control.unwrap_or(RateControl::Crf(default_crf(codec))) {
                    RateControl::Crf(crf) => args.extend(crf_args(family, crf)),
                    RateControl::BitrateKbps(kbps) => {
                        video_bitrate_kbps = Some(kbps);
                        args.push("-b:v".into());
                        args.push(format!("{}k", kbps));
                    }
                    RateControl::TargetSizeBytes(bytes) => {
                        let duration = self.effective_duration(request).ok_or_else(|| {
                            EngineError::InvalidRequest(
                                "target size needs a known input duration".into(),
                            )
                        })?;
                        let audio = if keep_audio { audio_kbps } else { 0 };
                        let kbps = target_video_bitrate_kbps(bytes, duration, audio);
                        debug!(bytes, duration, audio, kbps, "Resolved target size");
                        video_bitrate_kbps = Some(kbps);
                        args.push("-b:v".into());
                        args.push(format!("{}k", kbps));
                    }
                }

                if let Some(frames) = request.max_frames {
                    args.push("-frames:v".into());
                    args.push(frames.to_string());
                }

                if keep_audio {
                    let audio_encoder = if container == "webm" { "libopus" } else { "aac" };
                    args.extend(["-c:a".to_string(), audio_encoder.to_string()]);
                    args.extend(["-b:a".to_string(), format!("{}k", audio_kbps)]);
                } else {
                    args.push("-an".into());
                }
            }
            CodecKind::Audio => {
                args.push("-vn".into());
                args.push("-c:a".into());
                args.push(encoder.to_string());

                if codec.is_lossless() {
                    if let Some(rc) = &request_rc {
                        notices.push(BuildNotice::RateControlIgnored {
                            codec,
                            knob: knob_name(rc).to_string(),
                        });
                    }
                } else {
                    let kbps = match rate_control {
                        Some(RateControl::BitrateKbps(kbps)) => kbps,
                        Some(RateControl::TargetSizeBytes(bytes)) => {
                            let duration = self.effective_duration(request).ok_or_else(|| {
                                EngineError::InvalidRequest(
                                    "target size needs a known input duration".into(),
                                )
                            })?;
                            ((bytes as f64 * 8.0 / duration / 1000.0).floor() as u32).max(8)
                        }
                        Some(rc @ RateControl::Crf(_)) => {
                            if request_rc.is_some() {
                                notices.push(BuildNotice::RateControlIgnored {
                                    codec,
                                    knob: knob_name(&rc).to_string(),
                                });
                            }
                            audio_kbps
                        }
                        None => audio_kbps,
                    };
                    args.push("-b:a".into());
                    args.push(format!("{}k", kbps));
                }
            }
            CodecKind::Image => {
                if let Some(filter) = scale_filter(request.width, request.height) {
                    args.push("-vf".into());
                    args.push(filter);
                }
                args.push("-c:v".into());
                args.push(encoder.to_string());

                match (codec, rate_control) {
                    (CodecId::Jpeg, Some(RateControl::Crf(crf))) => {
                        // mjpeg qscale runs 2 (best) to 31
                        let q = (2 + crf * 29 / 63).clamp(2, 31);
                        args.extend(["-q:v".to_string(), q.to_string()]);
                    }
                    (CodecId::Webp, Some(RateControl::Crf(crf))) => {
                        let q = 100u32.saturating_sub(crf * 100 / 63);
                        args.extend(["-quality".to_string(), q.to_string()]);
                    }
                    _ => {
                        if let Some(rc) = &request_rc {
                            notices.push(BuildNotice::RateControlIgnored {
                                codec,
                                knob: knob_name(rc).to_string(),
                            });
                        }
                    }
                }

                args.extend(["-frames:v", "1", "-update", "1"].map(String::from));
            }
        }

        if let Some(p) = preset {
            args.extend(split_extra_args(&p.extra_args));
        }
        args.extend(split_extra_args(&request.extra_args));

        if container_of(&request.destination).is_none() {
            args.push("-f".into());
            args.push(muxer_for(&container).to_string());
        }
        args.push(request.destination.to_string_lossy().into_owned());

        for notice in &notices {
            debug!(%notice, "Build notice");
        }

        Ok(BuiltCommand {
            args,
            codec,
            encoder: encoder.to_string(),
            acceleration,
            rate_control,
            video_bitrate_kbps,
            container,
            notices,
        })
    }
}

fn scale_filter(width: Option<u32>, height: Option<u32>) -> Option<String> {
    match (width, height) {
        (Some(w), Some(h)) => Some(format!("scale={}:{}", w, h)),
        (Some(w), None) => Some(format!("scale={}:-2", w)),
        (None, Some(h)) => Some(format!("scale=-2:{}", h)),
        (None, None) => None,
    }
}

/// Build with the built-in preset catalogue and no source metadata
pub fn build_command(request: &EncodeRequest) -> EngineResult<BuiltCommand> {
    CommandBuilder::new(&PresetCatalog::builtin()).build(request)
}
