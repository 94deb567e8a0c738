use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::supervisor::{run_capture, run_capture_command};

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    bit_rate: Option<String>,
    avg_frame_rate: Option<String>,
    color_transfer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub kind: StreamKind,
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    pub frame_rate: Option<f64>,
}

/// Static description of a media file as reported by ffprobe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub container: Option<String>,
    pub duration_secs: Option<f64>,
    pub size_bytes: Option<u64>,
    pub bitrate_kbps: Option<u32>,
    pub streams: Vec<StreamInfo>,
    /// PQ or HLG transfer on the first video stream
    pub hdr: bool,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.streams.iter().any(|s| s.kind == StreamKind::Audio)
    }

    pub fn video(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind == StreamKind::Video)
    }
}

fn parse_bits_to_kbps(value: Option<&str>) -> Option<u32> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|bps| (bps / 1000) as u32)
}

/// Parse "30000/1001" or "25" into frames per second
fn parse_frame_rate(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().ok()?;
            let den = den.trim().parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.trim().parse::<f64>().ok()?,
    };
    (rate > 0.0).then_some(rate)
}

fn is_hdr_transfer(transfer: &str) -> bool {
    matches!(transfer, "smpte2084" | "arib-std-b67")
}

/// Map ffprobe `-show_format -show_streams` JSON into [`MediaInfo`]
pub fn parse_ffprobe_json(json: &str) -> Result<MediaInfo, serde_json::Error> {
    let probe: FfprobeOutput = serde_json::from_str(json)?;

    let streams: Vec<StreamInfo> = probe
        .streams
        .iter()
        .map(|s| StreamInfo {
            kind: match s.codec_type.as_deref() {
                Some("video") => StreamKind::Video,
                Some("audio") => StreamKind::Audio,
                Some("subtitle") => StreamKind::Subtitle,
                _ => StreamKind::Other,
            },
            codec: s.codec_name.clone(),
            width: s.width,
            height: s.height,
            bitrate_kbps: parse_bits_to_kbps(s.bit_rate.as_deref()),
            frame_rate: s.avg_frame_rate.as_deref().and_then(parse_frame_rate),
        })
        .collect();

    let hdr = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|s| s.color_transfer.as_deref())
        .map(is_hdr_transfer)
        .unwrap_or(false);

    Ok(MediaInfo {
        container: probe.format.format_name,
        duration_secs: probe
            .format
            .duration
            .as_deref()
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| *d > 0.0),
        size_bytes: probe
            .format
            .size
            .as_deref()
            .and_then(|s| s.trim().parse::<u64>().ok()),
        bitrate_kbps: parse_bits_to_kbps(probe.format.bit_rate.as_deref()),
        streams,
        hdr,
    })
}

/// Run `<program> -version` and return the first line
pub fn tool_version(program: &str, timeout: Duration) -> EngineResult<String> {
    let output = run_capture(program, ["-version"], timeout)?;

    if !output.status.success() {
        return Err(EngineError::EncodeFailure {
            exit_code: output.status.code(),
            message: format!("{} -version failed with status: {}", program, output.status),
            details: output.stderr_lossy(),
        });
    }

    let version_output = output.stdout_lossy();
    let first_line = version_output.lines().next().unwrap_or("Unknown version");

    Ok(first_line.to_string())
}

pub fn ffmpeg_version(program: &str, timeout: Duration) -> EngineResult<String> {
    tool_version(program, timeout)
}

pub fn ffprobe_version(program: &str, timeout: Duration) -> EngineResult<String> {
    tool_version(program, timeout)
}

/// Check if ffmpeg has the libvmaf filter compiled in
pub fn vmaf_filter_available(program: &str, timeout: Duration) -> bool {
    match run_capture(program, ["-hide_banner", "-filters"], timeout) {
        Ok(out) if out.status.success() => out.stdout_lossy().contains("libvmaf"),
        _ => false,
    }
}

/// Probe a media file with ffprobe
pub fn probe_media(program: &str, path: &Path, timeout: Duration) -> EngineResult<MediaInfo> {
    let mut cmd = Command::new(program);
    cmd.arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(path);
    let output = run_capture_command(program, cmd, timeout)?;

    if !output.status.success() {
        return Err(EngineError::EncodeFailure {
            exit_code: output.status.code(),
            message: format!("ffprobe failed for {}", path.display()),
            details: output.stderr_lossy(),
        });
    }

    parse_ffprobe_json(&output.stdout_lossy()).map_err(|source| EngineError::Persistence {
        path: path.to_path_buf(),
        source,
    })
}
