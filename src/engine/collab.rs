//! Collaborators the engine consumes as black boxes: metadata probing,
//! quality metrics and test-media download.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::SyncSender;
use std::time::Duration;
use tracing::debug;

use super::core::{MediaInfo, probe_media, summarize_diagnostics, vmaf_filter_available};
use super::error::{EngineError, EngineResult};
use super::supervisor::run_capture_command;
use crate::config::ToolsConfig;

/// Static file information (container, duration, streams, HDR)
pub trait MetadataProbe {
    fn probe(&self, path: &Path) -> EngineResult<MediaInfo>;
}

/// ffprobe-backed [`MetadataProbe`]
#[derive(Debug, Clone)]
pub struct FfprobeMetadata {
    program: String,
    timeout: Duration,
}

impl FfprobeMetadata {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            program: tools.ffprobe.clone(),
            timeout: tools.probe_timeout(),
        }
    }
}

impl MetadataProbe for FfprobeMetadata {
    fn probe(&self, path: &Path) -> EngineResult<MediaInfo> {
        probe_media(&self.program, path, self.timeout)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    /// Average PSNR in dB (`inf` for identical inputs)
    #[serde(default, with = "psnr_value")]
    pub psnr: Option<f64>,
    /// SSIM "All" score, 0..1
    pub ssim: Option<f64>,
    pub vmaf: Option<f64>,
}

/// JSON has no infinity, so a lossless PSNR is stored as the string "inf"
mod psnr_value {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stored {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) if *v == f64::INFINITY => serializer.serialize_str("inf"),
            other => other.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        match Option::<Stored>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Stored::Number(v)) => Ok(Some(v)),
            Some(Stored::Text(t)) if t == "inf" => Ok(Some(f64::INFINITY)),
            Some(Stored::Text(t)) => Err(D::Error::custom(format!("invalid PSNR value {:?}", t))),
        }
    }
}

/// Compares an encode against its reference. Runs after an encode
/// succeeded, never inside the encode pipeline.
pub trait QualityMetric {
    fn measure(&self, reference: &Path, encoded: &Path) -> EngineResult<QualityScores>;
}

/// PSNR/SSIM (and VMAF when libvmaf is compiled in) through ffmpeg's filters
#[derive(Debug, Clone)]
pub struct FfmpegQualityMetric {
    program: String,
    include_vmaf: bool,
    timeout: Duration,
}

impl FfmpegQualityMetric {
    /// `timeout` bounds one comparison; comparing a long clip can take as
    /// long as encoding it
    pub fn new(tools: &ToolsConfig, timeout: Duration) -> Self {
        Self {
            include_vmaf: vmaf_filter_available(&tools.ffmpeg, tools.probe_timeout()),
            program: tools.ffmpeg.clone(),
            timeout,
        }
    }

    pub fn without_vmaf(mut self) -> Self {
        self.include_vmaf = false;
        self
    }

    /// Filtergraph for inputs `[0:v]` = encoded, `[1:v]` = reference. The
    /// encoded leg is scaled to the reference size first.
    pub fn filtergraph(include_vmaf: bool) -> String {
        let legs = if include_vmaf { 3 } else { 2 };
        let labels = |prefix: &str| {
            (0..legs)
                .map(|i| format!("[{}{}]", prefix, i))
                .collect::<String>()
        };

        let mut graph = format!(
            "[0:v][1:v]scale2ref=flags=bicubic[dist][ref];\
             [dist]format=yuv420p,split={legs}{d};\
             [ref]format=yuv420p,split={legs}{r};\
             [d0][r0]psnr;[d1][r1]ssim",
            legs = legs,
            d = labels("d"),
            r = labels("r"),
        );
        if include_vmaf {
            graph.push_str(";[d2][r2]libvmaf");
        }
        graph
    }

    pub fn build_cmd(&self, reference: &Path, encoded: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-hide_banner", "-nostdin"])
            .arg("-i")
            .arg(encoded)
            .arg("-i")
            .arg(reference)
            .arg("-lavfi")
            .arg(Self::filtergraph(self.include_vmaf))
            .args(["-f", "null", "-"]);
        cmd
    }
}

fn number_after(line: &str, marker: &str) -> Option<f64> {
    let (_, rest) = line.split_once(marker)?;
    let token = rest.split_whitespace().next()?;
    match token {
        "inf" => Some(f64::INFINITY),
        t => t.parse::<f64>().ok(),
    }
}

/// Pull the summary values out of the filters' stderr output:
///
/// ```text
/// [Parsed_psnr_3 @ 0x..] PSNR y:41.2 u:44.0 v:44.1 average:42.01 min:39.8 max:45.3
/// [Parsed_ssim_4 @ 0x..] SSIM Y:0.981 (17.2) U:0.99 (20.1) V:0.99 (20.3) All:0.985 (18.2)
/// [Parsed_libvmaf_5 @ 0x..] VMAF score: 94.718
/// ```
pub fn parse_quality_summary(stderr: &str) -> QualityScores {
    let mut scores = QualityScores::default();
    for line in stderr.lines() {
        if line.contains(" PSNR ") {
            scores.psnr = number_after(line, "average:").or(scores.psnr);
        } else if line.contains(" SSIM ") {
            scores.ssim = number_after(line, "All:").or(scores.ssim);
        } else if line.contains("VMAF score") {
            scores.vmaf = number_after(line, "VMAF score:")
                .or_else(|| number_after(line, "VMAF score ="))
                .or(scores.vmaf);
        }
    }
    scores
}

impl QualityMetric for FfmpegQualityMetric {
    fn measure(&self, reference: &Path, encoded: &Path) -> EngineResult<QualityScores> {
        let output =
            run_capture_command(&self.program, self.build_cmd(reference, encoded), self.timeout)?;
        let stderr = output.stderr_lossy();

        if !output.status.success() {
            return Err(EngineError::EncodeFailure {
                exit_code: output.status.code(),
                message: summarize_diagnostics(&stderr, output.status.code()),
                details: stderr,
            });
        }

        let scores = parse_quality_summary(&stderr);
        debug!(
            reference = %reference.display(),
            encoded = %encoded.display(),
            psnr = scores.psnr,
            ssim = scores.ssim,
            vmaf = scores.vmaf,
            "Quality measured"
        );
        Ok(scores)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub received_bytes: u64,
    pub total_bytes: Option<u64>,
}

/// Fetches benchmark test media. Kept outside the engine proper; the
/// scheduler only ever sees the resulting local path.
pub trait Downloader {
    fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: Option<&SyncSender<DownloadProgress>>,
    ) -> EngineResult<PathBuf>;
}
