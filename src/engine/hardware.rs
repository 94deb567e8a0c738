//! Host hardware detection: GPU vendor/model, the encoders compiled into
//! the local ffmpeg build, and the system snapshot attached to benchmarks.
//!
//! None of this decides availability. It only annotates the empirical probe
//! results and benchmark runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use sysinfo::System;
use tracing::debug;

use super::core::{AccelerationChoice, ffmpeg_version};
use super::error::EngineResult;
use super::supervisor::run_capture;

/// Detected GPU vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    #[default]
    Unknown,
    Intel,
    Nvidia,
    Amd,
    Apple,
}

impl GpuVendor {
    /// Acceleration family that usually matches this vendor
    pub fn suggested_acceleration(&self) -> AccelerationChoice {
        match self {
            GpuVendor::Unknown => AccelerationChoice::None,
            GpuVendor::Intel => AccelerationChoice::Intel,
            GpuVendor::Nvidia => AccelerationChoice::Nvidia,
            GpuVendor::Amd => AccelerationChoice::Amd,
            GpuVendor::Apple => AccelerationChoice::Apple,
        }
    }
}

/// Detect NVIDIA GPU using nvidia-smi
pub fn detect_nvidia_gpu(timeout: Duration) -> Option<String> {
    let output = run_capture(
        "nvidia-smi",
        ["--query-gpu=name", "--format=csv,noheader"],
        timeout,
    )
    .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = output.stdout_lossy();
    let name = stdout.lines().next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// First display controller in `lspci` output
pub fn parse_lspci_gpu(lspci: &str) -> Option<(GpuVendor, String)> {
    for line in lspci.lines() {
        let lower = line.to_lowercase();
        if !(lower.contains("vga") || lower.contains("display") || lower.contains("3d")) {
            continue;
        }

        let vendor = if lower.contains("nvidia") {
            GpuVendor::Nvidia
        } else if lower.contains("intel") {
            GpuVendor::Intel
        } else if lower.contains("amd")
            || lower.contains("radeon")
            || lower.contains("advanced micro devices")
        {
            GpuVendor::Amd
        } else {
            GpuVendor::Unknown
        };

        // "00:02.0 VGA compatible controller: Intel Corporation ..." -> model
        let model = line
            .split_once(": ")
            .map(|(_, m)| m.trim())
            .unwrap_or(line)
            .to_string();
        return Some((vendor, model));
    }
    None
}

fn detect_lspci_gpu(timeout: Duration) -> Option<(GpuVendor, String)> {
    let output = run_capture("lspci", std::iter::empty::<&str>(), timeout).ok()?;
    parse_lspci_gpu(&output.stdout_lossy())
}

/// Detect the primary GPU vendor and model
/// Each helper command gets at most `timeout`.
pub fn detect_gpu(timeout: Duration) -> (GpuVendor, Option<String>) {
    if cfg!(target_os = "macos") {
        return (GpuVendor::Apple, None);
    }

    // nvidia-smi is the more specific source
    if let Some(model) = detect_nvidia_gpu(timeout) {
        return (GpuVendor::Nvidia, Some(model));
    }

    match detect_lspci_gpu(timeout) {
        Some((vendor, model)) => (vendor, Some(model)),
        None => (GpuVendor::Unknown, None),
    }
}

/// Encoders compiled into an ffmpeg build (`ffmpeg -encoders`).
///
/// Informational only: a listed hardware encoder still fails without the
/// device or driver behind it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderListing {
    names: BTreeSet<String>,
}

impl EncoderListing {
    /// Parse the table that follows the ` ------` separator line
    pub fn parse(output: &str) -> Self {
        let names = output
            .lines()
            .skip_while(|l| !l.trim_start().starts_with("---"))
            .skip(1)
            .filter_map(|line| {
                let mut cols = line.split_whitespace();
                let flags = cols.next()?;
                let name = cols.next()?;
                (flags.len() == 6).then(|| name.to_string())
            })
            .collect();
        Self { names }
    }

    pub fn query(program: &str, timeout: Duration) -> EngineResult<Self> {
        let output = run_capture(program, ["-hide_banner", "-encoders"], timeout)?;
        let listing = Self::parse(&output.stdout_lossy());
        debug!(program, count = listing.len(), "Queried encoder listing");
        Ok(listing)
    }

    pub fn contains(&self, encoder: &str) -> bool {
        self.names.contains(encoder)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Host description stored with each benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub captured_at: DateTime<Utc>,
    pub os: Option<String>,
    pub kernel: Option<String>,
    pub cpu_brand: String,
    pub logical_cores: usize,
    pub total_memory_bytes: u64,
    pub gpu_vendor: GpuVendor,
    pub gpu_model: Option<String>,
    pub ffmpeg_version: Option<String>,
}

impl SystemSnapshot {
    /// `timeout` bounds each helper command (GPU listing, ffmpeg version)
    pub fn capture(ffmpeg_program: &str, timeout: Duration) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let (gpu_vendor, gpu_model) = detect_gpu(timeout);

        Self {
            captured_at: Utc::now(),
            os: System::long_os_version(),
            kernel: System::kernel_version(),
            cpu_brand: system.global_cpu_info().brand().trim().to_string(),
            logical_cores: system.cpus().len(),
            total_memory_bytes: system.total_memory(),
            gpu_vendor,
            gpu_model,
            ffmpeg_version: ffmpeg_version(ffmpeg_program, timeout).ok(),
        }
    }
}
