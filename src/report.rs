// Human-readable rendering of sizes, progress, capability matrices and
// benchmark runs

use std::fmt::Write as _;

use crate::engine::benchmark::{BenchmarkRun, TrialStatus};
use crate::engine::capability::CapabilityMatrix;
use crate::engine::collab::QualityScores;
use crate::engine::core::{AccelerationChoice, CodecId, ProgressEvent};
use crate::engine::reduce::Podium;

/// Format bytes as human-readable size
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration in seconds as human-readable time
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        return format!("{:.1}s", seconds.max(0.0));
    }
    let total_secs = seconds as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m {}s", minutes, secs)
    }
}

/// Media timestamp as HH:MM:SS.cc
pub fn format_timestamp(seconds: f64) -> String {
    let centis = (seconds.max(0.0) * 100.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02}.{:02}",
        centis / 360_000,
        (centis / 6000) % 60,
        (centis / 100) % 60,
        centis % 100
    )
}

/// One status line for a live encode
pub fn format_progress(event: &ProgressEvent) -> String {
    let mut line = match event.percent {
        Some(pct) => format!("{:5.1}%  ", pct),
        None => String::new(),
    };
    let _ = write!(line, "time {}", format_timestamp(event.elapsed_secs));
    if let Some(fps) = event.fps {
        let _ = write!(line, "  fps {:.1}", fps);
    }
    if let Some(speed) = event.speed {
        let _ = write!(line, "  speed {:.2}x", speed);
    }
    if let Some(kbps) = event.bitrate_kbps {
        let _ = write!(line, "  {:.0} kbps", kbps);
    }
    if let Some(eta) = event.eta_secs {
        let _ = write!(line, "  eta {}", format_duration(eta));
    }
    line
}

fn capability_cell(matrix: &CapabilityMatrix, codec: CodecId, accel: AccelerationChoice) -> &'static str {
    match matrix.get(codec, accel) {
        None => "?",
        Some(entry) if entry.encoder.is_none() => "-",
        Some(entry) if entry.available => "yes",
        Some(_) => "no",
    }
}

/// Codec x acceleration grid: `yes`, `no`, `-` (no encoder for the pair),
/// `?` (not probed)
pub fn capability_table(matrix: &CapabilityMatrix) -> String {
    let mut out = format!("{:<6}", "codec");
    for accel in AccelerationChoice::ALL {
        let _ = write!(out, " {:>8}", accel.id());
    }
    for codec in CodecId::VIDEO {
        let _ = write!(out, "\n{:<6}", codec.id());
        for accel in AccelerationChoice::ALL {
            let _ = write!(out, " {:>8}", capability_cell(matrix, codec, accel));
        }
    }
    out
}

/// Capability grid followed by the "last probed" line and any trial errors
pub fn capability_report(matrix: &CapabilityMatrix) -> String {
    let mut out = capability_table(matrix);
    match matrix.last_probed() {
        Some(at) => {
            let _ = write!(
                out,
                "\n\nLast probed at {}",
                at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
            );
        }
        None => out.push_str("\n\nNever probed. Run `ffbench probe`."),
    }
    let errors: Vec<_> = matrix
        .entries()
        .iter()
        .filter(|e| !e.available && e.encoder.is_some())
        .filter_map(|e| e.error.as_deref().map(|err| (e, err)))
        .collect();
    if !errors.is_empty() {
        out.push_str("\n\nUnavailable:");
        for (entry, err) in errors {
            let _ = write!(
                out,
                "\n  {}/{} ({}): {}",
                entry.codec,
                entry.acceleration,
                entry.encoder.as_deref().unwrap_or("-"),
                err
            );
        }
    }
    out
}

/// One-line quality summary; identical streams show as lossless
pub fn format_quality(scores: &QualityScores) -> String {
    let mut parts = Vec::new();
    match scores.psnr {
        Some(psnr) if psnr.is_infinite() => parts.push("PSNR lossless".to_string()),
        Some(psnr) => parts.push(format!("PSNR {:.2} dB", psnr)),
        None => {}
    }
    if let Some(ssim) = scores.ssim {
        parts.push(format!("SSIM {:.4}", ssim));
    }
    if let Some(vmaf) = scores.vmaf {
        parts.push(format!("VMAF {:.2}", vmaf));
    }
    if parts.is_empty() {
        "no scores".to_string()
    } else {
        parts.join("  ")
    }
}

fn opt<T>(value: Option<T>, render: impl Fn(T) -> String) -> String {
    value.map(render).unwrap_or_else(|| "-".to_string())
}

/// Per-trial table plus the reducer's picks
pub fn benchmark_report(run: &BenchmarkRun) -> String {
    let mut out = format!(
        "Benchmark {} on {} ({})\n",
        run.id,
        run.media.path.display(),
        format_duration(run.media.duration_secs)
    );
    let _ = writeln!(
        out,
        "{:>2}  {:<5} {:<7} {:<20} {:<8} {:>8} {:>10} {:>7} {:>7} {:>9}",
        "#", "codec", "accel", "encoder", "status", "wall", "size", "fps", "speed", "kbps"
    );

    for (i, trial) in run.trials.iter().enumerate() {
        let o = &trial.outcome;
        let status = match trial.status {
            TrialStatus::Complete => "ok",
            TrialStatus::Failed => "FAILED",
            TrialStatus::Pending => "pending",
            TrialStatus::Running => "running",
        };
        let _ = writeln!(
            out,
            "{:>2}  {:<5} {:<7} {:<20} {:<8} {:>8} {:>10} {:>7} {:>7} {:>9}",
            i + 1,
            trial.entry.codec.id(),
            trial.entry.acceleration.id(),
            trial.encoder.as_deref().unwrap_or("-"),
            status,
            format_duration(o.wall_clock_secs),
            opt(o.file_size_bytes, format_bytes),
            opt(o.avg_fps, |v| format!("{:.1}", v)),
            opt(o.avg_speed, |v| format!("{:.2}x", v)),
            opt(trial.throughput_kbps, |v| format!("{:.0}", v)),
        );
        if let Some(err) = o.error.as_deref().filter(|_| trial.status == TrialStatus::Failed) {
            let _ = writeln!(out, "      {}", err);
        }
        if let Some(scores) = &trial.quality {
            let _ = writeln!(out, "      {}", format_quality(scores));
        }
    }

    if run.cancelled {
        out.push_str("Run cancelled; remaining entries were not run.\n");
    }

    let podium = Podium::of(&run.outcomes());
    if podium.is_empty() {
        out.push_str("No successful trials.");
        return out;
    }
    let name = |idx: Option<usize>| {
        idx.and_then(|i| run.trials.get(i))
            .map(|t| format!("{}/{}", t.entry.codec, t.entry.acceleration))
            .unwrap_or_else(|| "-".to_string())
    };
    let _ = write!(
        out,
        "Fastest: {}\nHighest fps: {}\nMost efficient: {}",
        name(podium.speed),
        name(podium.fps),
        name(podium.efficiency)
    );
    out
}
