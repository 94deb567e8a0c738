use clap::{Args, Parser, Subcommand};
use ffbench::engine::{AccelerationChoice, CodecId};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ffbench")]
#[command(
    about = "Supervised ffmpeg encodes, hardware encoder probing and codec benchmarks",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Use this config file instead of the default location
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check if ffmpeg and ffprobe are installed
    CheckFfmpeg,

    /// Test every codec/accelerator pair with short trial encodes and cache the result
    Probe {
        /// Per-trial timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Probe with this file instead of the generated test pattern
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,
    },

    /// Show the cached capability matrix without probing
    Capabilities,

    /// Benchmark available codec/accelerator pairs on a real test file
    Benchmark {
        /// Test media to encode
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        /// Only these pairs, as codec:accel (e.g. hevc:nvidia). Defaults to all available.
        #[arg(long = "select", value_name = "CODEC:ACCEL", value_parser = parse_selector)]
        select: Vec<(CodecId, AccelerationChoice)>,

        /// Per-trial timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Do not append the run to the benchmark history
        #[arg(long)]
        no_save: bool,

        /// Score each completed trial against the input (PSNR, SSIM, VMAF if available)
        #[arg(long)]
        quality: bool,
    },

    /// Run one supervised encode with live progress
    Encode(EncodeArgs),

    /// Show the ffmpeg command an encode would run, without running it
    DryRun(EncodeArgs),

    /// Show config status and location, or create default config if missing
    InitConfig,
}

#[derive(Args, Debug, Clone)]
pub struct EncodeArgs {
    /// Source media
    pub input: PathBuf,

    /// Destination file; the extension picks the container
    pub output: PathBuf,

    /// Target codec (h264, hevc, av1, vp9, aac, opus, mp3, flac, png, jpeg, webp)
    #[arg(long)]
    pub codec: Option<CodecId>,

    /// Built-in preset id (e.g. h264-fast, av1-small)
    #[arg(long)]
    pub preset: Option<String>,

    /// Constant rate factor
    #[arg(long)]
    pub crf: Option<u32>,

    /// Video bitrate in kbps (overrides --crf)
    #[arg(long, value_name = "KBPS")]
    pub bitrate: Option<u32>,

    /// Target output size, e.g. 25M or 800K (overrides --bitrate and --crf)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub target_size: Option<u64>,

    /// Hardware acceleration (none, nvidia, amd, intel, apple)
    #[arg(long, default_value = "none")]
    pub accel: AccelerationChoice,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    #[arg(long)]
    pub fps: Option<f64>,

    /// Audio bitrate in kbps
    #[arg(long, value_name = "KBPS")]
    pub audio_bitrate: Option<u32>,

    /// Drop audio streams
    #[arg(long)]
    pub no_audio: bool,

    /// Only encode the first N seconds
    #[arg(long, value_name = "SECS")]
    pub max_duration: Option<f64>,

    /// Extra ffmpeg arguments, split shell-style
    #[arg(long, value_name = "ARGS", allow_hyphen_values = true)]
    pub extra: Option<String>,

    /// Replace the output file if it exists
    #[arg(long)]
    pub overwrite: bool,
}

/// "hevc:nvidia" -> (Hevc, Nvidia); a bare codec means software
pub fn parse_selector(value: &str) -> Result<(CodecId, AccelerationChoice), String> {
    let (codec, accel) = value.split_once(':').unwrap_or((value, "none"));
    Ok((codec.parse()?, accel.parse()?))
}

/// "25M" -> 26214400; plain numbers are bytes
pub fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let (number, multiplier) = match value.char_indices().last() {
        Some((i, 'k' | 'K')) => (&value[..i], 1024u64),
        Some((i, 'm' | 'M')) => (&value[..i], 1024 * 1024),
        Some((i, 'g' | 'G')) => (&value[..i], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    let number: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{}'", value))?;
    if !number.is_finite() || number <= 0.0 {
        return Err(format!("size must be positive, got '{}'", value));
    }
    Ok((number * multiplier as f64) as u64)
}

pub fn parse() -> Cli {
    Cli::parse()
}
