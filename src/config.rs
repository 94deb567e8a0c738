// Global configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub benchmark: BenchmarkConfig,

    #[serde(default)]
    pub encode: EncodeConfig,

    #[serde(default)]
    pub paths: PathsConfig,
}

/// External executables, looked up on PATH unless absolute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,

    /// Upper bound for helper runs: ffprobe, `-version`, encoder and GPU
    /// listings
    #[serde(default = "default_tool_timeout")]
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Hard limit per capability trial
    #[serde(default = "default_probe_timeout")]
    pub trial_timeout_secs: u64,

    /// Frames encoded per trial
    #[serde(default = "default_probe_frames")]
    pub frames: u32,

    /// Synthetic input size
    #[serde(default = "default_probe_dimension")]
    pub width: u32,

    #[serde(default = "default_probe_dimension")]
    pub height: u32,

    #[serde(default = "default_probe_duration")]
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    #[serde(default = "default_benchmark_timeout")]
    pub trial_timeout_secs: u64,

    /// Shorter test media is rejected before any trial runs
    #[serde(default = "default_min_input_duration")]
    pub min_input_duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeConfig {
    /// Concurrent encode slots
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,

    /// Upper bound for one production encode; unset means no limit
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Minimum spacing between progress events
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// How long a cancelled encoder gets to exit before it is killed
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_ms: u64,

    /// Default overwrite setting (whether to overwrite existing output files)
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Overrides `<cache_dir>/ffbench` for the capability cache, benchmark
    /// history and synthetic probe input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_probe_frames() -> u32 {
    10
}

fn default_probe_dimension() -> u32 {
    256
}

fn default_probe_duration() -> f64 {
    0.5
}

fn default_benchmark_timeout() -> u64 {
    600
}

fn default_min_input_duration() -> f64 {
    1.0
}

fn default_max_workers() -> u32 {
    1
}

fn default_progress_interval() -> u64 {
    100
}

fn default_terminate_grace() -> u64 {
    3000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            probe_timeout_secs: default_tool_timeout(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            trial_timeout_secs: default_probe_timeout(),
            frames: default_probe_frames(),
            width: default_probe_dimension(),
            height: default_probe_dimension(),
            duration_secs: default_probe_duration(),
        }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            trial_timeout_secs: default_benchmark_timeout(),
            min_input_duration_secs: default_min_input_duration(),
        }
    }
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            timeout_secs: None,
            progress_interval_ms: default_progress_interval(),
            terminate_grace_ms: default_terminate_grace(),
            overwrite: false,
        }
    }
}

impl ToolsConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl ProbeConfig {
    pub fn trial_timeout(&self) -> Duration {
        Duration::from_secs(self.trial_timeout_secs)
    }
}

impl BenchmarkConfig {
    pub fn trial_timeout(&self) -> Duration {
        Duration::from_secs(self.trial_timeout_secs)
    }
}

impl EncodeConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

impl PathsConfig {
    /// Directory for caches and generated media
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::cache_dir()
                .context("Could not determine cache directory")?
                .join("ffbench")),
        }
    }

    pub fn capability_cache(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join("capabilities.json"))
    }

    pub fn benchmark_history(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join("benchmarks.json"))
    }

    /// Where the synthetic probe input lives
    pub fn media_dir(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join("media"))
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("ffbench")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("ffbench")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();

            // A read-only config directory is not fatal
            if let Err(e) = config.save() {
                tracing::warn!(error = %e, "Could not create default config file, using built-in defaults");
            }

            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }

    /// Create a default config file if it doesn't exist
    pub fn ensure_default() -> Result<()> {
        if !Self::exists() {
            let config = Config::default();
            config.save()?;
        }
        Ok(())
    }
}
