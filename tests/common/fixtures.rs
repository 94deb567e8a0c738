use chrono::Utc;
use ffbench::config::{EncodeConfig, ToolsConfig};
use ffbench::engine::capability::CapabilityEntry;
use ffbench::engine::hardware::{GpuVendor, SystemSnapshot};
use ffbench::engine::{AccelerationChoice, CodecId, MediaInfo, StreamInfo, StreamKind, encoder_for};

/// Tools config pointing at `ffmpeg`; ffprobe is never run in these tests
pub fn tools(ffmpeg: &str) -> ToolsConfig {
    ToolsConfig {
        ffmpeg: ffmpeg.to_string(),
        ffprobe: "ffbench-test-no-ffprobe".to_string(),
        probe_timeout_secs: 5,
    }
}

/// Unthrottled progress and a short cancellation grace
pub fn fast_encode_config() -> EncodeConfig {
    EncodeConfig {
        progress_interval_ms: 0,
        terminate_grace_ms: 500,
        ..EncodeConfig::default()
    }
}

pub fn video_media(duration_secs: f64) -> MediaInfo {
    MediaInfo {
        container: Some("y4m".into()),
        duration_secs: Some(duration_secs),
        size_bytes: Some(1 << 20),
        bitrate_kbps: None,
        streams: vec![StreamInfo {
            kind: StreamKind::Video,
            codec: Some("rawvideo".into()),
            width: Some(256),
            height: Some(256),
            bitrate_kbps: None,
            frame_rate: Some(25.0),
        }],
        hdr: false,
    }
}

pub fn snapshot() -> SystemSnapshot {
    SystemSnapshot {
        captured_at: Utc::now(),
        os: Some("Linux".into()),
        kernel: None,
        cpu_brand: "Test CPU".into(),
        logical_cores: 4,
        total_memory_bytes: 8 << 30,
        gpu_vendor: GpuVendor::Unknown,
        gpu_model: None,
        ffmpeg_version: None,
    }
}

/// Cache entry as a probe would have recorded it
pub fn entry(codec: CodecId, acceleration: AccelerationChoice, available: bool) -> CapabilityEntry {
    CapabilityEntry {
        codec,
        acceleration,
        encoder: encoder_for(codec, acceleration).map(str::to_string),
        available,
        listed: None,
        probed_at: Utc::now(),
        duration_ms: 40,
        error: None,
    }
}
