mod ffmpeg_cmd;
mod ffmpeg_info;
pub mod log;
mod preset;
mod progress;
mod state;
mod types;

pub use ffmpeg_cmd::{
    BuildNotice, BuiltCommand, CommandBuilder, DEFAULT_AUDIO_KBPS, EncoderFamily,
    MIN_TARGET_VIDEO_KBPS, build_command, encoder_for, hardware_encoder, muxer_for,
    split_extra_args, target_video_bitrate_kbps,
};
pub use ffmpeg_info::{
    MediaInfo, StreamInfo, StreamKind, ffmpeg_version, ffprobe_version, parse_ffprobe_json,
    probe_media, tool_version, vmaf_filter_available,
};
pub use log::{default_log_path, init_logging};
pub use preset::{Preset, PresetCatalog, SpeedTier};
pub use progress::{
    DEFAULT_FIELD_MATCHERS, DEFAULT_MIN_INTERVAL, ERROR_KEYWORDS, FieldMatcher,
    MAX_DIAGNOSTIC_CHARS, ParseVerdict, ParserState, ProgressFields, ProgressParser, Terminal,
    UNAVAILABLE_MARKERS, parse_timestamp, summarize_diagnostics,
};
pub use state::{load_json, save_json_atomic, temp_sibling, write_atomic};
pub use types::{
    AccelerationChoice, CodecId, CodecKind, EncodeJob, EncodeOutcome, EncodeRequest, FailureKind,
    JobStatus, ProgressEvent, QualityKnobs, RateControl,
};
