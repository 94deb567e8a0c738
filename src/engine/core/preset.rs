use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::types::CodecId;

/// Encoder effort level. Each encoder family spells this differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedTier {
    Fast,
    #[default]
    Balanced,
    Quality,
}

impl fmt::Display for SpeedTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpeedTier::Fast => "fast",
            SpeedTier::Balanced => "balanced",
            SpeedTier::Quality => "quality",
        })
    }
}

impl FromStr for SpeedTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(SpeedTier::Fast),
            "balanced" | "medium" => Ok(SpeedTier::Balanced),
            "quality" | "slow" => Ok(SpeedTier::Quality),
            other => Err(format!("unknown speed tier '{}'", other)),
        }
    }
}

/// Preset-level defaults, the middle layer between codec structural
/// defaults and request overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub codec: CodecId,
    #[serde(default)]
    pub speed: SpeedTier,
    #[serde(default)]
    pub crf: Option<u32>,
    #[serde(default)]
    pub bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub audio_bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub extra_args: String,
}

impl Preset {
    fn builtin(id: &str, name: &str, codec: CodecId, speed: SpeedTier) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            codec,
            speed,
            crf: None,
            bitrate_kbps: None,
            audio_bitrate_kbps: None,
            extra_args: String::new(),
        }
    }

    pub fn builtins() -> Vec<Preset> {
        vec![
            Preset {
                crf: Some(23),
                audio_bitrate_kbps: Some(128),
                ..Preset::builtin("h264-fast", "H.264 Fast", CodecId::H264, SpeedTier::Fast)
            },
            Preset {
                crf: Some(18),
                audio_bitrate_kbps: Some(192),
                extra_args: "-movflags +faststart".to_string(),
                ..Preset::builtin(
                    "h264-quality",
                    "H.264 Quality",
                    CodecId::H264,
                    SpeedTier::Quality,
                )
            },
            Preset {
                crf: Some(24),
                audio_bitrate_kbps: Some(160),
                ..Preset::builtin(
                    "hevc-archive",
                    "HEVC Archive",
                    CodecId::Hevc,
                    SpeedTier::Quality,
                )
            },
            Preset {
                crf: Some(35),
                audio_bitrate_kbps: Some(96),
                ..Preset::builtin("av1-small", "AV1 Small", CodecId::Av1, SpeedTier::Balanced)
            },
            Preset {
                crf: Some(33),
                audio_bitrate_kbps: Some(128),
                ..Preset::builtin("vp9-web", "VP9 Web", CodecId::Vp9, SpeedTier::Balanced)
            },
            Preset {
                bitrate_kbps: Some(256),
                ..Preset::builtin("aac-music", "AAC Music", CodecId::Aac, SpeedTier::Balanced)
            },
            Preset {
                bitrate_kbps: Some(48),
                ..Preset::builtin("opus-voice", "Opus Voice", CodecId::Opus, SpeedTier::Balanced)
            },
            Preset::builtin("png-still", "PNG Still", CodecId::Png, SpeedTier::Balanced),
            Preset {
                crf: Some(10),
                ..Preset::builtin("jpeg-thumb", "JPEG Thumbnail", CodecId::Jpeg, SpeedTier::Fast)
            },
        ]
    }
}

/// Lookup of presets by id. User presets shadow built-ins with the same id.
#[derive(Debug, Clone)]
pub struct PresetCatalog {
    presets: BTreeMap<String, Preset>,
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetCatalog {
    pub fn builtin() -> Self {
        Self::empty().with_presets(Preset::builtins())
    }

    pub fn empty() -> Self {
        Self {
            presets: BTreeMap::new(),
        }
    }

    pub fn with_presets(mut self, presets: impl IntoIterator<Item = Preset>) -> Self {
        for preset in presets {
            self.insert(preset);
        }
        self
    }

    pub fn insert(&mut self, preset: Preset) {
        self.presets.insert(preset.id.to_ascii_lowercase(), preset);
    }

    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.get(&id.trim().to_ascii_lowercase())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}
