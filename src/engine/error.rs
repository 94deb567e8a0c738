//! Error taxonomy for the orchestration engine.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The executable could not be located on PATH.
    #[error("'{tool}' was not found. Is it installed and in PATH?")]
    ToolNotFound { tool: String },

    /// The OS refused to spawn the process (permissions, pipes, resource limits).
    #[error("Failed to launch '{tool}': {source}")]
    LaunchFailure {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Trial timed out after {}s", .after.as_secs_f64())]
    TrialTimeout { after: Duration },

    /// Non-zero exit (or an encoder-unavailable notice) after a successful launch.
    /// `message` is the reduced diagnostic, `details` the full captured text.
    #[error("{message}")]
    EncodeFailure {
        exit_code: Option<i32>,
        message: String,
        details: String,
    },

    #[error("Invalid encode request: {0}")]
    InvalidRequest(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to read or write {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Map a spawn error to the launch taxonomy: a missing executable is
    /// reported separately from any other refusal.
    pub fn from_spawn(tool: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            EngineError::ToolNotFound {
                tool: tool.to_string(),
            }
        } else {
            EngineError::LaunchFailure {
                tool: tool.to_string(),
                source: err,
            }
        }
    }

    pub fn is_tool_missing(&self) -> bool {
        matches!(self, EngineError::ToolNotFound { .. })
    }

    /// Errors raised before the external process ever ran.
    pub fn is_launch_error(&self) -> bool {
        matches!(
            self,
            EngineError::ToolNotFound { .. } | EngineError::LaunchFailure { .. }
        )
    }

    /// Full diagnostic text for an expandable "technical details" view.
    pub fn details(&self) -> Option<&str> {
        match self {
            EngineError::EncodeFailure { details, .. } => Some(details.as_str()),
            _ => None,
        }
    }
}
