//! Streaming parser for ffmpeg's diagnostic output.
//!
//! The parser consumes raw stderr chunks (which may split lines anywhere and
//! use `\r` for in-place stats updates) and walks through
//! `AwaitingDuration -> StreamingProgress -> Terminal`. Field extraction is
//! driven by a [`FieldMatcher`] table so new tool output can be handled by
//! adding a row instead of touching the state machine.

use std::time::{Duration, Instant};

use super::types::{FailureKind, ProgressEvent};

/// Default minimum gap between two emitted progress events
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Reduced diagnostics never exceed this many characters
pub const MAX_DIAGNOSTIC_CHARS: usize = 300;

/// Case-insensitive keywords that mark a diagnostic line as an error
pub const ERROR_KEYWORDS: &[&str] = &[
    "error",
    "failed",
    "unknown",
    "invalid",
    "not found",
    "cannot find",
    "unrecognized",
    "no such",
];

/// Substrings meaning the requested encoder is not usable. They force a
/// failure even on exit code 0. Known to be brittle across ffmpeg releases.
pub const UNAVAILABLE_MARKERS: &[&str] = &[
    "unknown encoder",
    "encoder not found",
    "no nvenc capable devices found",
    "cannot load libcuda",
    "cannot load nvencodeapi",
    "openencodesessionex failed",
    "error initializing output stream",
    "device creation failed",
    "failed to initialise vaapi connection",
    "error creating a mfx session",
    "dll amfrt64.dll failed to open",
    "cannot create compression session",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingDuration,
    StreamingProgress,
    Terminal(Terminal),
}

/// Latest known value of every progress field
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressFields {
    pub elapsed_secs: Option<f64>,
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub speed: Option<f64>,
    pub bitrate_kbps: Option<f64>,
}

/// One row of the matcher table: a `key=value` key and how to apply its value.
/// `apply` returns false when the value could not be parsed (the last known
/// value is kept).
#[derive(Clone, Copy)]
pub struct FieldMatcher {
    pub key: &'static str,
    pub apply: fn(&mut ProgressFields, &str) -> bool,
}

impl std::fmt::Debug for FieldMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldMatcher").field("key", &self.key).finish()
    }
}

/// Parse "HH:MM:SS.frac" (optionally negative) or plain seconds
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let value = value.trim();
    let (negative, body) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };

    let mut total = 0.0;
    for part in body.split(':') {
        let n = part.parse::<f64>().ok()?;
        total = total * 60.0 + n;
    }
    if !total.is_finite() {
        return None;
    }
    Some(if negative { -total } else { total })
}

fn set_time(fields: &mut ProgressFields, value: &str) -> bool {
    match parse_timestamp(value) {
        Some(t) => {
            fields.elapsed_secs = Some(t);
            true
        }
        None => false,
    }
}

fn set_time_us(fields: &mut ProgressFields, value: &str) -> bool {
    match value.trim().parse::<i64>() {
        Ok(us) => {
            fields.elapsed_secs = Some(us as f64 / 1_000_000.0);
            true
        }
        Err(_) => false,
    }
}

fn set_frame(fields: &mut ProgressFields, value: &str) -> bool {
    match value.trim().parse::<u64>() {
        Ok(f) => {
            fields.frame = Some(f);
            true
        }
        Err(_) => false,
    }
}

fn set_fps(fields: &mut ProgressFields, value: &str) -> bool {
    match value.trim().parse::<f64>() {
        Ok(f) if f.is_finite() => {
            fields.fps = Some(f);
            true
        }
        _ => false,
    }
}

fn set_speed(fields: &mut ProgressFields, value: &str) -> bool {
    // "1.23x"
    match value.trim().trim_end_matches('x').parse::<f64>() {
        Ok(s) if s.is_finite() => {
            fields.speed = Some(s);
            true
        }
        _ => false,
    }
}

fn set_bitrate(fields: &mut ProgressFields, value: &str) -> bool {
    // "1234.5kbits/s"
    match value.trim().trim_end_matches("kbits/s").parse::<f64>() {
        Ok(b) if b.is_finite() => {
            fields.bitrate_kbps = Some(b);
            true
        }
        _ => false,
    }
}

fn mark_progress(_fields: &mut ProgressFields, _value: &str) -> bool {
    true
}

/// Keys understood out of the box: the human stats line
/// (`frame= 12 fps=30 ... time=00:00:01.00 bitrate=... speed=1.2x`) and
/// the `-progress` key/value protocol (`out_time_us=...`).
/// `out_time_ms` is in microseconds as well; ffmpeg has always mislabelled it.
pub const DEFAULT_FIELD_MATCHERS: &[FieldMatcher] = &[
    FieldMatcher { key: "time", apply: set_time },
    FieldMatcher { key: "out_time", apply: set_time },
    FieldMatcher { key: "out_time_us", apply: set_time_us },
    FieldMatcher { key: "out_time_ms", apply: set_time_us },
    FieldMatcher { key: "frame", apply: set_frame },
    FieldMatcher { key: "fps", apply: set_fps },
    FieldMatcher { key: "speed", apply: set_speed },
    FieldMatcher { key: "bitrate", apply: set_bitrate },
    FieldMatcher { key: "progress", apply: mark_progress },
];

/// Collapse `key=   value` into `key=value` so the stats line tokenizes on
/// whitespace
fn normalize_assignments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut after_eq = false;
    for c in line.chars() {
        if after_eq && c == ' ' {
            continue;
        }
        after_eq = c == '=';
        out.push(c);
    }
    out
}

/// "  Duration: 00:01:40.00, start: 0.000000, bitrate: 1234 kb/s"
fn parse_duration_announcement(line: &str) -> Option<f64> {
    let (_, rest) = line.split_once("Duration:")?;
    let value = rest.split(',').next()?.trim();
    parse_timestamp(value).filter(|d| *d > 0.0)
}

/// Reduce a full diagnostic transcript to a short, display-sized message.
///
/// Keeps the last two unique lines matching [`ERROR_KEYWORDS`], joined with
/// "; " and cut to [`MAX_DIAGNOSTIC_CHARS`]. Falls back to a generic message
/// naming the exit code.
pub fn summarize_diagnostics(text: &str, exit_code: Option<i32>) -> String {
    let mut picked: Vec<&str> = Vec::new();
    for line in text.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        if ERROR_KEYWORDS.iter().any(|k| lower.contains(k)) && !picked.contains(&line) {
            picked.push(line);
            if picked.len() == 2 {
                break;
            }
        }
    }

    if picked.is_empty() {
        return match exit_code {
            Some(code) => format!("encoding failed (exit code {})", code),
            None => "encoding failed (terminated by signal)".to_string(),
        };
    }

    picked.reverse();
    truncate_chars(&picked.join("; "), MAX_DIAGNOSTIC_CHARS)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Result of classifying a finished encode
#[derive(Debug, Clone, PartialEq)]
pub struct ParseVerdict {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureKind>,
    /// Reduced diagnostic (failures only)
    pub message: Option<String>,
    /// Every non-progress line seen
    pub details: String,
    pub elapsed_secs: f64,
    pub avg_fps: Option<f64>,
    pub avg_speed: Option<f64>,
}

#[derive(Debug)]
pub struct ProgressParser {
    state: ParserState,
    matchers: Vec<FieldMatcher>,
    unavailable_markers: Vec<String>,
    partial: Vec<u8>,
    fields: ProgressFields,
    duration_secs: Option<f64>,
    max_elapsed: f64,
    min_interval: Duration,
    last_emit: Option<Instant>,
    pending: bool,
    encoder_unavailable: bool,
    transcript: String,
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingDuration,
            matchers: DEFAULT_FIELD_MATCHERS.to_vec(),
            unavailable_markers: UNAVAILABLE_MARKERS.iter().map(|m| m.to_string()).collect(),
            partial: Vec::new(),
            fields: ProgressFields::default(),
            duration_secs: None,
            max_elapsed: 0.0,
            min_interval: DEFAULT_MIN_INTERVAL,
            last_emit: None,
            pending: false,
            encoder_unavailable: false,
            transcript: String::new(),
        }
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Seed the duration (e.g. from ffprobe) before any output arrives
    pub fn with_known_duration(mut self, duration_secs: Option<f64>) -> Self {
        if let Some(d) = duration_secs.filter(|d| *d > 0.0) {
            self.duration_secs = Some(d);
            self.state = ParserState::StreamingProgress;
        }
        self
    }

    pub fn add_matcher(&mut self, matcher: FieldMatcher) {
        self.matchers.push(matcher);
    }

    pub fn add_unavailable_marker(&mut self, marker: &str) {
        self.unavailable_markers.push(marker.to_lowercase());
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ParserState::Terminal(_))
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    /// Clamped media time: never decreases
    pub fn elapsed_secs(&self) -> f64 {
        self.max_elapsed
    }

    pub fn fields(&self) -> &ProgressFields {
        &self.fields
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn encoder_unavailable(&self) -> bool {
        self.encoder_unavailable
    }

    /// Feed a chunk using the current time for throttling
    pub fn feed(&mut self, chunk: &[u8]) -> Option<ProgressEvent> {
        self.feed_at(chunk, Instant::now())
    }

    /// Feed a chunk of raw output. Returns an event when fields changed and
    /// the throttle interval has passed since the previous event.
    pub fn feed_at(&mut self, chunk: &[u8], now: Instant) -> Option<ProgressEvent> {
        if self.is_terminal() {
            return None;
        }

        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                let line = std::mem::take(&mut self.partial);
                self.process_line(&String::from_utf8_lossy(&line));
            } else {
                self.partial.push(byte);
            }
        }

        self.maybe_emit(now)
    }

    /// Emit whatever is pending, ignoring the throttle
    pub fn flush(&mut self) -> Option<ProgressEvent> {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.process_line(&String::from_utf8_lossy(&line));
        }
        if self.pending {
            self.pending = false;
            self.last_emit = Some(Instant::now());
            Some(self.snapshot())
        } else {
            None
        }
    }

    fn maybe_emit(&mut self, now: Instant) -> Option<ProgressEvent> {
        if !self.pending {
            return None;
        }
        let due = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        };
        if due {
            self.pending = false;
            self.last_emit = Some(now);
            Some(self.snapshot())
        } else {
            None
        }
    }

    /// Current progress as an event (latest values, no averaging)
    pub fn snapshot(&self) -> ProgressEvent {
        let elapsed = self.max_elapsed;
        let percent = self
            .duration_secs
            .map(|d| (elapsed / d * 100.0).clamp(0.0, 100.0));
        let eta_secs = match (self.duration_secs, self.fields.speed) {
            (Some(d), Some(speed)) if speed > 0.0 => Some((d - elapsed).max(0.0) / speed),
            _ => None,
        };
        ProgressEvent {
            elapsed_secs: elapsed,
            speed: self.fields.speed,
            fps: self.fields.fps,
            bitrate_kbps: self.fields.bitrate_kbps,
            frame: self.fields.frame,
            percent,
            eta_secs,
        }
    }

    fn process_line(&mut self, raw: &str) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }

        if let Some(duration) = parse_duration_announcement(line) {
            if self.duration_secs.is_none() {
                self.duration_secs = Some(duration);
            }
            self.state = ParserState::StreamingProgress;
        }

        let normalized = normalize_assignments(line);
        let mut matched = false;
        for token in normalized.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            if let Some(m) = self.matchers.iter().find(|m| m.key == key) {
                if (m.apply)(&mut self.fields, value) {
                    matched = true;
                }
            }
        }

        if matched {
            if let Some(t) = self.fields.elapsed_secs {
                self.max_elapsed = self.max_elapsed.max(t);
            }
            self.pending = true;
            self.state = ParserState::StreamingProgress;
            return;
        }

        let lower = line.to_lowercase();
        if self
            .unavailable_markers
            .iter()
            .any(|m| lower.contains(m.as_str()))
        {
            self.encoder_unavailable = true;
        }
        self.transcript.push_str(line);
        self.transcript.push('\n');
    }

    /// Move to the terminal state and classify the run.
    ///
    /// Exit code 0 is success unless an encoder-unavailable marker was seen.
    pub fn finish(&mut self, exit_code: Option<i32>) -> ParseVerdict {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.process_line(&String::from_utf8_lossy(&line));
        }

        let success = exit_code == Some(0) && !self.encoder_unavailable;
        self.state = ParserState::Terminal(if success {
            Terminal::Success
        } else {
            Terminal::Failure
        });

        let (failure, message) = if success {
            (None, None)
        } else if self.encoder_unavailable {
            (
                Some(FailureKind::EncoderUnavailable),
                Some(summarize_diagnostics(&self.transcript, exit_code)),
            )
        } else {
            (
                Some(FailureKind::ExitCode),
                Some(summarize_diagnostics(&self.transcript, exit_code)),
            )
        };

        ParseVerdict {
            success,
            exit_code,
            failure,
            message,
            details: self.transcript.clone(),
            elapsed_secs: self.max_elapsed,
            avg_fps: self.fields.fps,
            avg_speed: self.fields.speed,
        }
    }
}
