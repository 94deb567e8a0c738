// Progress parser fed the way the supervisor feeds it: arbitrary chunks

use ffbench::engine::{
    FailureKind, FieldMatcher, ParserState, ProgressFields, ProgressParser, Terminal,
};
use proptest::prelude::*;
use std::time::Duration;

const TRANSCRIPT: &str = "ffmpeg version 7.0 Copyright (c) 2000-2024 the FFmpeg developers\n\
Input #0, matroska,webm, from 'clip.mkv':\n\
  Duration: 00:00:40.00, start: 0.000000, bitrate: 5000 kb/s\n\
Stream mapping:\n\
  Stream #0:0 -> #0:0 (h264 (native) -> hevc (libx265))\n\
frame=  100 fps= 50.0 q=28.0 size=     256kB time=00:00:04.00 bitrate= 524.3kbits/s speed=2.00x\r\
frame=  500 fps= 50.0 q=28.0 size=    1280kB time=00:00:20.00 bitrate= 524.3kbits/s speed=2.00x\r\
frame= 1000 fps= 50.0 q=28.0 size=    2560kB time=00:00:40.00 bitrate= 524.3kbits/s speed=2.00x\n\
video:2500kB audio:0kB subtitle:0kB other streams:0kB global headers:0kB muxing overhead: 0.1%\n";

fn unthrottled() -> ProgressParser {
    ProgressParser::new().with_min_interval(Duration::ZERO)
}

fn stats_line(seconds: u32) -> String {
    format!(
        "frame={:5} fps= 25.0 q=30.0 size=    64kB time=00:{:02}:{:02}.00 bitrate= 100.0kbits/s speed=1.00x\r",
        seconds * 25,
        seconds / 60,
        seconds % 60
    )
}

#[test]
fn test_full_transcript_in_one_chunk() {
    let mut parser = unthrottled();
    let event = parser.feed(TRANSCRIPT.as_bytes()).unwrap();

    assert_eq!(parser.duration_secs(), Some(40.0));
    assert_eq!(event.elapsed_secs, 40.0);
    assert_eq!(event.percent, Some(100.0));
    assert_eq!(event.eta_secs, Some(0.0));
    assert_eq!(event.frame, Some(1000));

    let verdict = parser.finish(Some(0));
    assert!(verdict.success);
    assert_eq!(parser.state(), ParserState::Terminal(Terminal::Success));
    assert_eq!(verdict.avg_speed, Some(2.0));
    assert!(verdict.details.contains("muxing overhead"));
    assert!(!verdict.details.contains("frame="));
}

#[test]
fn test_byte_at_a_time_matches_single_chunk() {
    let mut whole = unthrottled();
    whole.feed(TRANSCRIPT.as_bytes());
    let whole = whole.finish(Some(0));

    let mut bytes = unthrottled();
    for b in TRANSCRIPT.as_bytes() {
        bytes.feed(std::slice::from_ref(b));
    }
    let bytes = bytes.finish(Some(0));

    assert_eq!(whole, bytes);
}

#[test]
fn test_no_duration_means_no_percent() {
    let mut parser = unthrottled();
    let event = parser.feed(stats_line(5).as_bytes()).unwrap();

    assert_eq!(parser.state(), ParserState::StreamingProgress);
    assert_eq!(parser.duration_secs(), None);
    assert_eq!(event.elapsed_secs, 5.0);
    assert_eq!(event.percent, None);
    assert_eq!(event.eta_secs, None);
}

#[test]
fn test_throttle_coalesces_and_flush_delivers_latest() {
    let mut parser = ProgressParser::new().with_min_interval(Duration::from_secs(3600));

    assert!(parser.feed(stats_line(1).as_bytes()).is_some());
    assert!(parser.feed(stats_line(2).as_bytes()).is_none());
    assert!(parser.feed(stats_line(3).as_bytes()).is_none());

    let tail = parser.flush().unwrap();
    assert_eq!(tail.elapsed_secs, 3.0);
    assert!(parser.flush().is_none());
}

#[test]
fn test_unknown_encoder_on_exit_zero_is_failure() {
    let mut parser = unthrottled();
    parser.feed(b"[vost#0:0 @ 0x55] Unknown encoder 'av1_amf'\n");

    let verdict = parser.finish(Some(0));
    assert!(!verdict.success);
    assert_eq!(verdict.failure, Some(FailureKind::EncoderUnavailable));
    assert_eq!(
        verdict.message.as_deref(),
        Some("[vost#0:0 @ 0x55] Unknown encoder 'av1_amf'")
    );
}

#[test]
fn test_custom_unavailable_marker() {
    let mut parser = unthrottled();
    parser.add_unavailable_marker("GPU is on fire");
    parser.feed(b"warning: gpu is on fire, continuing anyway\n");

    assert!(parser.encoder_unavailable());
}

#[test]
fn test_terminal_state_ignores_further_output() {
    let mut parser = unthrottled();
    parser.finish(Some(1));
    assert!(parser.is_terminal());
    assert!(parser.feed(stats_line(9).as_bytes()).is_none());
}

proptest! {
    #[test]
    fn prop_elapsed_never_decreases(
        times in prop::collection::vec(0u32..600, 1..40),
        cuts in prop::collection::vec(1usize..64, 1..20),
    ) {
        let stream: String = times.iter().map(|&t| stats_line(t)).collect();
        let bytes = stream.as_bytes();

        let mut parser = unthrottled();
        let mut seen = Vec::new();
        let mut pos = 0;
        let mut cut = cuts.iter().cycle();
        while pos < bytes.len() {
            let end = (pos + cut.next().copied().unwrap_or(1)).min(bytes.len());
            if let Some(event) = parser.feed(&bytes[pos..end]) {
                seen.push(event.elapsed_secs);
            }
            pos = end;
        }
        if let Some(event) = parser.flush() {
            seen.push(event.elapsed_secs);
        }

        prop_assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        let max = times.iter().copied().max().unwrap_or(0) as f64;
        prop_assert_eq!(parser.elapsed_secs(), max);
    }
}

fn set_encoded_frames(fields: &mut ProgressFields, value: &str) -> bool {
    match value.trim().parse::<u64>() {
        Ok(n) => {
            fields.frame = Some(n);
            true
        }
        Err(_) => false,
    }
}

fn set_elapsed_ms(fields: &mut ProgressFields, value: &str) -> bool {
    match value.trim().parse::<u64>() {
        Ok(ms) => {
            fields.elapsed_secs = Some(ms as f64 / 1000.0);
            true
        }
        Err(_) => false,
    }
}

#[test]
fn test_registered_matchers_extend_the_field_table() {
    let mut parser = unthrottled().with_known_duration(Some(3.0));
    parser.add_matcher(FieldMatcher {
        key: "encoded_frames",
        apply: set_encoded_frames,
    });
    parser.add_matcher(FieldMatcher {
        key: "elapsed_ms",
        apply: set_elapsed_ms,
    });

    // Unknown to the built-in table: nothing is picked up yet
    let mut plain = unthrottled().with_known_duration(Some(3.0));
    assert!(plain.feed(b"encoded_frames=36 elapsed_ms=1500\n").is_none());

    let event = parser.feed(b"encoded_frames=36 elapsed_ms=1500\n").unwrap();
    assert_eq!(event.frame, Some(36));
    assert_eq!(event.elapsed_secs, 1.5);
    assert_eq!(event.percent, Some(50.0));

    // An unparsable value keeps the last known one
    let event = parser.feed(b"encoded_frames=N/A elapsed_ms=3000\n").unwrap();
    assert_eq!(event.frame, Some(36));
    assert_eq!(event.elapsed_secs, 3.0);
}
