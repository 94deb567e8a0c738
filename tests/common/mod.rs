#![allow(dead_code)] // Each integration module uses a different subset

#[cfg(unix)]
pub mod fake_ffmpeg;
pub mod fixtures;
