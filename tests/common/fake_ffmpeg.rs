/// Shell scripts that stand in for ffmpeg so supervision, parsing and
/// classification can be exercised without a real encoder.
///
/// Every script treats its last argument as the output path, the way the
/// command builder lays out arguments.
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Bytes the well-behaved scripts write to the output file
pub const OUTPUT_BYTES: &[u8] = b"fake encoded data";

const LAST_ARG: &str = "for last; do :; done\n";

const ENCODE_OK: &str = r#"echo "Input #0, y4m, from 'input.y4m':" >&2
echo "  Duration: 00:00:02.00, start: 0.000000, bitrate: N/A" >&2
printf 'frame=   25 fps= 50.0 q=28.0 size=       1kB time=00:00:01.00 bitrate=   8.2kbits/s speed=2.00x\r' >&2
printf 'frame=   50 fps= 50.0 q=28.0 size=       2kB time=00:00:02.00 bitrate=   8.2kbits/s speed=2.00x\n' >&2
printf 'fake encoded data' > "$last"
exit 0
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFfmpeg {
    /// Announces a 2s input, reports two stats lines, writes output
    Ok,
    /// Prints "Unknown encoder" but exits 0
    UnknownEncoder,
    /// Writes a partial file, then fails with exit code 1
    Fail,
    /// Exits 0 without writing anything
    Silent,
    /// Writes a partial file, then sleeps for 30s
    Hang,
    /// Like `Ok`, except hardware encoders fail to initialise
    Selective,
    /// Like `Ok`, and answers quality comparisons with PSNR/SSIM summaries
    Scored,
    /// Like `Ok`, but quality comparisons fail
    Unscored,
}

impl FakeFfmpeg {
    fn name(self) -> &'static str {
        match self {
            FakeFfmpeg::Ok => "ffmpeg-ok",
            FakeFfmpeg::UnknownEncoder => "ffmpeg-unknown-encoder",
            FakeFfmpeg::Fail => "ffmpeg-fail",
            FakeFfmpeg::Silent => "ffmpeg-silent",
            FakeFfmpeg::Hang => "ffmpeg-hang",
            FakeFfmpeg::Selective => "ffmpeg-selective",
            FakeFfmpeg::Scored => "ffmpeg-scored",
            FakeFfmpeg::Unscored => "ffmpeg-unscored",
        }
    }

    fn body(self) -> String {
        match self {
            FakeFfmpeg::Ok => ENCODE_OK.to_string(),
            FakeFfmpeg::UnknownEncoder => {
                "echo \"[vost#0:0 @ 0x55d0] Unknown encoder 'h264_nvenc'\" >&2\nexit 0\n".to_string()
            }
            FakeFfmpeg::Fail => concat!(
                "printf 'partial' > \"$last\"\n",
                "echo 'Error opening input file input.mkv.' >&2\n",
                "echo 'Conversion failed!' >&2\n",
                "exit 1\n"
            )
            .to_string(),
            FakeFfmpeg::Silent => "exit 0\n".to_string(),
            FakeFfmpeg::Hang => "printf 'partial' > \"$last\"\nexec sleep 30\n".to_string(),
            FakeFfmpeg::Selective => format!(
                concat!(
                    "case \"$*\" in\n",
                    "  *_nvenc*|*_amf*|*_qsv*|*_videotoolbox*)\n",
                    "    echo 'No NVENC capable devices found' >&2\n",
                    "    echo 'Error initializing output stream 0:0' >&2\n",
                    "    exit 1;;\n",
                    "esac\n",
                    "{}"
                ),
                ENCODE_OK
            ),
            FakeFfmpeg::Scored => format!(
                concat!(
                    "case \"$*\" in\n",
                    "  *-filters*)\n",
                    "    echo ' ... psnr              VV->V      Calculate the PSNR between two video streams.'\n",
                    "    exit 0;;\n",
                    "  *-lavfi*)\n",
                    "    echo '[Parsed_psnr_3 @ 0x55] PSNR y:41.20 u:44.01 v:44.12 average:42.01 min:39.80 max:45.30' >&2\n",
                    "    echo '[Parsed_ssim_4 @ 0x56] SSIM Y:0.981 (17.2) U:0.990 (20.1) V:0.991 (20.3) All:0.985 (18.2)' >&2\n",
                    "    exit 0;;\n",
                    "esac\n",
                    "{}"
                ),
                ENCODE_OK
            ),
            FakeFfmpeg::Unscored => format!(
                concat!(
                    "case \"$*\" in\n",
                    "  *-filters*) exit 0;;\n",
                    "  *-lavfi*)\n",
                    "    echo '[Parsed_scale2ref_0 @ 0x55] Invalid size' >&2\n",
                    "    echo 'Error while filtering: Invalid argument' >&2\n",
                    "    exit 1;;\n",
                    "esac\n",
                    "{}"
                ),
                ENCODE_OK
            ),
        }
    }

    /// Write the script into `dir` and return its path as a program name
    pub fn install(self, dir: &Path) -> String {
        let path: PathBuf = dir.join(self.name());
        let script = format!("#!/bin/sh\n{}{}", LAST_ARG, self.body());
        fs::write(&path, script).expect("write fake ffmpeg");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake ffmpeg");
        path.to_string_lossy().into_owned()
    }
}
