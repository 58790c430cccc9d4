//! FFmpeg/ffprobe invocations: physical segmenting, frame-count probes, the
//! corrective lossless re-encode, and resolution probing.

use std::{
    io::{BufRead, BufReader},
    path::Path,
    process::{Command, ExitStatus, Stdio},
    thread,
};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::{create_dir, process};

static FRAME_PROGRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"frame=\s*(\d+)").expect("regex is valid"));

/// How to count the frames of a file: `Fast` stream-copies into the null
/// muxer, `Slow` fully decodes. A file can pass the fast count and still fail
/// the slow one when its packets are damaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCountMethod {
    Fast,
    Slow,
}

/// Last `frame=` counter in a chunk of ffmpeg stderr output.
pub(crate) fn parse_frame_count(line: &str) -> Option<usize> {
    FRAME_PROGRESS_RE
        .captures_iter(line)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[inline]
pub fn get_num_frames(input: &Path, method: FrameCountMethod) -> Result<usize> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-i"])
        .arg(input)
        .args(["-map", "0:v:0"]);
    if method == FrameCountMethod::Fast {
        cmd.args(["-c", "copy"]);
    }
    cmd.args(["-f", "null", "-"]);

    let out = process::run_interruptible(&mut cmd, "ffmpeg")?;
    if !out.status.success() {
        bail!(
            "ffmpeg exited with {status} while counting frames of {input}",
            status = out.status,
            input = input.display()
        );
    }

    parse_frame_count(&out.stderr).with_context(|| {
        format!(
            "ffmpeg reported no frame count for {input}",
            input = input.display()
        )
    })
}

/// Split the source into physical segment files (`%05d.mkv`) by stream copy.
///
/// `split_points` are the boundary frames excluding the implicit one at frame
/// 0; with no points the whole video becomes a single `00000.mkv`.
#[inline]
pub fn segment(
    input: &Path,
    out_dir: &Path,
    split_points: &[usize],
    on_frame: impl Fn(usize) + Send,
) -> Result<()> {
    create_dir!(out_dir)?;

    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-hide_banner", "-i"])
        .arg(input)
        .args(["-map", "0:v:0", "-an", "-c", "copy", "-avoid_negative_ts", "1"]);
    if !split_points.is_empty() {
        let frames = split_points
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        cmd.args(["-f", "segment", "-segment_frames", frames.as_str()]);
    }
    cmd.arg(out_dir.join("%05d.mkv"));

    debug!("segmenting {input} at {split_points:?}", input = input.display());
    let status = run_with_frame_progress(cmd, on_frame)?;
    if !status.success() {
        bail!("ffmpeg segmenting exited with {status}");
    }
    Ok(())
}

/// Re-encode exactly `[start, start + frames)` of the source losslessly into
/// `output`, replacing a segment whose stream copy came out short or long.
#[inline]
pub fn lossless_reencode(
    input: &Path,
    output: &Path,
    start: usize,
    frames: usize,
    on_frame: impl Fn(usize) + Send,
) -> Result<()> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-i"])
        .arg(input)
        .args(["-map", "0:v:0", "-c:v", "libx265", "-x265-params", "lossless=1"])
        .arg("-vf")
        .arg(format!(r"select=gte(n\,{start})"))
        .arg("-frames:v")
        .arg(frames.to_string())
        .arg("-y")
        .arg(output);

    let status = run_with_frame_progress(cmd, on_frame)?;
    if !status.success() {
        bail!(
            "lossless re-encode of {output} exited with {status}",
            output = output.display()
        );
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width:  u32,
    height: u32,
}

/// Resolution of the first video stream, via ffprobe.
#[inline]
pub fn probe_resolution(input: &Path) -> Result<(u32, u32)> {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height",
        "-of",
        "json",
    ])
    .arg(input)
    .stdin(Stdio::null())
    .stderr(Stdio::null());

    let out = cmd
        .output()
        .context("Failed to spawn ffprobe. Is it installed in the system path?")?;
    if !out.status.success() {
        bail!(
            "ffprobe exited with {status} while probing {input}",
            status = out.status,
            input = input.display()
        );
    }

    let probe: ProbeOutput = serde_json::from_slice(&out.stdout)
        .context("Failed to parse ffprobe resolution output")?;
    let stream = probe
        .streams
        .first()
        .with_context(|| format!("No video stream in {input}", input = input.display()))?;
    Ok((stream.width, stream.height))
}

/// Run an ffmpeg command, feeding each `frame=` progress counter from its
/// stderr to `on_frame` while waiting interruptibly for it to exit.
fn run_with_frame_progress(
    mut cmd: Command,
    on_frame: impl Fn(usize) + Send,
) -> Result<ExitStatus> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("Failed to spawn ffmpeg. Is it installed in the system path?")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let status = thread::scope(|scope| {
        // ffmpeg terminates progress lines with a carriage return.
        scope.spawn(move || {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::with_capacity(128);
            while let Ok(read) = reader.read_until(b'\r', &mut buf) {
                if read == 0 {
                    break;
                }
                if let Ok(line) = std::str::from_utf8(&buf) {
                    if let Some(frame) = parse_frame_count(line) {
                        on_frame(frame);
                    }
                }
                buf.clear();
            }
        });

        process::wait_interruptible(&mut child)
    })?;

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_lines() {
        assert_eq!(
            parse_frame_count("frame=  123 fps= 30 q=-1.0 size=    2048KiB time=00:00:05.12"),
            Some(123)
        );
        assert_eq!(parse_frame_count("frame=5 fps=0.0"), Some(5));
        assert_eq!(parse_frame_count("size=  1024KiB time=00:00:01.00"), None);
    }

    #[test]
    fn takes_the_last_counter_in_a_chunk() {
        let chunk = "frame=   10 fps= 30\rframe=   20 fps= 30\rframe= 1500 fps= 29";
        assert_eq!(parse_frame_count(chunk), Some(1500));
    }
}
