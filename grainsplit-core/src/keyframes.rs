//! Container keyframe discovery.
//!
//! Two explicit capabilities, selected by an up-front probe: the container
//! index (`ffprobe` packet flags, no decoding) and the decode probe (`ffmpeg`
//! I-frame select with debug logging). Scene-cut keyframes come from the
//! encoder-side scene detector and are only loaded here, never computed.

use std::{
    fs,
    io::{BufRead, BufReader},
    path::Path,
    process::{Command, Stdio},
    thread,
};

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::process;

static DECODE_KEYFRAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"n:(\d+)\.\d+ pts:.+key:1.+pict_type:I").expect("regex is valid"));
static FRAMES_DECODED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"video.+?(\d+) frames decoded").expect("regex is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyframeSourceKind {
    /// Parsed from the container index without decoding.
    ContainerIndex,
    /// Recovered by decoding the stream and watching for I-frames.
    DecodeProbe,
}

#[derive(Debug, Clone)]
pub struct ContainerKeyframes {
    pub frames:       Vec<usize>,
    pub total_frames: usize,
    pub source:       KeyframeSourceKind,
}

/// Find the frames the container can be split at losslessly, preferring the
/// index parse and falling back to the decode probe when the index is
/// unusable. The fallback reason is always logged.
#[inline]
pub fn detect(input: &Path) -> Result<ContainerKeyframes> {
    match container_index(input) {
        Ok(keyframes) => match usability(&keyframes) {
            None => Ok(keyframes),
            Some(reason) => {
                warn!("container index unusable ({reason}), falling back to decode probe");
                decode_probe(input)
            },
        },
        Err(e) => {
            warn!("container index parse failed ({e:#}), falling back to decode probe");
            decode_probe(input)
        },
    }
}

fn usability(keyframes: &ContainerKeyframes) -> Option<&'static str> {
    if keyframes.total_frames == 0 {
        Some("no video packets found")
    } else if keyframes.frames.is_empty() {
        Some("no keyframes in container index")
    } else if keyframes.frames[0] != 0 {
        Some("container index does not start at frame 0")
    } else {
        None
    }
}

/// Fast path: one line of packet flags per video packet, `K` marking
/// seekable packets; the frame index is the packet ordinal.
#[inline]
pub fn container_index(input: &Path) -> Result<ContainerKeyframes> {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "packet=flags",
        "-of",
        "csv=p=0",
    ])
    .arg(input)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .context("Failed to spawn ffprobe. Is it installed in the system path?")?;
    let stdout = child.stdout.take().context("Failed to capture stdout")?;

    let (frames, total_frames) = thread::scope(|scope| -> Result<(Vec<usize>, usize)> {
        let reader = scope.spawn(move || {
            let mut frames = Vec::new();
            let mut total = 0usize;
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if line.is_empty() {
                    continue;
                }
                if line.contains('K') {
                    frames.push(total);
                }
                total += 1;
            }
            (frames, total)
        });

        let status = process::wait_interruptible(&mut child)?;
        let parsed = reader.join().map_err(|_| anyhow!("packet reader panicked"))?;
        if !status.success() {
            bail!("ffprobe exited with {status} while reading the container index");
        }
        Ok(parsed)
    })?;

    debug!(
        "container index: {count} keyframes over {total_frames} frames",
        count = frames.len()
    );
    Ok(ContainerKeyframes {
        frames,
        total_frames,
        source: KeyframeSourceKind::ContainerIndex,
    })
}

/// Slow path: decode the stream with an I-frame select filter and debug
/// logging, collecting matched frame numbers and the decoded total.
#[inline]
pub fn decode_probe(input: &Path) -> Result<ContainerKeyframes> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-i"])
        .arg(input)
        .args(["-map", "0:v:0"])
        .args(["-vf", r"select=eq(pict_type\,PICT_TYPE_I)"])
        .args(["-f", "null", "-loglevel", "debug", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .context("Failed to spawn ffmpeg. Is it installed in the system path?")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let (frames, total_frames) = thread::scope(|scope| -> Result<(Vec<usize>, usize)> {
        let reader = scope.spawn(move || {
            let mut frames = Vec::new();
            let mut total = 0usize;
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                if let Some(frame) = parse_decode_keyframe(&line) {
                    frames.push(frame);
                } else if let Some(decoded) = parse_frames_decoded(&line) {
                    total = decoded;
                }
            }
            (frames, total)
        });

        let status = process::wait_interruptible(&mut child)?;
        let parsed = reader.join().map_err(|_| anyhow!("stderr reader panicked"))?;
        if !status.success() {
            bail!("ffmpeg exited with {status} while probing keyframes");
        }
        Ok(parsed)
    })?;

    if frames.is_empty() || total_frames == 0 {
        bail!(
            "decode probe found no keyframes in {input}",
            input = input.display()
        );
    }

    debug!(
        "decode probe: {count} keyframes over {total_frames} frames",
        count = frames.len()
    );
    Ok(ContainerKeyframes {
        frames,
        total_frames,
        source: KeyframeSourceKind::DecodeProbe,
    })
}

fn parse_decode_keyframe(line: &str) -> Option<usize> {
    DECODE_KEYFRAME_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn parse_frames_decoded(line: &str) -> Option<usize> {
    FRAMES_DECODED_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Load scene-cut frame indices produced by the scene detector: a JSON array
/// of ascending frame numbers.
#[inline]
pub fn read_scene_keyframes(path: &Path) -> Result<Vec<usize>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenes file {}", path.display()))?;
    let scenes: Vec<usize> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse scenes file {}", path.display()))?;
    Ok(scenes)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn parses_select_filter_keyframe_lines() {
        let line = "[Parsed_select_0 @ 0x5576] n:24.000000 pts:1001 t:0.040040 key:1 \
                    interlace_type:P pict_type:I scene:nan -> select:1.000000 select_out:0";
        assert_eq!(parse_decode_keyframe(line), Some(24));

        let non_key = "[Parsed_select_0 @ 0x5576] n:25.000000 pts:1042 t:0.041710 key:0 \
                       interlace_type:P pict_type:P scene:nan -> select:0.000000";
        assert_eq!(parse_decode_keyframe(non_key), None);
    }

    #[test]
    fn parses_decoded_totals() {
        let line = "Input stream #0:0 (video): 3000 packets read (51200 bytes); 3000 frames \
                    decoded; ";
        assert_eq!(parse_frames_decoded(line), Some(3000));
        assert_eq!(parse_frames_decoded("Input stream #0:1 (audio): 400 packets read"), None);
    }

    #[test]
    fn reads_scene_keyframes_json() {
        let mut file = NamedTempFile::new().expect("tempfile");
        write!(file, "[0, 10, 25, 40]").expect("write");
        assert_eq!(
            read_scene_keyframes(file.path()).expect("parse"),
            vec![0, 10, 25, 40]
        );
    }
}
