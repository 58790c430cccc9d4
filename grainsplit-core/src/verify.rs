//! Physical segment verification and repair.
//!
//! A stream-copied segment can come out with the wrong frame count (muxer
//! drift) or pass the fast count and still be damaged (silent corruption).
//! Both cases are repaired with a lossless re-encode of the affected range
//! from the original source; the batch never aborts over a single segment.

use std::{
    collections::BTreeMap,
    path::Path,
};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    ffmpeg::{self, FrameCountMethod},
    progress_bar,
    split::SegmentDescriptor,
};

#[derive(Debug, Default)]
pub struct VerifySummary {
    pub checked:  usize,
    /// Names of segments that had to be re-encoded this pass. Repairs are
    /// not re-verified in the same pass.
    pub repaired: Vec<String>,
}

#[inline]
pub fn verify_segments(
    source: &Path,
    split_dir: &Path,
    segments: &BTreeMap<String, SegmentDescriptor>,
) -> Result<VerifySummary> {
    let mut summary = VerifySummary::default();
    progress_bar::init_progress_bar(segments.len() as u64);

    for (name, descriptor) in segments {
        let segment_path = split_dir.join(name);

        let fast = ffmpeg::get_num_frames(&segment_path, FrameCountMethod::Fast)
            .with_context(|| format!("Failed to count frames of segment {name}"))?;

        if fast != descriptor.length {
            warn!(
                "bad frame count for {name}: expected {expected}, got {fast}",
                expected = descriptor.length
            );
            repair(source, &segment_path, descriptor)?;
            summary.repaired.push(name.clone());
        } else {
            let slow = ffmpeg::get_num_frames(&segment_path, FrameCountMethod::Slow)
                .with_context(|| format!("Failed to decode segment {name}"))?;
            if fast != slow {
                warn!(
                    "silent corruption in {name}: stream copy counted {fast}, full decode \
                     counted {slow}"
                );
                repair(source, &segment_path, descriptor)?;
                summary.repaired.push(name.clone());
            }
        }

        summary.checked += 1;
        progress_bar::inc_bar(1);
    }

    progress_bar::finish_progress_bar();

    if summary.repaired.is_empty() {
        info!("verified {checked} segments, all intact", checked = summary.checked);
    } else {
        info!(
            "verified {checked} segments, re-encoded {repaired}: {names}",
            checked = summary.checked,
            repaired = summary.repaired.len(),
            names = summary.repaired.join(", ")
        );
    }

    Ok(summary)
}

fn repair(source: &Path, segment_path: &Path, descriptor: &SegmentDescriptor) -> Result<()> {
    info!(
        "re-encoding {segment} losslessly from frame {start}, {length} frames",
        segment = segment_path.display(),
        start = descriptor.start,
        length = descriptor.length
    );
    ffmpeg::lossless_reencode(
        source,
        segment_path,
        descriptor.start,
        descriptor.length,
        |_frame| {},
    )
    .with_context(|| {
        format!(
            "Corrective re-encode of {segment} failed",
            segment = segment_path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_segment_set_verifies_cleanly() {
        let summary = verify_segments(
            Path::new("missing-source.mkv"),
            Path::new("missing-split-dir"),
            &BTreeMap::new(),
        )
        .expect("nothing to verify");
        assert_eq!(summary.checked, 0);
        assert!(summary.repaired.is_empty());
    }
}
