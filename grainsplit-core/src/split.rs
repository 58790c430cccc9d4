//! Segment-boundary reconciliation.
//!
//! Scene cuts say where encode units *should* start; container keyframes say
//! where the file *can* be split without re-encoding. This module reconciles
//! the two: a physical boundary is only ever placed on a container keyframe,
//! and a scene cut that misses every keyframe is recorded as a frame offset
//! into its physical segment instead of a new file, keeping the split
//! lossless while preserving scene granularity.

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const SEGMENT_EXT: &str = "mkv";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("{which} keyframe list is empty")]
    EmptyKeyframes { which: &'static str },
    #[error("{which} keyframes must start at frame 0 (got {first})")]
    MissingZero { which: &'static str, first: usize },
    #[error("{which} keyframes must be strictly ascending (saw {prev} before {next})")]
    NotAscending {
        which: &'static str,
        prev:  usize,
        next:  usize,
    },
    #[error("{which} keyframe {frame} is past the end of the video ({total_frames} frames)")]
    OutOfRange {
        which:        &'static str,
        frame:        usize,
        total_frames: usize,
    },
    #[error("plan covers {got} of {expected} frames")]
    FrameSumMismatch { got: usize, expected: usize },
    #[error("segment {name} breaks the timeline partition (expected start {expected}, got {got})")]
    SegmentGap {
        name:     String,
        expected: usize,
        got:      usize,
    },
    #[error("plan entry {index} references unknown segment {segment}")]
    UnknownSegment { index: String, segment: String },
    #[error("plan entry {index} overruns segment {segment}: {start} + {frames} > {length}")]
    EntryOverrun {
        index:   String,
        segment: String,
        start:   usize,
        frames:  usize,
        length:  usize,
    },
}

/// Scene-merge window. Units shorter than `min_frames` are candidates for
/// merging into their neighbor until `max_frames` would be crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeWindow {
    pub min_frames: usize,
    pub max_frames: usize,
}

/// One encode unit: a scene-accurate sub-range of a physical segment,
/// starting `start` frames into that file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub segment: String,
    pub start:   usize,
    pub frames:  usize,
}

/// One physically split file's position in the original timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub start:  usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    /// Encode units keyed by zero-padded plan index.
    pub entries:      BTreeMap<String, PlanEntry>,
    /// Physical segments keyed by file name.
    pub segments:     BTreeMap<String, SegmentDescriptor>,
    pub total_frames: usize,
}

#[inline]
pub fn segment_name(index: usize) -> String {
    format!("{index:05}.{SEGMENT_EXT}")
}

/// Merge short scenes into their successors.
///
/// This is a biased greedy packer, not a strict bound: it emits the previous
/// scene as a boundary once `max_frames` is reached, so the first and last
/// units may fall outside `[min_frames, max_frames]`. Downstream consumers
/// depend on this exact emission timing.
#[inline]
pub fn merge_scenes(scenes: &[usize], window: MergeWindow) -> Vec<usize> {
    let Some((&first, rest)) = scenes.split_first() else {
        return Vec::new();
    };

    let mut merged = vec![first];
    let mut last_boundary = first;
    let mut previous_scene = first;
    for &scene in rest {
        if scene - last_boundary >= window.max_frames
            && previous_scene - last_boundary > window.min_frames
        {
            merged.push(previous_scene);
            last_boundary = previous_scene;
        }
        previous_scene = scene;
    }
    merged
}

/// Reconcile scene cuts with container keyframes into a split plan.
///
/// Every physical boundary in the result is a member of
/// `container_keyframes`; scene cuts in between become offset entries into
/// the preceding physical segment.
#[inline]
pub fn plan(
    scene_keyframes: &[usize],
    container_keyframes: &[usize],
    total_frames: usize,
    merge_window: Option<MergeWindow>,
) -> Result<SplitPlan, PlanError> {
    validate_keyframes("scene", scene_keyframes, total_frames)?;
    validate_keyframes("container", container_keyframes, total_frames)?;

    let mut scenes = match merge_window {
        Some(window) => merge_scenes(scene_keyframes, window),
        None => scene_keyframes.to_vec(),
    };

    // The total frame count is an implicit final boundary for both lists.
    scenes.push(total_frames);
    let mut container = container_keyframes.to_vec();
    container.push(total_frames);

    let mut entries = BTreeMap::new();
    let mut boundaries: Vec<usize> = Vec::new();
    let mut last_end = 0usize;

    for i in 0..scenes.len() - 1 {
        let frame = scenes[i];
        let length = scenes[i + 1] - frame;
        let mut segment_index = boundaries.len();
        let mut start = 0usize;

        if container.binary_search(&frame).is_ok() {
            // The scene cut is itself a legal split point.
            boundaries.push(frame);
        } else {
            let pred_idx = container.partition_point(|&kf| kf < frame);
            let predecessor = if pred_idx > 0 { container[pred_idx - 1] } else { 0 };
            start = frame - predecessor;
            if boundaries.binary_search(&predecessor).is_ok() || predecessor < last_end {
                // The nearest legal split point is already consumed by an
                // earlier unit, so this unit rides in the previous physical
                // segment at a deeper offset.
                segment_index -= 1;
                start = frame - boundaries[segment_index];
            } else {
                boundaries.push(predecessor);
            }
        }

        entries.insert(
            format!("{index:05}", index = entries.len()),
            PlanEntry {
                segment: segment_name(segment_index),
                start,
                frames: length,
            },
        );
        last_end = frame + length;
    }

    let mut segments = BTreeMap::new();
    for (i, &boundary) in boundaries.iter().enumerate() {
        let end = boundaries.get(i + 1).copied().unwrap_or(total_frames);
        segments.insert(
            segment_name(i),
            SegmentDescriptor {
                start:  boundary,
                length: end - boundary,
            },
        );
    }

    let plan = SplitPlan {
        entries,
        segments,
        total_frames,
    };
    plan.validate()?;

    debug!(
        "planned {units} encode units over {files} physical segments",
        units = plan.entries.len(),
        files = plan.segments.len()
    );
    Ok(plan)
}

fn validate_keyframes(
    which: &'static str,
    keyframes: &[usize],
    total_frames: usize,
) -> Result<(), PlanError> {
    let Some(&first) = keyframes.first() else {
        return Err(PlanError::EmptyKeyframes {
            which,
        });
    };
    if first != 0 {
        return Err(PlanError::MissingZero {
            which,
            first,
        });
    }
    for pair in keyframes.windows(2) {
        if pair[1] <= pair[0] {
            return Err(PlanError::NotAscending {
                which,
                prev: pair[0],
                next: pair[1],
            });
        }
    }
    if let Some(&last) = keyframes.last() {
        if last > 0 && last >= total_frames {
            return Err(PlanError::OutOfRange {
                which,
                frame: last,
                total_frames,
            });
        }
    }
    Ok(())
}

impl SplitPlan {
    /// Physical boundary frames in timeline order, including frame 0.
    #[inline]
    pub fn boundaries(&self) -> Vec<usize> {
        let mut starts: Vec<usize> = self.segments.values().map(|s| s.start).collect();
        starts.sort_unstable();
        starts
    }

    /// Boundary frames to pass to the splitter: everything except the
    /// implicit boundary at frame 0.
    #[inline]
    pub fn split_points(&self) -> Vec<usize> {
        let mut points = self.boundaries();
        points.retain(|&b| b != 0);
        points
    }

    /// Check the plan invariants: entries cover the whole video, segments
    /// partition the timeline, and no entry overruns its segment.
    #[inline]
    pub fn validate(&self) -> Result<(), PlanError> {
        let covered: usize = self.entries.values().map(|e| e.frames).sum();
        if covered != self.total_frames {
            return Err(PlanError::FrameSumMismatch {
                got:      covered,
                expected: self.total_frames,
            });
        }

        let mut expected_start = 0usize;
        for (name, descriptor) in &self.segments {
            if descriptor.start != expected_start {
                return Err(PlanError::SegmentGap {
                    name:     name.clone(),
                    expected: expected_start,
                    got:      descriptor.start,
                });
            }
            expected_start += descriptor.length;
        }
        if !self.segments.is_empty() && expected_start != self.total_frames {
            return Err(PlanError::FrameSumMismatch {
                got:      expected_start,
                expected: self.total_frames,
            });
        }

        for (index, entry) in &self.entries {
            let Some(descriptor) = self.segments.get(&entry.segment) else {
                return Err(PlanError::UnknownSegment {
                    index:   index.clone(),
                    segment: entry.segment.clone(),
                });
            };
            if entry.start + entry.frames > descriptor.length {
                return Err(PlanError::EntryOverrun {
                    index:   index.clone(),
                    segment: entry.segment.clone(),
                    start:   entry.start,
                    frames:  entry.frames,
                    length:  descriptor.length,
                });
            }
        }

        Ok(())
    }

    #[inline]
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json).with_context(|| {
            format!("Failed to write plan file {}", path.as_ref().display())
        })?;
        Ok(())
    }

    #[inline]
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read plan file {}", path.as_ref().display())
        })?;
        let plan: SplitPlan = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse plan file {}", path.as_ref().display()))?;
        plan.validate()?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn entry(segment: &str, start: usize, frames: usize) -> PlanEntry {
        PlanEntry {
            segment: segment.to_string(),
            start,
            frames,
        }
    }

    #[test]
    fn reconciles_misaligned_scene_cuts() {
        let plan = plan(&[0, 10, 20, 30], &[0, 20], 40, None).expect("plan");

        assert_eq!(plan.boundaries(), vec![0, 20]);
        assert_eq!(plan.entries.len(), 4);
        assert_eq!(plan.entries["00000"], entry("00000.mkv", 0, 10));
        assert_eq!(plan.entries["00001"], entry("00000.mkv", 10, 10));
        assert_eq!(plan.entries["00002"], entry("00001.mkv", 0, 10));
        assert_eq!(plan.entries["00003"], entry("00001.mkv", 10, 10));

        assert_eq!(plan.segments["00000.mkv"], SegmentDescriptor { start: 0, length: 20 });
        assert_eq!(plan.segments["00001.mkv"], SegmentDescriptor { start: 20, length: 20 });
    }

    #[test]
    fn scene_cut_between_keyframes_rides_the_previous_segment() {
        // The keyframe at 20 sits inside the unit [10, 25), so it can never
        // become a boundary; the unit at 25 stays in the first file at a
        // deeper offset.
        let plan = plan(&[0, 10, 25], &[0, 20], 40, None).expect("plan");

        assert_eq!(plan.boundaries(), vec![0]);
        assert_eq!(plan.entries.len(), 3);
        assert_eq!(plan.entries["00000"], entry("00000.mkv", 0, 10));
        assert_eq!(plan.entries["00001"], entry("00000.mkv", 10, 15));
        assert_eq!(plan.entries["00002"], entry("00000.mkv", 25, 15));
        assert_eq!(plan.segments["00000.mkv"], SegmentDescriptor { start: 0, length: 40 });
    }

    #[test]
    fn aligned_scene_cuts_each_get_their_own_file() {
        let plan = plan(&[0, 10, 30], &[0, 10, 30, 45], 60, None).expect("plan");

        assert_eq!(plan.boundaries(), vec![0, 10, 30]);
        for (i, (index, entry)) in plan.entries.iter().enumerate() {
            assert_eq!(index, &format!("{i:05}"));
            assert_eq!(entry.start, 0);
            assert_eq!(entry.segment, segment_name(i));
        }
    }

    #[test]
    fn entries_cover_the_whole_video() {
        let cases: &[(&[usize], &[usize], usize)] = &[
            (&[0, 10, 25], &[0, 20], 40),
            (&[0, 3, 7, 11, 19], &[0, 5, 12], 30),
            (&[0], &[0], 17),
            (&[0, 100], &[0, 30, 60, 90, 120], 150),
        ];
        for &(scenes, container, total) in cases {
            let plan = plan(scenes, container, total, None).expect("plan");
            let covered: usize = plan.entries.values().map(|e| e.frames).sum();
            assert_eq!(covered, total, "scenes {scenes:?} container {container:?}");
        }
    }

    #[test]
    fn segments_partition_the_timeline() {
        let plan = plan(&[0, 3, 7, 11, 19], &[0, 5, 12], 30, None).expect("plan");

        let mut expected_start = 0;
        for descriptor in plan.segments.values() {
            assert_eq!(descriptor.start, expected_start);
            expected_start += descriptor.length;
        }
        assert_eq!(expected_start, plan.total_frames);
    }

    #[test]
    fn boundaries_are_container_keyframes() {
        let container = [0usize, 5, 12, 24, 33];
        let plan = plan(&[0, 5, 12, 19, 24], &container, 40, None).expect("plan");

        assert_eq!(plan.boundaries(), vec![0, 5, 12, 24]);
        for boundary in plan.boundaries() {
            assert!(
                container.contains(&boundary),
                "boundary {boundary} is not a container keyframe"
            );
        }
    }

    #[test]
    fn entries_never_overrun_their_segment() {
        let plan = plan(&[0, 5, 12, 19, 24], &[0, 5, 12, 24, 33], 40, None).expect("plan");
        for entry in plan.entries.values() {
            let segment = &plan.segments[&entry.segment];
            assert!(entry.start + entry.frames <= segment.length);
        }
    }

    #[test]
    fn rejects_bad_keyframe_lists() {
        assert!(matches!(
            plan(&[], &[0], 10, None),
            Err(PlanError::EmptyKeyframes { which: "scene" })
        ));
        assert!(matches!(
            plan(&[0, 5], &[], 10, None),
            Err(PlanError::EmptyKeyframes { which: "container" })
        ));
        assert!(matches!(
            plan(&[3, 5], &[0], 10, None),
            Err(PlanError::MissingZero { which: "scene", first: 3 })
        ));
        assert!(matches!(
            plan(&[0, 7, 5], &[0], 10, None),
            Err(PlanError::NotAscending { which: "scene", prev: 7, next: 5 })
        ));
        assert!(matches!(
            plan(&[0, 5], &[0, 12], 10, None),
            Err(PlanError::OutOfRange { which: "container", frame: 12, .. })
        ));
    }

    #[test]
    fn merge_emits_previous_scene_at_the_window_edge() {
        let window = MergeWindow {
            min_frames: 5,
            max_frames: 20,
        };
        // 24 - 0 >= 20 and 18 - 0 > 5, so 18 is emitted; then 40 - 18 >= 20
        // and 37 - 18 > 5, so 37 is emitted.
        assert_eq!(merge_scenes(&[0, 12, 18, 24, 37, 40], window), vec![0, 18, 37]);
    }

    #[test]
    fn merge_window_does_not_bound_the_edge_units() {
        let window = MergeWindow {
            min_frames: 5,
            max_frames: 20,
        };
        // Scene 21 crosses the max but previous_scene is still the start, so
        // the first unit comes out 21 frames long; with total_frames 55 the
        // tail unit [21, 55) runs 34 frames. Neither respects the window.
        assert_eq!(merge_scenes(&[0, 21, 30], window), vec![0, 21]);
    }

    #[test]
    fn merge_keeps_scenes_below_the_window() {
        let window = MergeWindow {
            min_frames: 10,
            max_frames: 20,
        };
        // 20 - 0 >= 20 but 8 - 0 <= 10 blocks emission at scene 20.
        assert_eq!(merge_scenes(&[0, 8, 20], window), vec![0]);
    }

    #[test]
    fn plan_applies_merging_before_reconciliation() {
        let window = MergeWindow {
            min_frames: 5,
            max_frames: 20,
        };
        // Merging collapses [0, 12, 18, 24, 37] to [0, 18], both
        // container-aligned, so the plan has two whole-file units.
        let merged = plan(&[0, 12, 18, 24, 37], &[0, 18, 37], 50, Some(window)).expect("plan");
        assert_eq!(merged.entries.len(), 2);
        assert!(merged.entries.values().all(|e| e.start == 0));
        assert_eq!(merged.boundaries(), vec![0, 18]);
    }

    #[test]
    fn serializes_entries_in_the_plan_wire_shape() {
        let plan = plan(&[0, 10, 20, 30], &[0, 20], 40, None).expect("plan");
        let value = serde_json::to_value(&plan).expect("serialize");

        assert_eq!(
            value["entries"]["00001"],
            json!({"segment": "00000.mkv", "start": 10, "frames": 10})
        );
        assert_eq!(
            value["segments"]["00001.mkv"],
            json!({"start": 20, "length": 20})
        );
        assert_eq!(value["total_frames"], json!(40));
    }

    #[test]
    fn plan_file_round_trips() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("plan.json");

        let original = plan(&[0, 10, 20, 30], &[0, 20], 40, None).expect("plan");
        original.write_to_file(&path).expect("write");
        let loaded = SplitPlan::from_file(&path).expect("load");
        assert_eq!(original, loaded);
    }

    #[test]
    fn validate_rejects_tampered_plans() {
        let mut tampered = plan(&[0, 10, 20, 30], &[0, 20], 40, None).expect("plan");
        tampered
            .segments
            .get_mut("00001.mkv")
            .expect("segment exists")
            .length = 25;
        assert!(matches!(
            tampered.validate(),
            Err(PlanError::FrameSumMismatch { .. })
        ));

        let mut overrun = plan(&[0, 10, 20, 30], &[0, 20], 40, None).expect("plan");
        overrun
            .entries
            .get_mut("00001")
            .expect("entry exists")
            .start = 11;
        assert!(matches!(overrun.validate(), Err(PlanError::EntryOverrun { .. })));
    }
}
