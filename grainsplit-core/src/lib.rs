//! Core library for grainsplit: plans lossless-cut segmentation of a video
//! from scene-cut and container-keyframe positions, verifies and repairs the
//! resulting physical segments, and generates per-segment film grain models
//! from clean/denoised segment pairs.

pub mod ffmpeg;
pub mod grain;
pub mod keyframes;
pub mod process;
pub mod progress_bar;
pub mod scale;
pub mod split;
pub mod util;
pub mod verify;

pub use crate::{
    grain::{GrainJob, GrainModelPipeline, GrainModelSettings, GrainRunSummary},
    keyframes::ContainerKeyframes,
    split::{MergeWindow, PlanEntry, SegmentDescriptor, SplitPlan},
    verify::VerifySummary,
};

/// Create a directory and all of its parents, treating an already existing
/// directory as success.
#[macro_export]
macro_rules! create_dir {
    ($loc:expr) => {{
        match std::fs::create_dir_all(&$loc) {
            Ok(()) => Ok(()),
            Err(e) => match e.kind() {
                std::io::ErrorKind::AlreadyExists => Ok(()),
                _ => Err(anyhow::anyhow!(
                    "Error while creating directory {:?}: {}",
                    &$loc,
                    e
                )),
            },
        }
    }};
}
