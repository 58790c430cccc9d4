use std::path::Path;

use anyhow::{ensure, Result};
use grainsplit_core::{
    ffmpeg,
    keyframes,
    progress_bar,
    split::{self, MergeWindow},
    util,
    verify,
};
use tracing::info;

#[allow(clippy::too_many_arguments)]
pub fn split_handler(
    input: &Path,
    split_dir: &Path,
    plan_path: &Path,
    scenes_path: &Path,
    min_frames: i64,
    max_frames: i64,
    no_verify: bool,
) -> Result<()> {
    util::validate_tools(&["ffmpeg", "ffprobe"])?;
    let input = util::to_absolute_path(input)?;
    ensure!(input.exists(), "Input file {:?} does not exist!", input);

    let scene_keyframes = keyframes::read_scene_keyframes(scenes_path)?;
    info!(
        "{count} scene cuts from {scenes}",
        count = scene_keyframes.len(),
        scenes = scenes_path.display()
    );

    let container = keyframes::detect(&input)?;
    info!(
        "{count} container keyframes over {total} frames",
        count = container.frames.len(),
        total = container.total_frames
    );

    // Merging runs only when both bounds are given, as in the standalone
    // splitter this replaces.
    let merge_window = (min_frames >= 0 && max_frames >= 0).then(|| MergeWindow {
        min_frames: min_frames as usize,
        max_frames: max_frames as usize,
    });

    let plan = split::plan(
        &scene_keyframes,
        &container.frames,
        container.total_frames,
        merge_window,
    )?;
    plan.write_to_file(plan_path)?;
    info!(
        "planned {units} encode units over {files} physical segments, plan written to {path}",
        units = plan.entries.len(),
        files = plan.segments.len(),
        path = plan_path.display()
    );

    info!("splitting into {dir}", dir = split_dir.display());
    progress_bar::init_progress_bar(container.total_frames as u64);
    ffmpeg::segment(&input, split_dir, &plan.split_points(), |frame| {
        progress_bar::set_pos(frame as u64);
    })?;
    progress_bar::finish_progress_bar();

    if no_verify {
        info!("skipping verification");
        return Ok(());
    }

    info!("verifying segments");
    verify::verify_segments(&input, split_dir, &plan.segments)?;
    Ok(())
}
