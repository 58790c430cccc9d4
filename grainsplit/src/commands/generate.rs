use std::{
    cmp,
    path::Path,
    thread::available_parallelism,
};

use anyhow::{bail, ensure, Result};
use grainsplit_core::{
    ffmpeg,
    grain::{self, GrainModelPipeline, GrainModelSettings},
    util,
};
use tracing::info;

pub fn generate_handler(
    source_dir: &Path,
    denoised_dir: &Path,
    output_dir: &Path,
    width: Option<u32>,
    height: Option<u32>,
    block_size: u32,
    workers: Option<usize>,
) -> Result<()> {
    util::validate_tools(&["ffmpeg", "ffprobe", "noise_model"])?;
    ensure!(
        source_dir.is_dir(),
        "Source segment directory {:?} does not exist!",
        source_dir
    );
    ensure!(
        denoised_dir.is_dir(),
        "Denoised segment directory {:?} does not exist!",
        denoised_dir
    );

    let (jobs, skipped) = grain::collect_jobs(source_dir, denoised_dir, output_dir)?;
    if jobs.is_empty() {
        info!("all {skipped} grain tables already present, nothing to do");
        return Ok(());
    }

    let (width, height) = match (width, height) {
        (Some(width), Some(height)) => (width, height),
        _ => {
            let (probed_width, probed_height) = ffmpeg::probe_resolution(&jobs[0].source)?;
            info!("probed segment resolution {probed_width}x{probed_height}");
            (
                width.unwrap_or(probed_width),
                height.unwrap_or(probed_height),
            )
        },
    };

    let settings = GrainModelSettings {
        width,
        height,
        block_size,
        workers: workers.unwrap_or_else(default_workers),
    };

    let summary = GrainModelPipeline::new(settings, jobs, skipped, output_dir).run()?;

    if !summary.failures.is_empty() {
        bail!(
            "{count} grain jobs failed: {names}",
            count = summary.failures.len(),
            names = summary
                .failures
                .iter()
                .map(|f| f.job.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    info!(
        "generated {completed} grain tables ({skipped} were already present)",
        completed = summary.completed,
        skipped = summary.skipped
    );
    Ok(())
}

fn default_workers() -> usize {
    available_parallelism().map_or(1, |cores| cmp::max(1, cores.get() / 2))
}
