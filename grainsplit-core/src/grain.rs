//! Per-segment grain model generation.
//!
//! Raw-frame extraction decodes whole segments to disk and must never run for
//! two jobs at once, so a single serializer thread owns it and services
//! requests strictly FIFO. Model computation is CPU-bound and runs on N
//! workers in parallel. Jobs whose grain table already exists are skipped
//! before any worker starts, which makes re-running the pipeline resume an
//! interrupted batch.

use std::{
    cmp,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{create_dir, process, progress_bar, split::SEGMENT_EXT, util};

#[derive(Debug, Error)]
pub enum GrainJobError {
    #[error("source extraction exited with {status}")]
    SourceExtraction { status: ExitStatus },
    #[error("denoised extraction exited with {status}")]
    DenoisedExtraction { status: ExitStatus },
    #[error("noise_model exited with {status}: {stderr}")]
    NoiseModel { status: ExitStatus, stderr: String },
}

/// One clean/denoised segment pair to compute a grain table for.
#[derive(Debug, Clone)]
pub struct GrainJob {
    pub name:     String,
    pub source:   PathBuf,
    pub denoised: PathBuf,
    pub table:    PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct GrainModelSettings {
    pub width:      u32,
    pub height:     u32,
    pub block_size: u32,
    pub workers:    usize,
}

#[derive(Debug)]
pub struct JobFailure {
    pub job:   String,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct GrainRunSummary {
    pub completed: usize,
    pub skipped:   usize,
    pub failures:  Vec<JobFailure>,
}

/// An extraction request travels to the serializer with its own one-shot
/// completion channel; a shared flag would race between jobs.
struct ExtractionRequest {
    job_name: String,
    clean:    Command,
    denoised: Command,
    done:     Sender<Result<()>>,
}

pub struct GrainModelPipeline {
    settings: GrainModelSettings,
    jobs:     Vec<GrainJob>,
    skipped:  usize,
    temp_dir: PathBuf,
}

/// Pair every denoised segment with its clean counterpart, skipping pairs
/// whose grain table already exists. Returns the jobs plus the skip count.
#[inline]
pub fn collect_jobs(
    split_dir: &Path,
    denoised_dir: &Path,
    tables_dir: &Path,
) -> Result<(Vec<GrainJob>, usize)> {
    create_dir!(tables_dir)?;

    let mut jobs = Vec::new();
    let mut skipped = 0usize;
    for name in util::list_segment_stems(denoised_dir)? {
        let table = tables_dir.join(format!("{name}.table"));
        if table.exists() {
            skipped += 1;
            continue;
        }
        let source = split_dir.join(format!("{name}.{SEGMENT_EXT}"));
        let denoised = denoised_dir.join(format!("{name}.{SEGMENT_EXT}"));
        jobs.push(GrainJob {
            name,
            source,
            denoised,
            table,
        });
    }

    Ok((jobs, skipped))
}

impl GrainModelPipeline {
    #[inline]
    pub fn new(
        settings: GrainModelSettings,
        jobs: Vec<GrainJob>,
        skipped: usize,
        temp_dir: &Path,
    ) -> Self {
        Self {
            settings,
            jobs,
            skipped,
            temp_dir: temp_dir.to_path_buf(),
        }
    }

    /// Run the pipeline to completion. The call returns once the job queue
    /// is drained and every dispatched extraction request was acknowledged;
    /// per-job failures are collected in the summary instead of aborting
    /// sibling workers.
    #[inline]
    pub fn run(&self) -> Result<GrainRunSummary> {
        let total = self.jobs.len();
        if total == 0 {
            info!(
                "all grain tables already present ({skipped} skipped), nothing to do",
                skipped = self.skipped
            );
            return Ok(GrainRunSummary {
                skipped: self.skipped,
                ..GrainRunSummary::default()
            });
        }

        let workers = cmp::max(1, cmp::min(self.settings.workers, total));
        info!(
            "{}{} {} {}{} {} {}{} {}x{} (block size {})",
            "Q".green().bold(),
            "ueue".green(),
            format!("{total}").green().bold(),
            "W".blue().bold(),
            "orkers".blue(),
            format!("{workers}").blue().bold(),
            "R".purple().bold(),
            "esolution".purple(),
            self.settings.width,
            self.settings.height,
            self.settings.block_size
        );
        if self.skipped > 0 {
            info!("{skipped} grain tables already present, skipping", skipped = self.skipped);
        }

        progress_bar::init_progress_bar(total as u64);

        let (job_tx, job_rx) = unbounded();
        for job in &self.jobs {
            job_tx
                .send(job.clone())
                .map_err(|_| anyhow!("job queue closed before filling"))?;
        }
        drop(job_tx);

        let (extraction_tx, extraction_rx) = unbounded::<ExtractionRequest>();
        let completed = AtomicUsize::new(0);

        let failures = crossbeam_utils::thread::scope(|s| {
            let serializer = s.spawn(|_| extraction_loop(&extraction_rx));

            let handles: Vec<_> = (0..workers)
                .map(|worker_id| {
                    let job_rx = job_rx.clone();
                    let extraction_tx = extraction_tx.clone();
                    let completed = &completed;
                    s.spawn(move |_| {
                        self.worker_loop(worker_id, &job_rx, &extraction_tx, completed, total)
                    })
                })
                .collect();
            // The serializer exits once the last worker drops its sender.
            drop(extraction_tx);
            drop(job_rx);

            let mut failures = Vec::new();
            for handle in handles {
                failures.extend(handle.join().expect("worker thread panicked"));
            }
            serializer.join().expect("extraction serializer panicked");
            failures
        })
        .map_err(|_| anyhow!("grain pipeline thread panicked"))?;

        progress_bar::finish_progress_bar();

        if process::interrupted() {
            return Err(process::Interrupted.into());
        }

        Ok(GrainRunSummary {
            completed: completed.load(Ordering::SeqCst),
            skipped: self.skipped,
            failures,
        })
    }

    fn worker_loop(
        &self,
        worker_id: usize,
        jobs: &Receiver<GrainJob>,
        extraction_tx: &Sender<ExtractionRequest>,
        completed: &AtomicUsize,
        total: usize,
    ) -> Vec<JobFailure> {
        let mut failures = Vec::new();
        for job in jobs {
            if process::interrupted() {
                break;
            }
            debug!("worker {worker_id}: starting {name}", name = job.name);

            match self.run_job(&job, extraction_tx) {
                Ok(()) => {
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    info!("grain model {done}/{total}: {name}", name = job.name);
                },
                Err(e) => {
                    if e.is::<process::Interrupted>() {
                        break;
                    }
                    error!("grain model failed for segment {name}: {e:#}", name = job.name);
                    failures.push(JobFailure {
                        job:   job.name.clone(),
                        error: e,
                    });
                },
            }
            progress_bar::inc_bar(1);
        }
        failures
    }

    fn run_job(&self, job: &GrainJob, extraction_tx: &Sender<ExtractionRequest>) -> Result<()> {
        // Raw buffers live exactly as long as this call; dropping the handles
        // deletes them on every exit path, failure included.
        let clean_buffer = raw_buffer(&self.temp_dir, &job.name, "clean")?;
        let denoised_buffer = raw_buffer(&self.temp_dir, &job.name, "denoised")?;

        let (done_tx, done_rx) = bounded(1);
        extraction_tx
            .send(ExtractionRequest {
                job_name: job.name.clone(),
                clean:    extraction_command(&job.source, clean_buffer.path()),
                denoised: extraction_command(&job.denoised, denoised_buffer.path()),
                done:     done_tx,
            })
            .map_err(|_| anyhow!("extraction serializer exited early"))?;
        done_rx
            .recv()
            .map_err(|_| anyhow!("extraction serializer dropped the request"))??;

        let mut cmd = Command::new("noise_model");
        cmd.arg(format!("--input={}", clean_buffer.path().display()))
            .arg(format!("--input-denoised={}", denoised_buffer.path().display()))
            .arg(format!("--output-grain-table={}", job.table.display()))
            .arg(format!("--width={}", self.settings.width))
            .arg(format!("--height={}", self.settings.height))
            .arg(format!("--block-size={}", self.settings.block_size));

        let out = process::run_interruptible(&mut cmd, "noise_model")?;
        if !out.status.success() {
            return Err(GrainJobError::NoiseModel {
                status: out.status,
                stderr: out.stderr.trim().to_owned(),
            }
            .into());
        }
        Ok(())
    }
}

/// The extraction serializer: drains requests strictly FIFO. The two
/// extractions of one request run concurrently with each other, but never
/// with another request's.
fn extraction_loop(requests: &Receiver<ExtractionRequest>) {
    for mut request in requests {
        let result = run_extraction_pair(&mut request);
        // The requester is gone only if its worker bailed out on interrupt.
        let _ = request.done.send(result);
    }
}

fn run_extraction_pair(request: &mut ExtractionRequest) -> Result<()> {
    debug!("extracting raw frames for {name}", name = request.job_name);

    let mut clean = request
        .clean
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn ffmpeg. Is it installed in the system path?")?;
    let mut denoised = match request
        .denoised
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            process::kill_child(&mut clean);
            return Err(e).context("Failed to spawn ffmpeg. Is it installed in the system path?");
        },
    };

    // Wait on both before reporting; on interrupt the second wait kills its
    // child immediately instead of orphaning it.
    let clean_status = process::wait_interruptible(&mut clean);
    let denoised_status = process::wait_interruptible(&mut denoised);

    let clean_status = clean_status?;
    let denoised_status = denoised_status?;
    if !clean_status.success() {
        return Err(GrainJobError::SourceExtraction {
            status: clean_status,
        }
        .into());
    }
    if !denoised_status.success() {
        return Err(GrainJobError::DenoisedExtraction {
            status: denoised_status,
        }
        .into());
    }
    Ok(())
}

fn extraction_command(input: &Path, output: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-loglevel", "error", "-i"])
        .arg(input)
        .arg("-y")
        .arg(output);
    cmd
}

fn raw_buffer(temp_dir: &Path, job: &str, role: &str) -> Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(&format!("{job}_{role}_"))
        .suffix(".yuv")
        .tempfile_in(temp_dir)
        .with_context(|| format!("Failed to create raw frame buffer for {job}"))
}
