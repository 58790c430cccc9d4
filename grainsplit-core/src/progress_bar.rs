use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use once_cell::sync::OnceCell;

static PROGRESS_BAR: OnceCell<ProgressBar> = OnceCell::new();
static QUIET: AtomicBool = AtomicBool::new(false);

const INDICATIF_PROGRESS_TEMPLATE: &str = "{elapsed_precise:.bold} [{wide_bar:.blue/white.dim}] \
                                           {percent:.bold}% {pos}/{len} ({per_sec}, eta {eta})";

fn pretty_progress_style() -> ProgressStyle {
    ProgressStyle::with_template(INDICATIF_PROGRESS_TEMPLATE)
        .expect("template is valid")
        .progress_chars("#>-")
}

/// Suppress all progress bars for this run.
#[inline]
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::SeqCst);
}

/// Initialize the shared progress bar, or reset it for a new phase if it was
/// already initialized. In quiet mode (or when this is never called) every
/// function in this module is a no-op.
#[inline]
pub fn init_progress_bar(len: u64) {
    if QUIET.load(Ordering::SeqCst) {
        return;
    }
    let pb = PROGRESS_BAR.get_or_init(|| {
        let pb = ProgressBar::hidden();
        pb.set_style(pretty_progress_style());
        pb
    });
    pb.reset();
    pb.set_length(len);
    pb.set_draw_target(ProgressDrawTarget::stderr());
}

#[inline]
pub fn inc_bar(inc: u64) {
    if let Some(pb) = PROGRESS_BAR.get() {
        pb.inc(inc);
    }
}

#[inline]
pub fn set_pos(pos: u64) {
    if let Some(pb) = PROGRESS_BAR.get() {
        pb.set_position(pos);
    }
}

#[inline]
pub fn finish_progress_bar() {
    if let Some(pb) = PROGRESS_BAR.get() {
        pb.finish();
        pb.set_draw_target(ProgressDrawTarget::hidden());
        eprintln!();
    }
}
