use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

pub mod generate;
pub mod scale;
pub mod split;
pub mod verify;

#[derive(Parser, Debug)]
#[command(
    name = "grainsplit",
    version,
    about = "Lossless video segmentation and per-segment film grain model generation"
)]
pub struct Cli {
    /// Suppress progress bars.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log file path (default: ./grainsplit.log).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan and perform a lossless split of a video at container keyframes,
    /// then verify the produced segments.
    Split {
        /// Input video.
        #[arg(short, long)]
        input: PathBuf,

        /// Directory the physical segment files are written to.
        #[arg(short = 'o', long)]
        split_dir: PathBuf,

        /// Path the split plan is written to.
        #[arg(short = 's', long)]
        plan: PathBuf,

        /// Scene-cut frame indices from the scene detector (JSON array).
        #[arg(long)]
        scenes: PathBuf,

        /// Scene-merge window lower bound; -1 disables merging.
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        min_frames: i64,

        /// Scene-merge window upper bound; -1 disables merging.
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        max_frames: i64,

        /// Skip the verification pass after splitting.
        #[arg(long)]
        no_verify: bool,
    },

    /// Verify the frame counts of already split segments against a plan,
    /// re-encoding damaged ones losslessly from the source.
    Verify {
        /// The original source video.
        #[arg(short, long)]
        input: PathBuf,

        /// Directory holding the physical segment files.
        #[arg(short = 'o', long)]
        split_dir: PathBuf,

        /// Plan file written by `split`.
        #[arg(short = 's', long)]
        plan: PathBuf,
    },

    /// Generate grain tables from clean and denoised segment pairs.
    Generate {
        /// Directory with the clean source segments.
        source: PathBuf,

        /// Directory with the denoised segments.
        denoised: PathBuf,

        /// Output directory for the grain tables.
        output: PathBuf,

        /// Frame width (default: probed from the first segment).
        #[arg(long)]
        width: Option<u32>,

        /// Frame height (default: probed from the first segment).
        #[arg(long)]
        height: Option<u32>,

        /// Noise model block size.
        #[arg(long, default_value_t = 40)]
        block_size: u32,

        /// Model computation workers (default: half the logical cores).
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Rescale the luma parameters of a grain table, or of every table in a
    /// directory.
    Scale {
        /// Grain table file or directory of tables.
        input: PathBuf,

        /// Output file or directory.
        output: PathBuf,

        /// Scale factor applied to luma coefficients.
        #[arg(long, default_value_t = 0.8)]
        scale: f64,
    },

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}
