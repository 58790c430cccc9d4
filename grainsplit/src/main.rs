use std::{
    panic,
    path::PathBuf,
    process,
};

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing::level_filters::LevelFilter;

use crate::commands::{Cli, Commands};

mod commands;
mod logging;

pub const DEFAULT_LOG_PATH: &str = "grainsplit.log";

fn main() -> Result<()> {
    let orig_hook = panic::take_hook();
    // Catch panics in worker threads
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(1);
    }));
    run()
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Completions write a script to stdout; don't pull in logging for that.
    if let Commands::Completions {
        shell,
    } = &cli.command
    {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(*shell, &mut cmd, name, &mut std::io::stdout());
        return Ok(());
    }

    let log_file = cli.log_file.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH));
    let _guard = logging::init_logging(LevelFilter::INFO, &log_file, LevelFilter::DEBUG)?;

    grainsplit_core::progress_bar::set_quiet(cli.quiet);
    grainsplit_core::process::install_interrupt_handler()?;

    match cli.command {
        Commands::Split {
            input,
            split_dir,
            plan,
            scenes,
            min_frames,
            max_frames,
            no_verify,
        } => commands::split::split_handler(
            &input,
            &split_dir,
            &plan,
            &scenes,
            min_frames,
            max_frames,
            no_verify,
        ),
        Commands::Verify {
            input,
            split_dir,
            plan,
        } => commands::verify::verify_handler(&input, &split_dir, &plan),
        Commands::Generate {
            source,
            denoised,
            output,
            width,
            height,
            block_size,
            workers,
        } => commands::generate::generate_handler(
            &source,
            &denoised,
            &output,
            width,
            height,
            block_size,
            workers,
        ),
        Commands::Scale {
            input,
            output,
            scale,
        } => commands::scale::scale_handler(&input, &output, scale),
        Commands::Completions {
            ..
        } => unreachable!("handled before logging init"),
    }
}
