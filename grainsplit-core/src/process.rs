//! Interruptible supervision of external tool processes.
//!
//! Every blocking wait on a child process goes through [`wait_interruptible`]
//! so that an interrupt kills in-flight ffmpeg/noise_model children before it
//! propagates, at every blocking point rather than only the outermost one.

use std::{
    io::Read,
    process::{Child, Command, ExitStatus, Stdio},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use thiserror::Error;
use tracing::warn;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The run was interrupted (Ctrl-C); in-flight children have been killed.
#[derive(Debug, Clone, Copy, Error)]
#[error("interrupted")]
pub struct Interrupted;

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

/// Install the Ctrl-C handler. The first interrupt only raises the flag so
/// that waiters can reap their children; a second one exits immediately.
#[inline]
pub fn install_interrupt_handler() -> Result<()> {
    ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("\ninterrupt received, stopping child processes");
    })
    .context("Failed to install interrupt handler")
}

#[inline]
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Wait for a child, polling the interrupt flag. On interrupt the child is
/// killed and reaped before [`Interrupted`] is returned.
#[inline]
pub fn wait_interruptible(child: &mut Child) -> Result<ExitStatus> {
    loop {
        if interrupted() {
            kill_child(child);
            bail!(Interrupted);
        }
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

/// Kill and reap a child, e.g. when its sibling in a pipeline failed.
#[inline]
pub fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("failed to kill child process {id}: {e}", id = child.id());
    }
    let _ = child.wait();
}

/// Run a command to completion, capturing stderr for error context. Stdout is
/// discarded; the tools driven here report on stderr.
#[inline]
pub fn run_interruptible(cmd: &mut Command, tool: &str) -> Result<CommandOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn {tool}. Is it installed in the system path?"))?;

    // Drain stderr on a separate thread so the child can never fill the pipe
    // and stall while we poll for its exit.
    let mut stderr_pipe = child.stderr.take().context("Failed to capture stderr")?;
    let reader = thread::spawn(move || {
        let mut buf = String::new();
        let _ = stderr_pipe.read_to_string(&mut buf);
        buf
    });

    let status = wait_interruptible(&mut child)?;
    let stderr = reader.join().unwrap_or_default();

    Ok(CommandOutput {
        status,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stderr_and_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);
        let out = run_interruptible(&mut cmd, "sh").expect("sh should spawn");
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[test]
    fn missing_tool_reports_name() {
        let mut cmd = Command::new("definitely-not-a-real-tool");
        let err = run_interruptible(&mut cmd, "definitely-not-a-real-tool").unwrap_err();
        assert!(err.to_string().contains("definitely-not-a-real-tool"));
    }
}
