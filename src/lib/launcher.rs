//! Process Launcher
//!
//! Runs the supervised program inside the mount and reports how it ended.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::args_parser::ProgramInvocation;
use crate::config::ORIGINAL_PWD_VAR;
use crate::error::{Result, SupervisorError};
use crate::mount::signal_process_group;
use crate::signal_handler::InterruptCheck;

/// How the supervised program ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramOutcome {
    pub status: ExitStatus,
    /// First interrupt the supervisor received while the program ran
    pub interrupted: Option<i32>,
}

impl ProgramOutcome {
    /// The program's exit code, or 128 + signal when it was killed
    pub fn exit_code(&self) -> i32 {
        exit_code_of(self.status)
    }
}

/// Exit code of a finished process, shell style
pub fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => 1,
    }
}

/// Start the program with the mount as working directory.
///
/// The child sees the supervisor's starting directory in `WITH_MOUNT_ORIGINAL_PWD`.
/// Failing to start maps to a spawn error (exit 126/127), never to a program code.
pub fn spawn_program(
    invocation: &ProgramInvocation,
    mount_path: &Path,
    original_dir: &Path,
) -> Result<Child> {
    debug!(
        "Starting {} {:?} in {}",
        invocation.program.display(),
        invocation.args,
        mount_path.display()
    );
    Command::new(&invocation.program)
        .args(&invocation.args)
        .current_dir(mount_path)
        .env("PWD", mount_path)
        .env(ORIGINAL_PWD_VAR, original_dir)
        .spawn()
        .map_err(|source| SupervisorError::Spawn {
            program: invocation.program.display().to_string(),
            source,
        })
}

/// Wait for the program to finish.
///
/// An interrupt received by the supervisor is forwarded to the program once. A
/// further interrupt, or the program outliving `grace` after the forward,
/// escalates to SIGKILL. The mount stays up until the program has exited.
pub fn wait_program(
    child: &mut Child,
    interrupts: &dyn InterruptCheck,
    poll_interval: Duration,
    grace: Duration,
) -> Result<ProgramOutcome> {
    let mut forwarded = 0;
    let mut forwarded_at: Option<Instant> = None;
    let mut killed = false;
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| SupervisorError::Internal(format!("Failed to wait for program: {}", e)))?
        {
            return Ok(ProgramOutcome {
                status,
                interrupted: interrupts.pending(),
            });
        }

        if let Some(sig) = interrupts.pending() {
            let count = interrupts.count().max(1);
            if forwarded == 0 {
                warn!("Received signal {}, waiting for the program to exit", sig);
                forward_signal(child.id(), sig);
                forwarded = count;
                forwarded_at = Some(Instant::now());
            } else if !killed && count > forwarded {
                warn!("Received another interrupt, killing the program");
                forward_signal(child.id(), libc::SIGKILL);
                killed = true;
            }
        }

        if let Some(at) = forwarded_at {
            if !killed && at.elapsed() >= grace {
                warn!("Program still running {:?} after the interrupt, killing it", grace);
                forward_signal(child.id(), libc::SIGKILL);
                killed = true;
            }
        }

        thread::sleep(poll_interval);
    }
}

fn forward_signal(pid: u32, sig: i32) {
    // SAFETY: kill has no memory-safety preconditions
    let sent = unsafe { libc::kill(pid as libc::pid_t, sig) } == 0;
    if !sent {
        // The program may have started its own group; try that before giving up
        let _ = signal_process_group(pid, sig);
    }
}
