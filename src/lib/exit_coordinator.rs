//! Exit Coordinator
//!
//! Tracks how far a run got, decides the single final exit code and drives
//! cleanup of the mount exactly once, whatever ended the run.

use log::{debug, error};

use crate::error::{ExitCause, SupervisorError, EXIT_GENERIC};
use crate::launcher::ProgramOutcome;
use crate::mount::{MountHandle, MountProbe};

/// How far a run has progressed. Only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SupervisionState {
    Init,
    ArgsParsed,
    Mounting,
    Mounted,
    Launched,
}

/// Raw result of a run, before the final code is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub raw_code: i32,
    pub cause: ExitCause,
}

impl ExitOutcome {
    pub fn from_program(outcome: &ProgramOutcome) -> Self {
        match outcome.interrupted {
            Some(_) => Self {
                raw_code: EXIT_GENERIC,
                cause: ExitCause::ExternalInterrupt,
            },
            None => Self {
                raw_code: outcome.exit_code(),
                cause: ExitCause::ProgramExit,
            },
        }
    }

    pub fn from_error(err: &SupervisorError) -> Self {
        Self {
            raw_code: err.exit_code(),
            cause: err.cause(),
        }
    }
}

/// Final exit code for a run that ended in `state` with `outcome`.
///
/// A program's own code passes through, so 255 from the program and 255 from
/// an interrupt are indistinguishable.
pub fn decide_exit_code(state: SupervisionState, outcome: &ExitOutcome) -> i32 {
    let launched = state == SupervisionState::Launched;
    match outcome.cause {
        ExitCause::ExternalInterrupt => EXIT_GENERIC,
        ExitCause::ProgramExit if launched => outcome.raw_code & 0xff,
        // A program exit cannot happen before launch
        ExitCause::ProgramExit => EXIT_GENERIC,
        // Nothing legitimately ends with 0 before the program ran
        _ if !launched && outcome.raw_code == 0 => EXIT_GENERIC,
        ExitCause::SpawnFailure | ExitCause::InternalError => {
            if (1..=255).contains(&outcome.raw_code) {
                outcome.raw_code
            } else {
                EXIT_GENERIC
            }
        }
    }
}

pub struct ExitCoordinator<'a> {
    state: SupervisionState,
    mount: Option<MountHandle>,
    probe: &'a dyn MountProbe,
    final_code: Option<i32>,
}

impl<'a> ExitCoordinator<'a> {
    pub fn new(probe: &'a dyn MountProbe) -> Self {
        Self {
            state: SupervisionState::Init,
            mount: None,
            probe,
            final_code: None,
        }
    }

    pub fn state(&self) -> SupervisionState {
        self.state
    }

    /// Move to `next`; a request to go backwards is ignored
    pub fn advance(&mut self, next: SupervisionState) {
        if next > self.state {
            debug!("State {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Take ownership of the mountpoint so every exit path cleans it up
    pub fn adopt_mount(&mut self, handle: MountHandle) -> &mut MountHandle {
        self.mount.insert(handle)
    }

    pub fn mount(&self) -> Option<&MountHandle> {
        self.mount.as_ref()
    }

    /// Stop the mount, then remove a temporary mountpoint. Safe to repeat:
    /// finished steps are no-ops the second time. Both steps are attempted even
    /// when the first fails; the first error is returned.
    pub fn cleanup(&mut self) -> Result<(), SupervisorError> {
        let Some(mount) = self.mount.as_mut() else {
            return Ok(());
        };

        let stopped = mount.stop(self.probe);
        if let Err(ref e) = stopped {
            error!("{}", e);
        }
        // Removing the directory under a live mount would fail anyway and
        // could hide the real problem
        if mount.has_process() {
            return stopped;
        }
        let removed = mount.remove_dir();
        if let Err(ref e) = removed {
            error!("{}", e);
        }
        stopped.and(removed)
    }

    /// Decide the final code for `outcome`, run cleanup and return the code to
    /// exit with. Cleanup failure escalates to 255. Calling it again returns
    /// the first decision.
    pub fn finish(&mut self, outcome: ExitOutcome) -> i32 {
        if let Some(code) = self.final_code {
            let _ = self.cleanup();
            return code;
        }

        let mut code = decide_exit_code(self.state, &outcome);
        debug!(
            "Run ended in state {:?} with {:?}, exit code {}",
            self.state, outcome, code
        );

        if self.cleanup().is_err() {
            code = EXIT_GENERIC;
        }
        self.final_code = Some(code);
        code
    }
}
