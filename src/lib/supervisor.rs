//! One supervised run: parse, mount, launch, then exit through the coordinator

use std::path::PathBuf;

use log::error;

use crate::args_parser::parse_args;
use crate::config::Config;
use crate::error::{Result, SupervisorError};
use crate::exit_coordinator::{ExitCoordinator, ExitOutcome, SupervisionState};
use crate::launcher::{spawn_program, wait_program, ProgramOutcome};
use crate::mount::{MountHandle, MountProbe};
use crate::signal_handler::InterruptCheck;

/// Everything a run depends on besides its arguments
pub struct RunContext<'a> {
    pub config: &'a Config,
    pub probe: &'a dyn MountProbe,
    pub interrupts: &'a dyn InterruptCheck,
    /// Directory the supervisor was started in
    pub original_dir: PathBuf,
    /// Where temporary mountpoints are created
    pub temp_base: PathBuf,
}

/// Run the whole lifecycle for `args` and return the process exit code.
/// Every failure ends here; nothing is retried.
pub fn supervise(args: &[String], ctx: &RunContext) -> i32 {
    let mut coordinator = ExitCoordinator::new(ctx.probe);

    let outcome = match run_stages(args, ctx, &mut coordinator) {
        Ok(program) => ExitOutcome::from_program(&program),
        Err(err) => {
            match err {
                SupervisorError::Usage(_) => {
                    error!("{} (run with --help for usage)", err)
                }
                _ => error!("{}", err),
            }
            ExitOutcome::from_error(&err)
        }
    };

    coordinator.finish(outcome)
}

fn run_stages(
    args: &[String],
    ctx: &RunContext,
    coordinator: &mut ExitCoordinator,
) -> Result<ProgramOutcome> {
    check_interrupt(ctx.interrupts)?;
    let parsed = parse_args(args, &ctx.original_dir)?;
    coordinator.advance(SupervisionState::ArgsParsed);

    check_interrupt(ctx.interrupts)?;
    coordinator.advance(SupervisionState::Mounting);
    let mount = coordinator.adopt_mount(MountHandle::resolve(&parsed.mount, &ctx.temp_base)?);
    mount.launch(&parsed.mount.command_template)?;
    mount.wait_ready(ctx.probe, ctx.interrupts, parsed.mount.allow_empty)?;
    let mount_path = mount.path().to_path_buf();
    coordinator.advance(SupervisionState::Mounted);

    check_interrupt(ctx.interrupts)?;
    let mut child = spawn_program(&parsed.program, &mount_path, &ctx.original_dir)?;
    coordinator.advance(SupervisionState::Launched);

    wait_program(
        &mut child,
        ctx.interrupts,
        ctx.config.poll_interval,
        ctx.config.stop_timeout,
    )
}

fn check_interrupt(interrupts: &dyn InterruptCheck) -> Result<()> {
    match interrupts.pending() {
        Some(sig) => Err(SupervisorError::Interrupted(sig)),
        None => Ok(()),
    }
}

/// Temporary mountpoints live in the system temp directory (honours TMPDIR)
pub fn default_temp_base() -> PathBuf {
    std::env::temp_dir()
}

/// Directory the supervisor was started in, captured before anything changes it
pub fn original_dir() -> Result<PathBuf> {
    std::env::current_dir().map_err(|e| {
        SupervisorError::Internal(format!("Cannot determine the current directory: {}", e))
    })
}

