//! with-mount library
//!
//! Mounts a filesystem with an external mount command, runs a program inside it
//! and always tears the mount down, exiting with one well-defined code.

#[cfg(not(unix))]
compile_error!("with-mount supports Unix-like systems only");

pub mod args_parser;
pub mod config;
pub mod diagnostic_sink;
pub mod error;
pub mod exit_coordinator;
pub mod launcher;
pub mod mount;
pub mod signal_handler;
pub mod substitution;
pub mod supervisor;

// Re-export commonly used items
pub use args_parser::{parse_args, MountRequest, ParsedArgs, ProgramInvocation};
pub use config::{Config, ReadyCheck, ORIGINAL_PWD_VAR};
pub use diagnostic_sink::{install_logger, Channel, DiagnosticSink};
pub use error::{
    ExitCause, SupervisorError, EXIT_FAILURE, EXIT_GENERIC, EXIT_NOT_EXECUTABLE, EXIT_NOT_FOUND,
};
pub use exit_coordinator::{decide_exit_code, ExitCoordinator, ExitOutcome, SupervisionState};
pub use launcher::{spawn_program, wait_program, ProgramOutcome};
pub use mount::{terminate_process_group, FuseProbe, MountBaseline, MountHandle, MountProbe};
pub use signal_handler::{setup_signal_handlers, InterruptCheck, ProcessSignals};
pub use substitution::{substitute_mountpoint, PLACEHOLDER};
pub use supervisor::{supervise, RunContext};
