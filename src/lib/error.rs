//! Error taxonomy for with-mount
//!
//! Every failure, from any stage of a run, is expressed as a [`SupervisorError`]
//! and funnelled through the exit coordinator, which maps it to a final code.

use std::io;

use thiserror::Error;

/// Exit code for malformed arguments and mount setup failures
pub const EXIT_FAILURE: i32 = 1;

/// Program was found but could not be executed
pub const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Program was not found
pub const EXIT_NOT_FOUND: i32 = 127;

/// Generic failure: internal error, interrupt received, cleanup failure,
/// or the child itself exited 255
pub const EXIT_GENERIC: i32 = 255;

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    ProgramExit,
    SpawnFailure,
    ExternalInterrupt,
    InternalError,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    MountSetup(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Interrupted by signal {0}")]
    Interrupted(i32),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SupervisorError {
    /// Exit code this error produces when it ends the run
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::MountSetup(_) => EXIT_FAILURE,
            Self::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                EXIT_NOT_FOUND
            }
            Self::Spawn { .. } => EXIT_NOT_EXECUTABLE,
            Self::Interrupted(_) | Self::Cleanup(_) | Self::Internal(_) => EXIT_GENERIC,
        }
    }

    pub fn cause(&self) -> ExitCause {
        match self {
            Self::Spawn { .. } => ExitCause::SpawnFailure,
            Self::Interrupted(_) => ExitCause::ExternalInterrupt,
            Self::Usage(_) | Self::MountSetup(_) | Self::Cleanup(_) | Self::Internal(_) => {
                ExitCause::InternalError
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
