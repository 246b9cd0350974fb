//! Argument Parser for with-mount
//!
//! Syntax:
//! $ with-mount [options] <mount-command...> -- <program> [program-args...]
//!
//! Options:
//! --mountpoint <path>   Mount at an existing directory instead of a temporary one
//! --allow-empty         Do not fail when the mounted directory has no entries
//!
//! The mount command must contain the MOUNTPOINT placeholder, which is replaced
//! with the resolved mountpoint before the command is launched.

use std::path::{Path, PathBuf};

use crate::error::{Result, SupervisorError};

/// Separator between the mount command and the program invocation
pub const SEPARATOR: &str = "--";

/// What to mount and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Mount command tokens, still containing the placeholder
    pub command_template: Vec<String>,
    /// Caller-supplied persistent mountpoint
    pub custom_mountpoint: Option<PathBuf>,
    /// Skip the non-empty check after mounting
    pub allow_empty: bool,
}

/// The program to run inside the mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInvocation {
    /// Absolute path, or a bare name to be looked up in PATH
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Result of parsing arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArgs {
    pub mount: MountRequest,
    pub program: ProgramInvocation,
}

/// Parse command line arguments into a mount request and a program invocation.
///
/// `original_dir` is the directory the supervisor was started in; relative
/// program paths are resolved against it, never against the mountpoint.
pub fn parse_args(args: &[String], original_dir: &Path) -> Result<ParsedArgs> {
    let mut custom_mountpoint = None;
    let mut allow_empty = false;

    let mut i = 0;
    while i < args.len() {
        match parse_option(args, i, &mut custom_mountpoint, &mut allow_empty)? {
            0 => break,
            consumed => i += consumed,
        }
    }

    let rest = &args[i..];
    let sep_idx = rest.iter().position(|a| a == SEPARATOR).ok_or_else(|| {
        SupervisorError::Usage(format!(
            "Missing \"{}\" between the mount command and the program",
            SEPARATOR
        ))
    })?;

    let command_template = rest[..sep_idx].to_vec();
    if command_template.is_empty() {
        return Err(SupervisorError::Usage("No mount command provided".to_string()));
    }

    let program_args = &rest[sep_idx + 1..];
    let (program, args) = program_args
        .split_first()
        .ok_or_else(|| SupervisorError::Usage("No program provided".to_string()))?;

    Ok(ParsedArgs {
        mount: MountRequest {
            command_template,
            custom_mountpoint,
            allow_empty,
        },
        program: ProgramInvocation {
            program: resolve_program_path(program, original_dir),
            args: args.to_vec(),
        },
    })
}

/// Parse a single option from args array
/// Returns number of arguments consumed (0 if not recognized)
fn parse_option(
    args: &[String],
    index: usize,
    mountpoint: &mut Option<PathBuf>,
    allow_empty: &mut bool,
) -> Result<usize> {
    let arg = &args[index];

    // --mountpoint <path>
    if arg == "--mountpoint" {
        return match args.get(index + 1) {
            Some(value) if value != SEPARATOR => {
                *mountpoint = Some(PathBuf::from(value));
                Ok(2)
            }
            _ => Err(SupervisorError::Usage(format!(
                "Option {} requires a path argument",
                arg
            ))),
        };
    }

    // --mountpoint=<path>
    if let Some(value) = arg.strip_prefix("--mountpoint=") {
        if value.is_empty() {
            return Err(SupervisorError::Usage(
                "Option --mountpoint requires a path argument".to_string(),
            ));
        }
        *mountpoint = Some(PathBuf::from(value));
        return Ok(1);
    }

    // --allow-empty
    if arg == "--allow-empty" {
        *allow_empty = true;
        return Ok(1);
    }

    // Not a recognized option, the mount command starts here
    Ok(0)
}

/// Make a program path absolute against the original directory.
///
/// Bare names are left alone so they are resolved through PATH at spawn time.
pub fn resolve_program_path(program: &str, original_dir: &Path) -> PathBuf {
    let path = Path::new(program);
    if path.is_absolute() || !program.contains('/') {
        path.to_path_buf()
    } else {
        original_dir.join(path)
    }
}
