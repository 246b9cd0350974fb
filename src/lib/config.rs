//! Configuration from environment variables
//!
//! WITH_MOUNT_VERBOSE       Enable debug diagnostics (1 or true)
//! WITH_MOUNT_TIMEOUT       Seconds to wait for the mount to become ready (default: forever)
//! WITH_MOUNT_STOP_TIMEOUT  Seconds allowed for each teardown phase (default: 10)
//! WITH_MOUNT_POLL_MS       Polling interval in milliseconds (default: 100)
//! WITH_MOUNT_READY         When the mount counts as ready: mount (default) or entries

use std::env;
use std::time::Duration;

use crate::error::{Result, SupervisorError};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Environment binding that exposes the supervisor's original directory to the child
pub const ORIGINAL_PWD_VAR: &str = "WITH_MOUNT_ORIGINAL_PWD";

/// How the default probe decides that the mount is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyCheck {
    /// A new filesystem appears at the mountpoint (device or root inode changes)
    #[default]
    Mounted,
    /// The mountpoint, empty at launch, gains entries. For mount commands that
    /// fill a directory instead of mounting over it; they must empty it again
    /// when terminated.
    Populated,
}

impl ReadyCheck {
    fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "mount" => Ok(Self::Mounted),
            "entries" => Ok(Self::Populated),
            other => Err(SupervisorError::Usage(format!(
                "Invalid value for WITH_MOUNT_READY: \"{}\" (expected mount or entries)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Verbose mode
    pub verbose: bool,
    /// Readiness timeout; None waits as long as the mount command runs
    pub mount_timeout: Option<Duration>,
    /// Bound for each teardown phase (process exit, unmount)
    pub stop_timeout: Duration,
    /// Interval for every polling loop
    pub poll_interval: Duration,
    /// Readiness criterion of the default probe
    pub ready_check: ReadyCheck,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose: false,
            mount_timeout: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            ready_check: ReadyCheck::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from any variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            verbose: lookup("WITH_MOUNT_VERBOSE").is_some_and(|v| v == "1" || v == "true"),
            mount_timeout: parse_number(&lookup, "WITH_MOUNT_TIMEOUT")?.map(Duration::from_secs),
            stop_timeout: parse_number(&lookup, "WITH_MOUNT_STOP_TIMEOUT")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.stop_timeout),
            poll_interval: parse_number(&lookup, "WITH_MOUNT_POLL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            ready_check: match lookup("WITH_MOUNT_READY") {
                Some(value) if !value.trim().is_empty() => ReadyCheck::parse(&value)?,
                _ => defaults.ready_check,
            },
        })
    }
}

fn parse_number<F>(lookup: &F, name: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value.trim().parse::<u64>().map(Some).map_err(|_| {
            SupervisorError::Usage(format!(
                "Invalid value for {}: \"{}\" (expected a non-negative integer)",
                name, value
            ))
        }),
    }
}
