//! Mount Lifecycle Manager
//!
//! Resolves the mountpoint, launches the mount command in its own session,
//! waits for the mount to become usable and tears it down again. Readiness and
//! teardown go through the [`MountProbe`] trait; [`FuseProbe`] is the default.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::args_parser::MountRequest;
use crate::config::{Config, ReadyCheck};
use crate::error::{Result, SupervisorError};
use crate::signal_handler::InterruptCheck;
use crate::substitution::substitute_mountpoint;

/// Prefix of temporary mountpoint directories
pub const TEMP_MOUNT_PREFIX: &str = "with-mount-";

/// State of the mountpoint captured right before the mount command starts.
/// Readiness and teardown are judged against it, so a directory that already
/// was a mount root is not mistaken for the new mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountBaseline {
    pub dev: u64,
    pub ino: u64,
    pub had_entries: bool,
}

impl MountBaseline {
    pub fn capture(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path).map_err(|e| {
            SupervisorError::MountSetup(format!("Failed to inspect {}: {}", path.display(), e))
        })?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
            had_entries: !is_empty_dir(path)?,
        })
    }

    /// Whether a different filesystem root now sits at `path`
    pub fn replaced_at(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|meta| (meta.dev(), meta.ino()) != (self.dev, self.ino))
            .unwrap_or(false)
    }
}

/// Readiness and teardown of a running mount command
pub trait MountProbe {
    /// Block until `path` is usable, the mount process dies or an interrupt arrives
    fn wait_for_mount(
        &self,
        process: &mut Child,
        path: &Path,
        baseline: &MountBaseline,
        interrupts: &dyn InterruptCheck,
    ) -> Result<()>;

    /// Stop the mount process group and wait until `path` is back to `baseline`.
    /// Must tolerate a process that has already exited.
    fn stop_mount(&self, process: &mut Child, path: &Path, baseline: &MountBaseline)
        -> Result<()>;
}

/// Probe for FUSE-style mount commands (rclone mount, sshfs -f, ...) that stay
/// in the foreground while the filesystem is mounted
#[derive(Debug, Clone)]
pub struct FuseProbe {
    pub timeout: Option<Duration>,
    pub stop_timeout: Duration,
    pub poll_interval: Duration,
    pub ready_check: ReadyCheck,
}

impl FuseProbe {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.mount_timeout,
            stop_timeout: config.stop_timeout,
            poll_interval: config.poll_interval,
            ready_check: config.ready_check,
        }
    }

    fn is_ready(&self, path: &Path, baseline: &MountBaseline) -> Result<bool> {
        match self.ready_check {
            ReadyCheck::Mounted => Ok(baseline.replaced_at(path)),
            ReadyCheck::Populated => Ok(!is_empty_dir(path)?),
        }
    }
}

impl MountProbe for FuseProbe {
    fn wait_for_mount(
        &self,
        process: &mut Child,
        path: &Path,
        baseline: &MountBaseline,
        interrupts: &dyn InterruptCheck,
    ) -> Result<()> {
        if self.ready_check == ReadyCheck::Populated && baseline.had_entries {
            return Err(SupervisorError::MountSetup(format!(
                "Mountpoint {} must be empty when readiness is judged by its entries",
                path.display()
            )));
        }

        let start = Instant::now();
        loop {
            if let Some(sig) = interrupts.pending() {
                return Err(SupervisorError::Interrupted(sig));
            }
            if let Some(status) = try_wait(process)? {
                return Err(SupervisorError::MountSetup(format!(
                    "Mount command exited before {} was mounted ({})",
                    path.display(),
                    status
                )));
            }
            if self.is_ready(path, baseline)? {
                debug!("{} mounted after {:?}", path.display(), start.elapsed());
                return Ok(());
            }
            if let Some(timeout) = self.timeout {
                if start.elapsed() >= timeout {
                    return Err(SupervisorError::MountSetup(format!(
                        "Timed out after {}s waiting for {} to be mounted",
                        timeout.as_secs(),
                        path.display()
                    )));
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn stop_mount(
        &self,
        process: &mut Child,
        path: &Path,
        baseline: &MountBaseline,
    ) -> Result<()> {
        let status = terminate_process_group(process, self.stop_timeout, self.poll_interval)
            .map_err(|e| SupervisorError::Cleanup(format!("Failed to stop mount command: {}", e)))?;
        debug!("Mount command finished: {}", status);

        let start = Instant::now();
        while baseline.replaced_at(path) {
            if start.elapsed() >= self.stop_timeout {
                return Err(SupervisorError::Cleanup(format!(
                    "{} is still mounted after the mount command exited",
                    path.display()
                )));
            }
            thread::sleep(self.poll_interval);
        }
        Ok(())
    }
}

fn try_wait(process: &mut Child) -> Result<Option<ExitStatus>> {
    process
        .try_wait()
        .map_err(|e| SupervisorError::Internal(format!("Failed to poll mount command: {}", e)))
}

/// Send `sig` to the process group led by `pid`, or to the process alone when
/// the group is gone
pub fn signal_process_group(pid: u32, sig: libc::c_int) -> io::Result<()> {
    let pid = pid as libc::pid_t;
    // SAFETY: kill has no memory-safety preconditions
    unsafe {
        if libc::kill(-pid, sig) == 0 || libc::kill(pid, sig) == 0 {
            return Ok(());
        }
    }
    Err(io::Error::last_os_error())
}

/// Terminate a process group led by `process`: SIGTERM, wait up to `grace`,
/// then SIGKILL. Returns the leader's exit status; an already reaped process is
/// not signalled again.
pub fn terminate_process_group(
    process: &mut Child,
    grace: Duration,
    poll_interval: Duration,
) -> io::Result<ExitStatus> {
    if let Some(status) = process.try_wait()? {
        return Ok(status);
    }

    let pid = process.id();
    let _ = signal_process_group(pid, libc::SIGTERM);

    let start = Instant::now();
    while start.elapsed() < grace {
        if let Some(status) = process.try_wait()? {
            return Ok(status);
        }
        thread::sleep(poll_interval);
    }

    warn!("Mount command did not exit after {:?}, killing it", grace);
    let _ = signal_process_group(pid, libc::SIGKILL);
    process.wait()
}

/// A mountpoint owned by the supervisor for one run
#[derive(Debug)]
pub struct MountHandle {
    path: PathBuf,
    is_temporary: bool,
    process: Option<Child>,
    baseline: Option<MountBaseline>,
    removed: bool,
}

impl MountHandle {
    /// Create or validate the mountpoint. The handle exists from here on and
    /// must be cleaned up on every path.
    pub fn resolve(request: &MountRequest, temp_base: &Path) -> Result<Self> {
        match request.custom_mountpoint {
            Some(ref custom) => {
                let path = fs::canonicalize(custom).map_err(|e| {
                    SupervisorError::MountSetup(format!(
                        "Mountpoint {} does not exist: {}",
                        custom.display(),
                        e
                    ))
                })?;
                if !path.is_dir() {
                    return Err(SupervisorError::MountSetup(format!(
                        "Mountpoint {} is not a directory",
                        path.display()
                    )));
                }
                Ok(Self {
                    path,
                    is_temporary: false,
                    process: None,
                    baseline: None,
                    removed: false,
                })
            }
            None => {
                let path = temp_base.join(format!("{}{}", TEMP_MOUNT_PREFIX, uuid::Uuid::new_v4()));
                fs::create_dir(&path).map_err(|e| {
                    SupervisorError::MountSetup(format!(
                        "Failed to create mountpoint {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                debug!("Created temporary mountpoint {}", path.display());
                Ok(Self {
                    path,
                    is_temporary: true,
                    process: None,
                    baseline: None,
                    removed: false,
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.is_temporary
    }

    /// Whether a mount command is still owned by this handle
    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    /// Substitute the mountpoint into `template` and start the mount command in
    /// a new session, so interrupts aimed at the supervisor do not reach it.
    pub fn launch(&mut self, template: &[String]) -> Result<()> {
        let command = substitute_mountpoint(template, &self.path)?;
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SupervisorError::MountSetup("No mount command provided".to_string()))?;

        let baseline = MountBaseline::capture(&self.path)?;
        info!("Mounting at {}: {}", self.path.display(), command.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        // SAFETY: setsid is async-signal-safe and touches no parent state
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| {
            SupervisorError::MountSetup(format!("Failed to start mount command {}: {}", program, e))
        })?;
        self.process = Some(child);
        self.baseline = Some(baseline);
        Ok(())
    }

    /// Block until the probe reports the mount usable, then check it has entries
    pub fn wait_ready(
        &mut self,
        probe: &dyn MountProbe,
        interrupts: &dyn InterruptCheck,
        allow_empty: bool,
    ) -> Result<()> {
        let (process, baseline) = match (self.process.as_mut(), self.baseline.as_ref()) {
            (Some(process), Some(baseline)) => (process, baseline),
            _ => {
                return Err(SupervisorError::Internal(
                    "Mount command was not started".to_string(),
                ))
            }
        };
        probe.wait_for_mount(process, &self.path, baseline, interrupts)?;

        if !allow_empty && is_empty_dir(&self.path)? {
            return Err(SupervisorError::MountSetup(format!(
                "Mounted directory {} is empty (use --allow-empty if that is expected)",
                self.path.display()
            )));
        }
        info!("Mounted {}", self.path.display());
        Ok(())
    }

    /// Stop the mount. A no-op when no mount command is running.
    pub fn stop(&mut self, probe: &dyn MountProbe) -> Result<()> {
        if let (Some(process), Some(baseline)) = (self.process.as_mut(), self.baseline.as_ref()) {
            probe.stop_mount(process, &self.path, baseline)?;
            self.process = None;
            info!("Unmounted {}", self.path.display());
        }
        Ok(())
    }

    /// Remove a temporary mountpoint. Never deletes contents: a directory that
    /// is not empty (e.g. still mounted) is an error. A no-op for persistent or
    /// already removed mountpoints.
    pub fn remove_dir(&mut self) -> Result<()> {
        if !self.is_temporary || self.removed {
            return Ok(());
        }
        match fs::remove_dir(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SupervisorError::Cleanup(format!(
                    "Failed to remove mountpoint {}: {}",
                    self.path.display(),
                    e
                )))
            }
        }
        debug!("Removed mountpoint {}", self.path.display());
        self.removed = true;
        Ok(())
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(path).map_err(|e| {
        SupervisorError::MountSetup(format!("Failed to list {}: {}", path.display(), e))
    })?;
    Ok(entries.next().is_none())
}
