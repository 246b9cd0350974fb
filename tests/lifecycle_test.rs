//! End-to-end tests of a supervised run
//!
//! The "mount" is simulated: the mount command writes into the mountpoint and
//! then stays in the foreground, and the test probe clears the directory on
//! teardown the way an unmount hides the mounted contents.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use with_mount::{
    supervise, terminate_process_group, Config, InterruptCheck, MountBaseline, MountProbe,
    RunContext,
    SupervisorError, EXIT_FAILURE, EXIT_GENERIC, EXIT_NOT_FOUND,
};

const POPULATED_MOUNT: &str = "echo data > MOUNTPOINT/file; exec sleep 30";

struct SimulatedProbe;

impl MountProbe for SimulatedProbe {
    fn wait_for_mount(
        &self,
        process: &mut Child,
        path: &Path,
        _baseline: &MountBaseline,
        interrupts: &dyn InterruptCheck,
    ) -> Result<(), SupervisorError> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if let Some(sig) = interrupts.pending() {
                return Err(SupervisorError::Interrupted(sig));
            }
            if let Ok(Some(status)) = process.try_wait() {
                return Err(SupervisorError::MountSetup(format!(
                    "mount command exited: {}",
                    status
                )));
            }
            if fs::read_dir(path).map(|mut d| d.next().is_some()).unwrap_or(false) {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }
        // Treat a quiet mount command as mounted but empty
        Ok(())
    }

    fn stop_mount(
        &self,
        process: &mut Child,
        path: &Path,
        _baseline: &MountBaseline,
    ) -> Result<(), SupervisorError> {
        terminate_process_group(process, Duration::from_secs(5), Duration::from_millis(10))
            .map_err(|e| SupervisorError::Cleanup(e.to_string()))?;
        for entry in fs::read_dir(path).map_err(|e| SupervisorError::Cleanup(e.to_string()))? {
            let entry = entry.map_err(|e| SupervisorError::Cleanup(e.to_string()))?;
            let _ = fs::remove_file(entry.path());
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
struct TestInterrupts {
    signal: Arc<AtomicI32>,
    count: Arc<AtomicU32>,
}

impl TestInterrupts {
    fn raise(&self, sig: i32) {
        let _ = self
            .signal
            .compare_exchange(0, sig, Ordering::SeqCst, Ordering::SeqCst);
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn raise_after(&self, delay: Duration, sig: i32) -> thread::JoinHandle<()> {
        let interrupts = self.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            interrupts.raise(sig);
        })
    }
}

impl InterruptCheck for TestInterrupts {
    fn pending(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }

    fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

struct Harness {
    temp_base: TempDir,
    original_dir: TempDir,
    interrupts: TestInterrupts,
    config: Config,
}

impl Harness {
    fn new() -> Self {
        Self {
            temp_base: TempDir::new().unwrap(),
            original_dir: TempDir::new().unwrap(),
            interrupts: TestInterrupts::default(),
            config: Config {
                poll_interval: Duration::from_millis(10),
                ..Config::default()
            },
        }
    }

    fn run(&self, args: &[&str]) -> i32 {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let ctx = RunContext {
            config: &self.config,
            probe: &SimulatedProbe,
            interrupts: &self.interrupts,
            original_dir: self.original_dir.path().to_path_buf(),
            temp_base: self.temp_base.path().to_path_buf(),
        };
        supervise(&args, &ctx)
    }

    /// Temporary mountpoints still present
    fn leftover_mountpoints(&self) -> Vec<PathBuf> {
        fs::read_dir(self.temp_base.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    fn original(&self, name: &str) -> PathBuf {
        self.original_dir.path().join(name)
    }
}

#[test]
fn test_program_exit_code_passes_through() {
    let harness = Harness::new();
    let code = harness.run(&["sh", "-c", POPULATED_MOUNT, "--", "sh", "-c", "exit 42"]);
    assert_eq!(code, 42);
    assert!(harness.leftover_mountpoints().is_empty());
}

#[test]
fn test_program_exit_255_is_reported_as_255() {
    let harness = Harness::new();
    let code = harness.run(&["sh", "-c", POPULATED_MOUNT, "--", "sh", "-c", "exit 255"]);
    assert_eq!(code, 255);
}

#[test]
fn test_successful_run_removes_temporary_mountpoint() {
    let harness = Harness::new();
    let code = harness.run(&["sh", "-c", POPULATED_MOUNT, "--", "true"]);
    assert_eq!(code, 0);
    assert!(harness.leftover_mountpoints().is_empty());
}

#[test]
fn test_program_runs_inside_mount_and_sees_original_dir() {
    let harness = Harness::new();
    let script = "cat file > \"$WITH_MOUNT_ORIGINAL_PWD/copied\"";
    let code = harness.run(&["sh", "-c", POPULATED_MOUNT, "--", "sh", "-c", script]);
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(harness.original("copied")).unwrap(), "data\n");
}

#[test]
fn test_relative_program_resolved_against_original_dir() {
    let harness = Harness::new();
    std::os::unix::fs::symlink("/bin/sh", harness.original("mysh")).unwrap();
    let code = harness.run(&["sh", "-c", POPULATED_MOUNT, "--", "./mysh", "-c", "exit 7"]);
    assert_eq!(code, 7);
}

#[test]
fn test_missing_placeholder_fails_and_cleans_up() {
    let harness = Harness::new();
    let code = harness.run(&["sh", "-c", "exec sleep 30", "--", "true"]);
    assert_eq!(code, EXIT_FAILURE);
    assert!(harness.leftover_mountpoints().is_empty());
}

#[test]
fn test_empty_mount_is_rejected_and_torn_down() {
    let harness = Harness::new();
    let pid_file = harness.original("mount.pid");
    let mount = format!("echo $$ > {}; : MOUNTPOINT; exec sleep 30", pid_file.display());
    let code = harness.run(&["sh", "-c", &mount, "--", "true"]);
    assert_eq!(code, EXIT_FAILURE);
    assert!(harness.leftover_mountpoints().is_empty());

    let pid: i32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    // SAFETY: signal 0 only checks for existence
    assert_ne!(unsafe { libc::kill(pid, 0) }, 0, "mount command still running");
}

#[test]
fn test_allow_empty_accepts_empty_mount() {
    let harness = Harness::new();
    let code = harness.run(&[
        "--allow-empty",
        "sh",
        "-c",
        ": MOUNTPOINT; exec sleep 30",
        "--",
        "true",
    ]);
    assert_eq!(code, 0);
    assert!(harness.leftover_mountpoints().is_empty());
}

#[test]
fn test_custom_mountpoint_is_kept() {
    let harness = Harness::new();
    let mountpoint = TempDir::new().unwrap();
    let mountpoint_arg = mountpoint.path().to_string_lossy().to_string();
    let code = harness.run(&[
        "--mountpoint",
        &mountpoint_arg,
        "sh",
        "-c",
        POPULATED_MOUNT,
        "--",
        "sh",
        "-c",
        "exit 3",
    ]);
    assert_eq!(code, 3);
    assert!(mountpoint.path().is_dir());
    assert!(harness.leftover_mountpoints().is_empty());
}

#[test]
fn test_missing_custom_mountpoint_is_setup_error() {
    let harness = Harness::new();
    let missing = harness.original("missing").to_string_lossy().to_string();
    let code = harness.run(&["--mountpoint", &missing, "sh", "-c", POPULATED_MOUNT, "--", "true"]);
    assert_eq!(code, EXIT_FAILURE);
}

#[test]
fn test_usage_error_allocates_nothing() {
    let harness = Harness::new();
    assert_eq!(harness.run(&["sh", "-c", POPULATED_MOUNT]), EXIT_FAILURE);
    assert!(harness.leftover_mountpoints().is_empty());
}

#[test]
fn test_program_not_found_tears_down_mount() {
    let harness = Harness::new();
    let code = harness.run(&[
        "sh",
        "-c",
        POPULATED_MOUNT,
        "--",
        "/nonexistent/with-mount-program",
    ]);
    assert_eq!(code, EXIT_NOT_FOUND);
    assert!(harness.leftover_mountpoints().is_empty());
}

#[test]
fn test_interrupt_before_start_exits_255() {
    let harness = Harness::new();
    harness.interrupts.raise(libc::SIGINT);
    let code = harness.run(&["sh", "-c", POPULATED_MOUNT, "--", "true"]);
    assert_eq!(code, EXIT_GENERIC);
    assert!(harness.leftover_mountpoints().is_empty());
}

#[test]
fn test_interrupt_while_mounting_exits_255_without_mount() {
    let harness = Harness::new();
    let raiser = harness
        .interrupts
        .raise_after(Duration::from_millis(100), libc::SIGTERM);
    // Never populates the mountpoint, so the probe is still waiting
    let code = harness.run(&["sh", "-c", ": MOUNTPOINT; exec sleep 30", "--", "true"]);
    raiser.join().unwrap();
    assert_eq!(code, EXIT_GENERIC);
    assert!(harness.leftover_mountpoints().is_empty());
}

#[test]
fn test_interrupt_while_program_runs_exits_255() {
    let harness = Harness::new();
    let raiser = harness
        .interrupts
        .raise_after(Duration::from_millis(200), libc::SIGTERM);
    let code = harness.run(&["sh", "-c", POPULATED_MOUNT, "--", "sleep", "30"]);
    raiser.join().unwrap();
    assert_eq!(code, EXIT_GENERIC);
    assert!(harness.leftover_mountpoints().is_empty());
}
