//! with-mount CLI
//!
//! Mounts a filesystem, runs a program with the mount as its working directory
//! and unmounts again, no matter how the program or the supervisor ends.

use std::env;
use std::path::PathBuf;
use std::process;

use log::error;

use with_mount::{
    error::Result,
    install_logger, setup_signal_handlers, supervise,
    supervisor::{default_temp_base, original_dir},
    Channel, Config, DiagnosticSink, FuseProbe, RunContext, EXIT_FAILURE, EXIT_GENERIC,
    ORIGINAL_PWD_VAR, PLACEHOLDER,
};

fn main() {
    // Capture the starting directory before anything can change it
    let start_dir = original_dir();
    let args: Vec<String> = env::args().skip(1).collect();

    let sink = DiagnosticSink::for_std_streams();
    let code = run(&args, start_dir, &sink);
    sink.flush();
    process::exit(code);
}

fn run(args: &[String], start_dir: Result<PathBuf>, sink: &DiagnosticSink) -> i32 {
    match args.first().map(String::as_str) {
        None => {
            print_usage(sink);
            return EXIT_FAILURE;
        }
        Some("--help") | Some("-h") => {
            print_usage(sink);
            return 0;
        }
        Some("--version") | Some("-V") => {
            sink.line(
                Channel::Out,
                format!("with-mount version: {}", env!("CARGO_PKG_VERSION")),
            );
            return 0;
        }
        Some(_) => {}
    }

    // Interrupts from here on are handled by the coordinator
    let interrupts = match setup_signal_handlers() {
        Ok(signals) => signals,
        Err(e) => {
            install_logger(sink.clone(), false);
            error!("{}", e);
            return EXIT_GENERIC;
        }
    };

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            install_logger(sink.clone(), false);
            error!("{}", e);
            return EXIT_FAILURE;
        }
    };
    install_logger(sink.clone(), config.verbose);

    let original_dir = match start_dir {
        Ok(dir) => dir,
        Err(e) => {
            error!("{}", e);
            return EXIT_GENERIC;
        }
    };

    let probe = FuseProbe::from_config(&config);
    let ctx = RunContext {
        config: &config,
        probe: &probe,
        interrupts: &interrupts,
        original_dir,
        temp_base: default_temp_base(),
    };

    supervise(args, &ctx)
}

/// Print usage information
fn print_usage(sink: &DiagnosticSink) {
    let usage = format!(
        r#"Usage: with-mount [options] <mount-command...> -- <program> [program-args...]

Mounts a filesystem with <mount-command>, runs <program> with the mount as its
working directory, then unmounts. The mount command must contain the
{placeholder} placeholder, which is replaced with the mountpoint path.

Options:
  --mountpoint <path>   Mount at an existing directory (kept after the run)
                        instead of a temporary one (removed after the run)
  --allow-empty         Do not fail when the mounted directory is empty
  --help, -h            Show this help message
  --version, -V         Show version information

The program receives {pwd_var} with the directory with-mount was started in.
Relative program paths (./x, ../x) are resolved against that directory.

Exit codes:
  0-255  the program's own exit code
  1      usage error or mount setup failure
  126    program found but not executable
  127    program not found
  255    internal error, cleanup failure, interrupt received,
         or the program itself exited 255

Environment:
  WITH_MOUNT_VERBOSE       Enable debug diagnostics (1 or true)
  WITH_MOUNT_TIMEOUT       Seconds to wait for the mount (default: no limit)
  WITH_MOUNT_STOP_TIMEOUT  Seconds allowed for each teardown phase (default: 10)
  WITH_MOUNT_POLL_MS       Polling interval in milliseconds (default: 100)
  WITH_MOUNT_READY         Readiness check: mount (new filesystem, default) or entries

Examples:
  with-mount rclone mount remote:backups {placeholder} -- restic backup .
  with-mount --mountpoint /mnt/data sshfs -f host:/data {placeholder} -- ./sync.sh"#,
        placeholder = PLACEHOLDER,
        pwd_var = ORIGINAL_PWD_VAR,
    );
    sink.line(Channel::Out, usage);
}
