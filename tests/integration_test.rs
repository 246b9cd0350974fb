//! Integration tests for with-mount.
//!
//! These tests verify the public API works correctly.

use std::path::{Path, PathBuf};

use with_mount::{
    decide_exit_code, parse_args, substitute_mountpoint, ExitCause, ExitOutcome,
    SupervisionState, SupervisorError, PLACEHOLDER,
};

fn to_string_vec(strs: &[&str]) -> Vec<String> {
    strs.iter().map(|s| s.to_string()).collect()
}

mod args_parser_integration_tests {
    use super::*;

    #[test]
    fn test_parse_rclone_invocation() {
        let args = to_string_vec(&[
            "rclone",
            "mount",
            "--read-only",
            "remote:backups",
            "MOUNTPOINT",
            "--",
            "restic",
            "backup",
            ".",
        ]);
        let parsed = parse_args(&args, Path::new("/srv")).unwrap();
        assert_eq!(
            parsed.mount.command_template,
            vec!["rclone", "mount", "--read-only", "remote:backups", "MOUNTPOINT"]
        );
        assert_eq!(parsed.program.program, PathBuf::from("restic"));
        assert_eq!(parsed.program.args, vec!["backup", "."]);
    }

    #[test]
    fn test_usage_errors() {
        for args in [
            vec!["mnt", "MOUNTPOINT"],
            vec!["--", "ls"],
            vec!["mnt", "MOUNTPOINT", "--"],
            vec!["--mountpoint"],
        ] {
            let result = parse_args(&to_string_vec(&args), Path::new("/"));
            assert!(
                matches!(result, Err(SupervisorError::Usage(_))),
                "expected usage error for {:?}",
                args
            );
        }
    }
}

mod substitution_integration_tests {
    use super::*;

    #[test]
    fn test_only_placeholder_tokens_change() {
        let template = to_string_vec(&["sshfs", "-f", "host:/data", PLACEHOLDER, "-o", "ro"]);
        let command = substitute_mountpoint(&template, Path::new("/tmp/with-mount-x")).unwrap();
        assert_eq!(command.len(), template.len());
        for (before, after) in template.iter().zip(&command) {
            if before == PLACEHOLDER {
                assert_eq!(after, "/tmp/with-mount-x");
            } else {
                assert_eq!(after, before);
            }
        }
    }
}

mod exit_code_integration_tests {
    use super::*;

    #[test]
    fn test_spawn_failure_codes_survive() {
        let outcome = ExitOutcome {
            raw_code: 126,
            cause: ExitCause::SpawnFailure,
        };
        assert_eq!(decide_exit_code(SupervisionState::Mounted, &outcome), 126);
    }

    #[test]
    fn test_interrupt_after_launch_is_255() {
        let outcome = ExitOutcome {
            raw_code: 0,
            cause: ExitCause::ExternalInterrupt,
        };
        assert_eq!(decide_exit_code(SupervisionState::Launched, &outcome), 255);
    }
}
