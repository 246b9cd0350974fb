//! Placeholder substitution for mount commands
//!
//! The mount command template names the mountpoint with the reserved token
//! `MOUNTPOINT`. It is matched as a whole word, so it may stand alone or be part
//! of a larger token such as `--dir=MOUNTPOINT`.

use std::path::Path;

use regex::Regex;

use crate::error::{Result, SupervisorError};

/// Reserved token replaced with the resolved mountpoint
pub const PLACEHOLDER: &str = "MOUNTPOINT";

fn placeholder_regex() -> Result<Regex> {
    Regex::new(&format!(r"\b{}\b", regex::escape(PLACEHOLDER)))
        .map_err(|e| SupervisorError::Internal(format!("Invalid placeholder pattern: {}", e)))
}

/// Replace every placeholder occurrence with `mountpoint`.
///
/// Fails with a mount setup error when the template never mentions the
/// placeholder; tokens without it are returned unchanged.
pub fn substitute_mountpoint(template: &[String], mountpoint: &Path) -> Result<Vec<String>> {
    let re = placeholder_regex()?;
    let replacement = mountpoint.to_string_lossy();
    let mut found = false;

    let command = template
        .iter()
        .map(|token| {
            if re.is_match(token) {
                found = true;
                // NoExpand keeps `$` in paths literal
                re.replace_all(token, regex::NoExpand(replacement.as_ref()))
                    .into_owned()
            } else {
                token.clone()
            }
        })
        .collect();

    if !found {
        return Err(SupervisorError::MountSetup(format!(
            "Mount command does not contain the {} placeholder",
            PLACEHOLDER
        )));
    }

    Ok(command)
}
