// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Shared library dependency discovery via the dynamic linker.

use std::path::{Path, PathBuf};
use std::process;

/// Result type shorthand for this module.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur during dependency discovery.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to spawn the inspected executable.
    #[error("failed to spawn the inspected executable")]
    Spawn(#[from] std::io::Error),
}

/// Lists the shared library dependencies of a dynamically linked executable.
///
/// Spawns the executable with `LD_TRACE_LOADED_OBJECTS` set, which makes
/// the dynamic linker print the resolved dependencies and exit before any
/// of the program's own code runs. Note that statically linked executables
/// ignore the variable and execute normally, so this must only be called
/// on executables that the caller would also be willing to run.
pub fn list_dependencies(path: &Path) -> Result<Vec<PathBuf>> {
    let output = process::Command::new(path)
        .env("LD_TRACE_LOADED_OBJECTS", "1")
        .stdin(process::Stdio::null())
        .stderr(process::Stdio::null())
        .output()?;

    Ok(parse_trace_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Extracts the dependency paths from `ldd`-style linker output.
fn parse_trace_output(output: &str) -> Vec<PathBuf> {
    let mut deps = Vec::new();

    for line in output.lines() {
        let target = match line.split_once("=>") {
            Some((_, resolved)) => resolved.split_whitespace().next(),
            // The dynamic linker itself is listed with its path alone.
            None => line.split_whitespace().next(),
        };

        // Entries without an absolute path are either unresolved ("not
        // found") or pseudo-libraries like the vDSO.
        let Some(target) = target.filter(|t| t.starts_with('/')) else {
            continue;
        };

        let path = PathBuf::from(target);
        if !deps.contains(&path) {
            deps.push(path);
        }
    }

    deps
}
