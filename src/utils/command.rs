//! Command execution utilities

use crate::utils::error::{DiskPlanError, Result};
use std::process::{Command, Output, Stdio};
use tracing::{debug, warn};

fn spawn(program: &str, args: &[&str]) -> Result<Output> {
    debug!("Running: {} {}", program, args.join(" "));

    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DiskPlanError::ProbeUtilityUnavailable(program.to_string())
            } else {
                DiskPlanError::Io(e)
            }
        })
}

/// Execute a command and return the output, failing on a non-zero exit status
pub fn run_command(program: &str, args: &[&str]) -> Result<Output> {
    let output = spawn(program, args)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        warn!(
            "Command failed: {} {}\n  stderr: {}",
            program,
            args.join(" "),
            stderr.trim()
        );
        return Err(DiskPlanError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            stderr,
        });
    }

    Ok(output)
}

/// Execute a command and return stdout as string
pub fn run_command_output(program: &str, args: &[&str]) -> Result<String> {
    let output = run_command(program, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Execute a command and return its exit code together with stdout.
///
/// Used for tools such as blkid that signal "nothing matched" through the
/// exit status rather than through an error.
pub fn run_command_status(program: &str, args: &[&str]) -> Result<(i32, String)> {
    let output = spawn(program, args)?;
    let code = output.status.code().unwrap_or(-1);
    Ok((code, String::from_utf8_lossy(&output.stdout).to_string()))
}

/// Check if a command exists in PATH
pub fn command_exists(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
