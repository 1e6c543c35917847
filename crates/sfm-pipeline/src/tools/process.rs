//! Child-process runner shared by the external tool implementations.

use std::process::{Command, Output};

use log::debug;

use crate::error::StageError;

/// Lines of stderr kept in an `ExternalTool` error.
const STDERR_TAIL_LINES: usize = 20;

/// Run `cmd` to completion, capturing its output.
///
/// A tool that cannot be started or exits unsuccessfully becomes
/// [`StageError::ExternalTool`] carrying the tail of its stderr.
pub fn run_tool(tool: &str, cmd: &mut Command) -> Result<Output, StageError> {
    debug!("running {tool}: {cmd:?}");
    let output = cmd.output().map_err(|err| StageError::ExternalTool {
        tool: tool.to_string(),
        status: format!("could not be started ({err})"),
        stderr: String::new(),
    })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines() {
        debug!("[{tool}] {line}");
    }

    if output.status.success() {
        return Ok(output);
    }

    let status = match output.status.code() {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal".to_string(),
    };
    Err(StageError::ExternalTool {
        tool: tool.to_string(),
        status,
        stderr: tail(&stderr, STDERR_TAIL_LINES),
    })
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
