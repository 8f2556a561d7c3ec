use std::{
    ffi::OsStr,
    process::{Command, Output, Stdio},
};

use tracing::debug;

/// How an external tool invocation went wrong.
#[derive(Debug)]
pub enum ToolFailure {
    /// The binary could not be started at all.
    Launch(std::io::Error),
    /// The tool ran and exited unsuccessfully.
    Exit { code: Option<i32>, stderr: String },
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolFailure::Launch(e) => write!(f, "could not launch: {e}"),
            ToolFailure::Exit { code, stderr } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                write!(f, "exit status {code}: {}", last_lines(stderr, 5))
            }
        }
    }
}

/// Runs `program` to completion, capturing output.
pub fn run_tool<I, S>(program: &str, args: I) -> Result<Output, ToolFailure>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    debug!("Running {:?}", cmd);

    let output = cmd.output().map_err(ToolFailure::Launch)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(ToolFailure::Exit {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// First line of `program <version_arg>` output, if it can be launched.
pub fn tool_version(program: &str, version_arg: &str) -> Result<String, ToolFailure> {
    let output = run_tool(program, [version_arg])?;
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    Ok(text.lines().next().unwrap_or_default().trim().to_string())
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join(" | ")
}
