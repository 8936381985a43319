use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, ExitStatus};

use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    /// stdout followed by stderr.
    pub combined: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Splits a command line on whitespace. Quoting is not interpreted.
pub fn split_command(line: &str) -> PipelineResult<Vec<String>> {
    let argv: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        return Err(PipelineError::config("command cannot be empty"));
    }
    Ok(argv)
}

/// Runs `argv` with the inherited environment plus `env`, capturing output.
pub fn run_captured(
    argv: &[String],
    env: &BTreeMap<String, String>,
    dir: Option<&Path>,
) -> std::io::Result<CommandOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args).envs(env);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    debug!(cmd = ?argv, "Running command");
    let output = cmd.output()?;
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(CommandOutput {
        status: output.status,
        combined,
    })
}

/// Runs a hook command line. A non-zero exit becomes
/// [`PipelineError::Hook`] carrying the command and its output.
pub fn run_hook(line: &str, env: &BTreeMap<String, String>) -> PipelineResult<()> {
    let argv = split_command(line)?;
    info!(hook = line, "Running hook");
    let failed = |status: String, output: String| PipelineError::Hook {
        command: line.to_string(),
        status,
        output,
    };
    let output =
        run_captured(&argv, env, None).map_err(|err| failed(err.to_string(), String::new()))?;
    if !output.success() {
        debug!(hook = line, output = %output.combined, "Hook failed");
        return Err(failed(output.status.to_string(), output.combined));
    }
    Ok(())
}
