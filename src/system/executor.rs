// src/system/executor.rs

use crate::{
    models::Target,
    system::transport::{CommandOutput, RunOptions, Transport, quote},
};
use colored::Colorize;
use std::io::Write;
use std::process::{Command as StdCommand, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No command specified to run.")]
    EmptyCommand,
    #[error("'{0}' cannot be quoted for the shell.")]
    Quote(String),
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{command}' failed on {target} (exit code {}).", .code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    NonZeroExitStatus {
        command: String,
        target: String,
        code: Option<i32>,
    },
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// Runs commands through `sh -c` locally and through the system `ssh` client remotely.
///
/// The remote side always receives a single shell string; `sudo` and `cwd` are folded into
/// that string by [`compose_script`]. Locally `sudo` is ignored: the `dev` stage runs as the
/// invoking user.
#[derive(Debug, Clone, Default)]
pub struct ShellTransport {
    ssh_options: Vec<String>,
}

impl ShellTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra arguments passed to every `ssh` invocation (e.g. `-o BatchMode=yes`).
    pub fn with_ssh_options(mut self, options: Vec<String>) -> Self {
        self.ssh_options = options;
        self
    }

    fn build(&self, target: &Target, script: &str) -> StdCommand {
        match target {
            Target::Local => {
                let mut command = StdCommand::new("sh");
                command.arg("-c").arg(script);
                command
            }
            Target::Remote(host) => {
                let mut command = StdCommand::new("ssh");
                if let Some(port) = host.port {
                    command.arg("-p").arg(port.to_string());
                }
                command
                    .args(&self.ssh_options)
                    .arg(host.destination())
                    .arg("--")
                    .arg(script);
                command
            }
        }
    }
}

/// Folds the working directory and privilege escalation into one shell string.
pub fn compose_script(
    target: &Target,
    command: &str,
    options: &RunOptions,
) -> Result<String, ExecutionError> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err(ExecutionError::EmptyCommand);
    }
    let script = match &options.cwd {
        Some(cwd) => format!("cd {} && {}", quote(cwd)?, trimmed),
        None => trimmed.to_string(),
    };
    if options.sudo && target.is_remote() {
        Ok(format!("sudo sh -c {}", quote(&script)?))
    } else {
        Ok(script)
    }
}

impl Transport for ShellTransport {
    fn execute(
        &self,
        target: &Target,
        command: &str,
        options: &RunOptions,
    ) -> Result<CommandOutput, ExecutionError> {
        let script = compose_script(target, command, options)?;
        if !options.quiet {
            println!("[{}] {} {}", target.to_string().dimmed(), "→".blue(), command.trim().green());
        }
        log::debug!("Executing on {}: {}", target, script);

        let output = self
            .build(target, &script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if options.quiet { Stdio::piped() } else { Stdio::inherit() })
            .output()
            .map_err(|e| ExecutionError::CommandFailed(command.to_string(), e))?;

        let stdout =
            String::from_utf8(output.stdout).map_err(|e| ExecutionError::InvalidUtf8Output {
                command: command.to_string(),
                source: e,
            })?;
        if !options.quiet && !stdout.trim().is_empty() {
            print!("{}", stdout);
        }
        if !output.status.success() {
            log::debug!(
                "Command '{}' on {} exited with {:?}",
                command,
                target,
                output.status.code()
            );
        }

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout,
        })
    }

    fn upload(
        &self,
        target: &Target,
        contents: &str,
        dest: &str,
        options: &RunOptions,
    ) -> Result<(), ExecutionError> {
        let command = format!("cat > {}", quote(dest)?);
        let script = compose_script(target, &command, options)?;
        if !options.quiet {
            println!("[{}] {} {}", target.to_string().dimmed(), "↑".blue(), dest.green());
        }
        log::debug!("Uploading {} bytes to {} on {}", contents.len(), dest, target);

        let mut child = self
            .build(target, &script)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ExecutionError::CommandFailed(command.clone(), e))?;

        // Dropping stdin closes the pipe so `cat` can finish.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(contents.as_bytes()),
            None => Ok(()),
        };

        // The child is reaped even when the write broke the pipe; its status explains why.
        let status = child
            .wait()
            .map_err(|e| ExecutionError::CommandFailed(command.clone(), e))?;
        if !status.success() {
            return Err(ExecutionError::NonZeroExitStatus {
                command,
                target: target.to_string(),
                code: status.code(),
            });
        }
        written.map_err(|e| ExecutionError::CommandFailed(command, e))
    }
}
