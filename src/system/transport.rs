// src/system/transport.rs

use crate::{models::Target, system::executor::ExecutionError};
use std::fmt;

/// Per-command execution options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Run through `sudo` on remote hosts.
    pub sudo: bool,
    /// Directory to `cd` into before running the command.
    pub cwd: Option<String>,
    /// Do not echo the command nor its output.
    pub quiet: bool,
}

impl RunOptions {
    pub fn sudo() -> Self {
        Self {
            sudo: true,
            ..Default::default()
        }
    }

    pub fn quiet_sudo() -> Self {
        Self {
            sudo: true,
            quiet: true,
            ..Default::default()
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// The captured result of a command, whatever its exit status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
}

/// The boundary between provisioning logic and the machines it provisions.
///
/// Implementors only have to provide [`Transport::execute`] and [`Transport::upload`];
/// the other operations are expressed on top of them.
pub trait Transport: fmt::Debug {
    /// Runs a shell command on `target` and reports its outcome without judging the exit status.
    fn execute(
        &self,
        target: &Target,
        command: &str,
        options: &RunOptions,
    ) -> Result<CommandOutput, ExecutionError>;

    /// Writes `contents` to `dest` on `target`, replacing any existing file.
    fn upload(
        &self,
        target: &Target,
        contents: &str,
        dest: &str,
        options: &RunOptions,
    ) -> Result<(), ExecutionError>;

    /// Runs a command and fails on a non-zero exit status. Returns the captured stdout.
    fn run(
        &self,
        target: &Target,
        command: &str,
        options: &RunOptions,
    ) -> Result<String, ExecutionError> {
        let output = self.execute(target, command, options)?;
        if !output.success {
            return Err(ExecutionError::NonZeroExitStatus {
                command: command.to_string(),
                target: target.to_string(),
                code: output.code,
            });
        }
        Ok(output.stdout)
    }

    /// `test -e` on the target.
    fn exists(&self, target: &Target, path: &str, sudo: bool) -> Result<bool, ExecutionError> {
        let options = RunOptions {
            sudo,
            quiet: true,
            cwd: None,
        };
        let output = self.execute(target, &format!("test -e {}", quote(path)?), &options)?;
        Ok(output.success)
    }

    /// Reads a text file from the target.
    fn download(&self, target: &Target, path: &str, sudo: bool) -> Result<String, ExecutionError> {
        let options = RunOptions {
            sudo,
            quiet: true,
            cwd: None,
        };
        self.run(target, &format!("cat {}", quote(path)?), &options)
    }
}

/// Quotes one shell word.
pub fn quote(word: &str) -> Result<String, ExecutionError> {
    shlex::try_quote(word)
        .map(|quoted| quoted.into_owned())
        .map_err(|_| ExecutionError::Quote(word.to_string()))
}
