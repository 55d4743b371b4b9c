// src/system/fake.rs

//! An in-memory [`Transport`] for tests: records every command and upload, simulates a file
//! system with `test -e` / `cat`, and fails or answers commands matching configured substrings.

use crate::{
    models::Target,
    system::{
        executor::ExecutionError,
        transport::{CommandOutput, RunOptions, Transport},
    },
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Recorded {
    pub target: Target,
    pub command: String,
    pub sudo: bool,
    pub cwd: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    pub commands: RefCell<Vec<Recorded>>,
    pub uploads: RefCell<Vec<(Target, String, String)>>,
    paths: RefCell<HashSet<String>>,
    files: RefCell<HashMap<String, String>>,
    /// substring -> remaining failures (`None` = always fails)
    failures: RefCell<Vec<(String, Option<usize>)>>,
    responses: RefCell<Vec<(String, String)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(self, path: &str) -> Self {
        self.paths.borrow_mut().insert(path.to_string());
        self
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.paths.borrow_mut().insert(path.to_string());
        self.files
            .borrow_mut()
            .insert(path.to_string(), contents.to_string());
        self
    }

    /// Every command containing `pattern` exits non-zero.
    pub fn failing(self, pattern: &str) -> Self {
        self.failures.borrow_mut().push((pattern.to_string(), None));
        self
    }

    /// The first `times` commands containing `pattern` exit non-zero.
    pub fn failing_times(self, pattern: &str, times: usize) -> Self {
        self.failures
            .borrow_mut()
            .push((pattern.to_string(), Some(times)));
        self
    }

    /// Commands containing `pattern` print `stdout`.
    pub fn responding(self, pattern: &str, stdout: &str) -> Self {
        self.responses
            .borrow_mut()
            .push((pattern.to_string(), stdout.to_string()));
        self
    }

    /// Commands other than the `test -e` / `cat` probes, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.commands
            .borrow()
            .iter()
            .filter(|r| !r.command.starts_with("test -e ") && !r.command.starts_with("cat "))
            .map(|r| r.command.clone())
            .collect()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.commands
            .borrow()
            .iter()
            .filter(|r| r.command.contains(pattern))
            .count()
    }

    pub fn uploaded(&self, dest: &str) -> Option<String> {
        self.uploads
            .borrow()
            .iter()
            .rev()
            .find(|(_, path, _)| path == dest)
            .map(|(_, _, contents)| contents.clone())
    }

    fn should_fail(&self, command: &str) -> bool {
        let mut failures = self.failures.borrow_mut();
        for (pattern, remaining) in failures.iter_mut() {
            if !command.contains(pattern.as_str()) {
                continue;
            }
            match remaining {
                None => return true,
                Some(0) => continue,
                Some(n) => {
                    *n -= 1;
                    return true;
                }
            }
        }
        false
    }

    fn unquote(arg: &str) -> String {
        shlex::split(arg)
            .and_then(|words| words.into_iter().next())
            .unwrap_or_else(|| arg.to_string())
    }
}

impl Transport for FakeTransport {
    fn execute(
        &self,
        target: &Target,
        command: &str,
        options: &RunOptions,
    ) -> Result<CommandOutput, ExecutionError> {
        self.commands.borrow_mut().push(Recorded {
            target: target.clone(),
            command: command.to_string(),
            sudo: options.sudo,
            cwd: options.cwd.clone(),
        });

        if let Some(path) = command.strip_prefix("test -e ") {
            let found = self.paths.borrow().contains(&Self::unquote(path));
            return Ok(CommandOutput {
                success: found,
                code: Some(if found { 0 } else { 1 }),
                stdout: String::new(),
            });
        }
        if let Some(path) = command.strip_prefix("cat ") {
            return Ok(match self.files.borrow().get(&Self::unquote(path)) {
                Some(contents) => CommandOutput {
                    success: true,
                    code: Some(0),
                    stdout: contents.clone(),
                },
                None => CommandOutput {
                    success: false,
                    code: Some(1),
                    stdout: String::new(),
                },
            });
        }
        if self.should_fail(command) {
            return Ok(CommandOutput {
                success: false,
                code: Some(1),
                stdout: String::new(),
            });
        }
        let stdout = self
            .responses
            .borrow()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(CommandOutput {
            success: true,
            code: Some(0),
            stdout,
        })
    }

    fn upload(
        &self,
        target: &Target,
        contents: &str,
        dest: &str,
        _options: &RunOptions,
    ) -> Result<(), ExecutionError> {
        self.uploads
            .borrow_mut()
            .push((target.clone(), dest.to_string(), contents.to_string()));
        self.paths.borrow_mut().insert(dest.to_string());
        self.files
            .borrow_mut()
            .insert(dest.to_string(), contents.to_string());
        Ok(())
    }
}
