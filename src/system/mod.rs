//! # System Interaction Layer
//!
//! This module is the boundary between the deployment logic and the machines being deployed to.
//!
//! ## Modules
//!
//! - **`transport`**: The [`transport::Transport`] trait every provisioning step talks to, with
//!   the derived `run` / `exists` / `download` operations and shell quoting.
//! - **`executor`**: [`executor::ShellTransport`], the process-spawning implementation: `sh -c`
//!   for the local machine and the system `ssh` client for remote hosts.

pub mod executor;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;
