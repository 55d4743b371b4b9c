//! dploy: stage-aware deployment of Django applications over SSH.
//!
//! A project describes its stages in `dploy.yml`. The [`core`] layer merges that manifest with
//! the built-in defaults and the server-side overrides, resolves templated values and runs the
//! provisioning steps through a [`system::transport::Transport`].

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;
