// src/core/mod.rs

//! The configuration context engine and the deployment pipeline built on top of it.

pub mod config_store;
pub mod context_resolver;
pub mod pipeline;
pub mod renderer;
pub mod session;
pub mod steps;
pub mod templates;
