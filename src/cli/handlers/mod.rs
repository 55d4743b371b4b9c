// src/cli/handlers/mod.rs

// One module per group of tasks; the dispatcher's registry points into them.

pub mod commons;
pub mod context;
pub mod deploy;
pub mod django;
pub mod rollback;
pub mod stage;
