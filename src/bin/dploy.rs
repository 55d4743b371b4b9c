// src/bin/dploy.rs

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use dploy::{
    cli::{Cli, dispatcher},
    system::executor::ShellTransport,
};
use std::{env, rc::Rc};

/// Sets up logging, resolves the invocation directory and hands the command line to the
/// dispatcher. Every error ends up here.
fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let cwd = env::current_dir().context("Could not read the current directory")?;
    let base_path = dunce::canonicalize(&cwd)
        .with_context(|| format!("Could not resolve '{}'", cwd.display()))?;
    dispatcher::dispatch(cli, &base_path, Rc::new(ShellTransport::new()))
}
