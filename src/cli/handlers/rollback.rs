// src/cli/handlers/rollback.rs

// Thin wrappers over the project's `manage.py rollback` command.

use anyhow::Result;
use clap::Parser;

use crate::{
    cli::handlers::commons,
    core::{
        session::Session,
        steps::{django, progress},
    },
    system::transport::quote,
};

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Lists the available rollback points.")]
struct ListArgs {}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Creates a rollback point.")]
struct CreateArgs {}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Restores a rollback point.")]
struct RestoreArgs {
    /// Identifier of the rollback point, as printed by `rollback-list`.
    uid: String,
}

pub fn handle_list(session: &Session, args: Vec<String>) -> Result<()> {
    ListArgs::try_parse_from(&args)?;
    commons::for_each_target(session, |s| {
        django::manage(s, "rollback --list")?;
        Ok(())
    })
}

pub fn handle_create(session: &Session, args: Vec<String>) -> Result<()> {
    CreateArgs::try_parse_from(&args)?;
    progress(format!("Creating rollback on {}", session.stage()));
    commons::for_each_target(session, |s| {
        django::manage(s, "rollback --create")?;
        Ok(())
    })
}

pub fn handle_restore(session: &Session, args: Vec<String>) -> Result<()> {
    let restore_args = RestoreArgs::try_parse_from(&args)?;
    let uid = quote(&restore_args.uid)?;
    progress(format!("Restoring rollback on {}", session.stage()));
    commons::for_each_target(session, |s| {
        django::manage(s, &format!("rollback --restore {}", uid))?;
        Ok(())
    })
}
