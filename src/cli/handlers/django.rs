// src/cli/handlers/django.rs

use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;

use crate::{
    cli::handlers::commons,
    core::{session::Session, steps::django},
};

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Runs a manage.py command on every host.")]
struct ManageArgs {
    /// The manage.py command and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Dumps an application's data with manage.py dumpdata."
)]
struct ExportDataArgs {
    /// The Django application label.
    app: String,

    /// Local file to write the dump to. Printed to the terminal when omitted.
    dest: Option<String>,
}

pub fn handle_manage(session: &Session, args: Vec<String>) -> Result<()> {
    let manage_args = ManageArgs::try_parse_from(&args)?;
    if manage_args.command.is_empty() {
        bail!("Usage: dploy <STAGE> django <COMMAND> [ARGS]...");
    }
    let command = manage_args.command.join(" ");
    commons::for_each_target(session, |s| {
        django::manage(s, &command)?;
        Ok(())
    })
}

/// The dump comes from the first host of the stage.
pub fn handle_export_data(session: &Session, args: Vec<String>) -> Result<()> {
    let export_args = ExportDataArgs::try_parse_from(&args)?;
    let dest = export_args
        .dest
        .map(|d| PathBuf::from(shellexpand::tilde(&d).into_owned()));
    let target = commons::bind_first_target(session);
    log::debug!("Exporting {} from {}", export_args.app, target);
    django::export_data(session, &export_args.app, dest.as_deref())?;
    Ok(())
}
