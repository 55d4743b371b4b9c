// src/cli/handlers/stage.rs

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use crate::{
    cli::handlers::commons,
    core::session::Session,
    models::{Host, Target},
};

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Loads the stage and shows the hosts it targets."
)]
struct SelectArgs {}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Prints the resolved deployment context.")]
struct PrintContextArgs {
    /// Print the merged configuration as written, without rendering templates.
    #[arg(long)]
    raw: bool,

    /// Merge in the remote per-stage override of the first host.
    #[arg(long)]
    remote: bool,
}

pub fn handle_select(session: &Session, args: Vec<String>) -> Result<()> {
    SelectArgs::try_parse_from(&args)?;
    let hosts = if session.is_local() {
        "the local machine".to_string()
    } else {
        session
            .hosts()
            .iter()
            .map(Host::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    println!(
        "{} {} {}",
        "Stage".bold(),
        session.stage().green().bold(),
        format!("-> {}", hosts).dimmed()
    );
    Ok(())
}

pub fn handle_print_context(session: &Session, args: Vec<String>) -> Result<()> {
    let print_args = PrintContextArgs::try_parse_from(&args)?;
    if print_args.remote {
        commons::bind_first_target(session);
    } else {
        session.bind(Target::Local);
    }
    let yaml = context_yaml(session, print_args.raw)?;

    let rule = "-".repeat(80);
    println!("{}", rule);
    println!("{}", "Global context".green().bold());
    println!("{}", rule);
    println!("{}", yaml.trim_end().yellow());
    println!("{}", rule);
    Ok(())
}

/// The context for the bound target as YAML, rendered unless `raw`.
fn context_yaml(session: &Session, raw: bool) -> Result<String> {
    let yaml = if raw {
        serde_yaml::to_string(session.tree()?)
    } else {
        serde_yaml::to_string(&session.resolver()?.materialize()?)
    };
    yaml.context("Could not serialize the context")
}
