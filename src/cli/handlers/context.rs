// src/cli/handlers/context.rs

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use std::fs;

use crate::{
    cli::handlers::commons,
    constants::DEFAULT_REMOTE_CONTEXT_ROOT,
    core::{config_store::remote_override_path, session::Session, steps::progress},
    system::transport::quote,
};

const CONTEXT_SKELETON: &str = "\
# Server-side overrides for {project} ({stage}).
# Merged over dploy.yml for this stage; keep secrets here rather than in the repository.
#
# django:
#   secret_key: change-me
";

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Creates the remote per-stage context file."
)]
struct SetupArgs {
    /// Local YAML file to upload. An empty skeleton is created when omitted.
    file: Option<String>,
}

pub fn handle_setup(session: &Session, args: Vec<String>) -> Result<()> {
    let setup_args = SetupArgs::try_parse_from(&args)?;
    progress(format!("Configuring context on {}", session.stage()));
    if session.is_local() {
        bail!("This task is only for remote stages.");
    }

    let contents = match &setup_args.file {
        Some(file) => {
            let path = shellexpand::tilde(file).into_owned();
            fs::read_to_string(&path).with_context(|| format!("Could not read '{}'", path))?
        }
        None => String::new(),
    };

    // The location comes from the local layers: the override is what is being created.
    let local = session.local_resolver();
    let project = local.resolve_string("dploy.project_name")?;
    let root = local.resolve_string_or("dploy.context_root", DEFAULT_REMOTE_CONTEXT_ROOT)?;
    let path = remote_override_path(&root, &project, session.stage());

    let target = commons::bind_first_target(session);
    if session.exists(&path)? {
        println!("{}", format!("Context already exists: {}", path).yellow());
        return Ok(());
    }

    let contents = if contents.is_empty() {
        CONTEXT_SKELETON
            .replace("{project}", &project)
            .replace("{stage}", session.stage())
    } else {
        contents
    };
    if let Some((parent, _)) = path.rsplit_once('/').filter(|(parent, _)| !parent.is_empty()) {
        session.sudo(&format!("mkdir -p {}", quote(parent)?))?;
    }
    session.upload(&contents, &path)?;
    session.sudo(&format!("chmod 600 {}", quote(&path)?))?;
    println!("{}", format!("Context created on {}: {}", target, path).green());
    Ok(())
}
