// src/cli/dispatcher.rs

use anyhow::{Result, bail};
use colored::Colorize;
use std::{path::Path, rc::Rc};

use crate::{
    cli::{Cli, handlers},
    core::{
        session::{Session, available_stages},
        steps::StepId,
    },
    system::transport::Transport,
};

/// A task, its aliases and its handler.
struct TaskDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    about: &'static str,
    handler: fn(&Session, Vec<String>) -> Result<()>,
}

/// Tasks that are not a single step of the catalog.
static TASK_REGISTRY: &[TaskDefinition] = &[
    TaskDefinition {
        name: "select-stage",
        aliases: &["on"],
        about: "Loads the stage and shows the hosts it targets",
        handler: handlers::stage::handle_select,
    },
    TaskDefinition {
        name: "print-context",
        aliases: &["context", "pprint"],
        about: "Prints the resolved deployment context",
        handler: handlers::stage::handle_print_context,
    },
    TaskDefinition {
        name: "deploy",
        aliases: &[],
        about: "Runs the full deployment pipeline",
        handler: handlers::deploy::handle,
    },
    TaskDefinition {
        name: "django",
        aliases: &["manage"],
        about: "Runs a manage.py command on every host",
        handler: handlers::django::handle_manage,
    },
    TaskDefinition {
        name: "export-data",
        aliases: &["dumpdata"],
        about: "Dumps an application's data, optionally to a local file",
        handler: handlers::django::handle_export_data,
    },
    TaskDefinition {
        name: "rollback-list",
        aliases: &[],
        about: "Lists the available rollback points",
        handler: handlers::rollback::handle_list,
    },
    TaskDefinition {
        name: "rollback-create",
        aliases: &[],
        about: "Creates a rollback point",
        handler: handlers::rollback::handle_create,
    },
    TaskDefinition {
        name: "rollback-restore",
        aliases: &[],
        about: "Restores a rollback point",
        handler: handlers::rollback::handle_restore,
    },
    TaskDefinition {
        name: "context-setup",
        aliases: &[],
        about: "Creates the remote per-stage context file",
        handler: handlers::context::handle_setup,
    },
];

/// What a task name on the command line refers to.
enum Task {
    Registered(&'static TaskDefinition),
    Step(StepId),
}

/// Task names are accepted with underscores too (`print_context`).
fn normalize(name: &str) -> String {
    name.trim().replace('_', "-")
}

/// Finds a task in the registry by its name or alias.
fn find_task(name: &str) -> Option<&'static TaskDefinition> {
    let name = normalize(name);
    TASK_REGISTRY
        .iter()
        .find(|task| task.name == name || task.aliases.contains(&name.as_str()))
}

fn resolve_task(name: &str) -> Option<Task> {
    find_task(name)
        .map(Task::Registered)
        .or_else(|| StepId::from_name(&normalize(name)).map(Task::Step))
}

/// Prints every task: the registry first, then the individual steps.
pub fn print_tasks() {
    println!("{}", "Tasks:".yellow().bold());
    for task in TASK_REGISTRY {
        let aliases = if task.aliases.is_empty() {
            String::new()
        } else {
            format!(" ({})", task.aliases.join(", ")).dimmed().to_string()
        };
        println!("  {:<24} {}{}", task.name.cyan(), task.about, aliases);
    }
    println!("\n{}", "Steps:".yellow().bold());
    for id in StepId::ALL {
        println!("  {:<24} {}", id.name().cyan(), id.about());
    }
}

/// Routes a parsed command line to its task.
///
/// The task name is checked before the manifest is loaded, so a typo never costs a connection.
pub fn dispatch(cli: Cli, base_path: &Path, transport: Rc<dyn Transport>) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    if cli.list {
        print_tasks();
        return Ok(());
    }

    let Some(stage) = cli.stage else {
        let stages = available_stages(base_path)?;
        bail!(
            "No stage given. Usage: dploy <STAGE> <TASK>. Available stages: {}",
            stages.join(", ")
        );
    };

    let task_name = cli.task.unwrap_or_else(|| "select-stage".to_string());
    let Some(task) = resolve_task(&task_name) else {
        bail!(
            "Unknown task '{}'. Run `dploy --list` to see the available tasks.",
            task_name
        );
    };

    let session = Session::load(base_path, &stage, transport)?;
    match task {
        Task::Registered(definition) => (definition.handler)(&session, cli.args),
        Task::Step(id) => handlers::deploy::handle_step(&session, id, cli.args),
    }
}
