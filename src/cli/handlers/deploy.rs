// src/cli/handlers/deploy.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use crate::core::{
    pipeline::{self, StepOutcome},
    session::Session,
    steps::{StepId, StepOptions},
};

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Runs the full deployment pipeline.")]
struct DeployArgs {
    /// Upgrade the Python requirements (`pip install -U`).
    #[arg(long, short)]
    upgrade: bool,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Runs a single deployment step.")]
struct StepArgs {
    /// Upgrade the Python requirements (install-requirements only).
    #[arg(long, short)]
    upgrade: bool,
}

pub fn handle(session: &Session, args: Vec<String>) -> Result<()> {
    let deploy_args = DeployArgs::try_parse_from(&args)?;
    let outcomes = pipeline::deploy(
        session,
        StepOptions {
            upgrade: deploy_args.upgrade,
        },
    )?;
    print_skipped(&outcomes);
    Ok(())
}

/// Runs one step of the catalog on the hosts it targets.
pub fn handle_step(session: &Session, id: StepId, args: Vec<String>) -> Result<()> {
    let step_args = StepArgs::try_parse_from(&args)?;
    let outcomes = pipeline::run_single(
        session,
        id,
        StepOptions {
            upgrade: step_args.upgrade,
        },
    )?;
    print_skipped(&outcomes);
    Ok(())
}

fn print_skipped(outcomes: &[StepOutcome]) {
    let skipped: Vec<_> = outcomes.iter().filter(|o| o.skipped.is_some()).collect();
    if skipped.is_empty() {
        return;
    }
    println!("\n{}", "Skipped:".yellow().bold());
    for outcome in skipped {
        println!(
            "  {:<24} {:<20} {}",
            outcome.step.name().cyan(),
            outcome.target.to_string(),
            outcome.skipped.as_deref().unwrap_or_default().dimmed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::steps::test_support::session;
    use crate::system::fake::FakeTransport;
    use std::rc::Rc;

    #[test]
    fn test_step_upgrade_flag() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new().with_path("/srv/shop/src/shop/requirements.pip"));
        let s = session(dir.path(), &fake);
        handle_step(&s, StepId::InstallRequirements, vec!["--upgrade".to_string()]).unwrap();
        assert_eq!(fake.count_matching("install -qUr"), 1);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new());
        let s = session(dir.path(), &fake);
        assert!(handle(&s, vec!["--force".to_string()]).is_err());
        assert!(fake.commands.borrow().is_empty());
    }
}
