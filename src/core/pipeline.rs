// src/core/pipeline.rs

//! # Pipeline Runner
//!
//! Runs steps in their fixed order. A step runs on each of its hosts in turn; a failure on any
//! host aborts the whole run. Nothing is rolled back.

use crate::{
    core::{
        session::Session,
        steps::{self, Precondition, Step, StepError, StepId, StepOptions, StepResult},
    },
    models::Target,
};
use colored::Colorize;

/// The order `deploy` runs the catalog in.
pub const DEPLOY_ORDER: &[StepId] = &[
    StepId::CreateDirs,
    StepId::Checkout,
    StepId::VirtualenvSetup,
    StepId::InstallRequirements,
    StepId::DjangoSettings,
    StepId::DjangoMigrate,
    StepId::DjangoCollectstatic,
    StepId::CronSetup,
    StepId::UwsgiSetup,
    StepId::SupervisorSetup,
    StepId::NginxSetup,
];

/// What happened to one step on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: StepId,
    pub target: Target,
    pub skipped: Option<String>,
}

/// Runs `step` on `targets`, one host at a time.
pub fn run_step_on(
    session: &Session,
    step: &dyn Step,
    targets: &[Target],
) -> StepResult<Vec<StepOutcome>> {
    let mut outcomes = Vec::with_capacity(targets.len());
    for target in targets {
        session.bind(target.clone());
        let fail = |source: StepError| StepError::Failed {
            step: step.id(),
            target: target.clone(),
            source: Box::new(source),
        };

        log::debug!("{} on {}", step.id(), target);
        let skipped = match step.precondition(session).map_err(fail)? {
            Precondition::Skip(reason) => {
                log::warn!("{} skipped on {}: {}", step.id(), target, reason);
                println!("{}", reason.yellow());
                Some(reason)
            }
            Precondition::Ready => {
                step.run(session).map_err(fail)?;
                None
            }
        };
        outcomes.push(StepOutcome {
            step: step.id(),
            target: target.clone(),
            skipped,
        });
    }
    Ok(outcomes)
}

/// Runs `step` on the hosts it targets.
pub fn run_step(session: &Session, step: &dyn Step) -> StepResult<Vec<StepOutcome>> {
    let targets = step.targets(session)?;
    run_step_on(session, step, &targets)
}

/// Runs a single step of the catalog by id.
pub fn run_single(
    session: &Session,
    id: StepId,
    options: StepOptions,
) -> StepResult<Vec<StepOutcome>> {
    run_step(session, steps::step(id, options).as_ref())
}

/// The full deployment. Hosts without the project directory get the system packages first.
pub fn deploy(session: &Session, options: StepOptions) -> StepResult<Vec<StepOutcome>> {
    println!(
        "{}",
        format!("Deploying project on {} !", session.stage()).bold()
    );
    let mut outcomes = Vec::new();

    let packages = steps::step(StepId::InstallPackages, options);
    for target in session.targets() {
        session.bind(target.clone());
        let project_dir = session.project_dir()?;
        if session.exists(&project_dir)? {
            log::debug!("{} exists on {}, skipping system packages", project_dir, target);
            continue;
        }
        outcomes.extend(run_step_on(session, packages.as_ref(), &[target])?);
    }

    for id in DEPLOY_ORDER {
        outcomes.extend(run_single(session, *id, options)?);
    }

    println!(
        "{}",
        format!("Deployment on {} complete.", session.stage())
            .green()
            .bold()
    );
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::steps::test_support::{session, session_with};
    use crate::system::fake::FakeTransport;
    use pretty_assertions::assert_eq;
    use std::{fs, path::Path, rc::Rc};

    fn project(dir: &Path) {
        fs::create_dir_all(dir.join("dploy")).unwrap();
        fs::write(dir.join("dploy/prod_settings.py"), "DEBUG = False\n").unwrap();
    }

    fn steps_run(outcomes: &[StepOutcome]) -> Vec<StepId> {
        outcomes
            .iter()
            .filter(|o| o.skipped.is_none())
            .map(|o| o.step)
            .collect()
    }

    #[test]
    fn test_deploy_runs_steps_in_order() {
        let dir = tempfile::tempdir().unwrap();
        project(dir.path());
        let fake = Rc::new(
            FakeTransport::new()
                .with_path("/srv/shop/src/shop")
                .responding("manage.py --version", "4.2\n"),
        );
        let s = session_with(dir.path(), &fake, "system:\n  packages: nginx\n");
        let outcomes = deploy(&s, StepOptions::default()).unwrap();

        assert_eq!(
            steps_run(&outcomes),
            vec![
                StepId::CreateDirs,
                StepId::Checkout,
                StepId::VirtualenvSetup,
                StepId::InstallRequirements,
                StepId::DjangoSettings,
                StepId::DjangoMigrate,
                StepId::DjangoCollectstatic,
                StepId::UwsgiSetup,
                StepId::SupervisorSetup,
                StepId::NginxSetup,
            ]
        );
        // The project directory exists, so packages are not installed; no cron template.
        assert_eq!(fake.count_matching("apt-get update"), 0);
        assert!(
            outcomes
                .iter()
                .any(|o| o.step == StepId::CronSetup && o.skipped.is_some())
        );
    }

    #[test]
    fn test_fresh_host_gets_system_packages_first() {
        let dir = tempfile::tempdir().unwrap();
        project(dir.path());
        let fake = Rc::new(FakeTransport::new().responding("manage.py --version", "4.2\n"));
        let s = session_with(dir.path(), &fake, "system:\n  packages: nginx\n");
        let outcomes = deploy(&s, StepOptions::default()).unwrap();
        assert_eq!(outcomes[0].step, StepId::InstallPackages);
        assert_eq!(outcomes[0].skipped, None);
        assert_eq!(fake.command_lines()[0], "apt-get update");
    }

    #[test]
    fn test_failure_aborts_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        project(dir.path());
        let fake = Rc::new(
            FakeTransport::new()
                .with_path("/srv/shop/src/shop")
                .failing("git clone"),
        );
        let s = session(dir.path(), &fake);
        let err = deploy(&s, StepOptions::default()).unwrap_err();
        match &err {
            StepError::Failed { step, .. } => assert_eq!(*step, StepId::Checkout),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("checkout failed on deploy@web1"));
        assert_eq!(fake.count_matching("virtualenv"), 0);
    }

    #[test]
    fn test_step_runs_on_every_host() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new());
        let s = session_with(dir.path(), &fake, "hosts: [web2]\n");
        assert_eq!(s.hosts().len(), 2);
        let outcomes = run_single(&s, StepId::CreateDirs, StepOptions::default()).unwrap();
        assert_eq!(outcomes.len(), 2);
        let targets: Vec<_> = fake
            .commands
            .borrow()
            .iter()
            .filter(|c| c.command.starts_with("mkdir"))
            .map(|c| c.target.to_string())
            .collect();
        assert_eq!(targets, vec!["deploy@web1", "web2"]);
    }

    #[test]
    fn test_upgrade_option_reaches_install_requirements() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new().with_path("/srv/shop/src/shop/requirements.txt"));
        let s = session(dir.path(), &fake);
        run_single(&s, StepId::InstallRequirements, StepOptions { upgrade: true }).unwrap();
        assert_eq!(fake.count_matching("install -qUr"), 1);
    }
}
