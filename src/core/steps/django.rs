// src/core/steps/django.rs

use super::{Precondition, Step, StepError, StepId, StepResult, extras, progress, upload_rendered};
use crate::{
    constants::{MIGRATIONS_MIN_VERSION, PROJECT_TEMPLATES_DIR},
    core::{session::Session, templates},
    system::transport::{RunOptions, quote},
};
use colored::Colorize;
use std::path::{Path, PathBuf};

/// Runs `manage.py <command>` with the virtualenv's interpreter from the project directory.
pub fn manage(session: &Session, command: &str) -> StepResult<String> {
    Ok(session.sudo_in(&session.project_dir()?, &manage_command(session, command)?)?)
}

fn manage_command(session: &Session, command: &str) -> StepResult<String> {
    let (python, _) = session.python_binaries()?;
    Ok(format!(
        "{}/bin/{} manage.py {}",
        session.venv_path()?,
        python,
        command
    ))
}

/// Django ships migrations from 1.7 on. Versions are compared numerically; anything that does
/// not parse as `major.minor[...]` is treated as unsupported.
pub fn version_supports_migrations(version: &str) -> bool {
    let mut parts = version.trim().split('.');
    let number = |part: Option<&str>| -> Option<u64> {
        let digits: String = part?.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    };
    let Some(major) = number(parts.next()) else {
        return false;
    };
    let minor = number(parts.next()).unwrap_or(0);
    (major, minor) >= MIGRATIONS_MIN_VERSION
}

/// Local settings templates, in the order they are tried.
pub fn settings_candidates(stage: &str, project_name: &str) -> Vec<String> {
    let mut candidates = vec![format!("{}/{}_settings.py", PROJECT_TEMPLATES_DIR, stage)];
    for suffix in ["-dist", "-default", "-example", ".dist", ".default", ".example"] {
        candidates.push(format!("{}/local_settings.py{}", project_name, suffix));
    }
    candidates
}

/// The first candidate that exists under `base_path`.
pub fn select_settings_template(base_path: &Path, candidates: &[String]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|candidate| base_path.join(candidate))
        .find(|path| path.is_file())
}

pub struct DjangoSettings;

impl Step for DjangoSettings {
    fn id(&self) -> StepId {
        StepId::DjangoSettings
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        progress(format!("Setting up django settings on {}", session.stage()));
        let project_name = session.resolve_string("django.project_name")?;
        let candidates = settings_candidates(session.stage(), &project_name);
        let Some(path) = select_settings_template(Path::new(session.base_path()), &candidates)
        else {
            return Err(StepError::SettingsTemplateNotFound { candidates });
        };
        log::debug!("Using settings template {}", path.display());

        let project_dir = session.project_dir()?;
        let dest = format!("{}/{}/local_settings.py", project_dir, project_name);
        let template = templates::read(&path)?;
        upload_rendered(session, &template, &dest, extras([]))
    }
}

pub struct DjangoMigrate;

impl Step for DjangoMigrate {
    fn id(&self) -> StepId {
        StepId::DjangoMigrate
    }

    fn precondition(&self, session: &Session) -> StepResult<Precondition> {
        let options = RunOptions::quiet_sudo().in_dir(session.project_dir()?);
        let version = session.run_with(&manage_command(session, "--version")?, &options)?;
        let version = version.trim();
        if version_supports_migrations(version) {
            return Ok(Precondition::Ready);
        }
        Ok(Precondition::Skip(format!(
            "Django {} does not support migrations",
            if version.is_empty() { "(unknown)" } else { version }
        )))
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        progress(format!("Django migrate on {}", session.stage()));
        let fake_on_failure = session.resolve_bool_or("django.migrations.fake_on_failure", true)?;
        match manage(session, "migrate --noinput") {
            Ok(_) => Ok(()),
            Err(StepError::Execution(e)) if fake_on_failure => {
                log::warn!("Migration failed, faking: {}", e);
                println!(
                    "{}",
                    format!("WARNING: faked migrations because of exception {}", e).yellow()
                );
                manage(session, "migrate --noinput --fake")?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

pub struct DjangoCollectstatic;

impl Step for DjangoCollectstatic {
    fn id(&self) -> StepId {
        StepId::DjangoCollectstatic
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        progress(format!("Django collectstatic on {}", session.stage()));
        let command = session.resolve_string("django.commands.collectstatic")?;
        manage(session, &command)?;
        Ok(())
    }
}

/// `dumpdata` for `app`. Without `dest` the dump goes to the terminal; with it, the dump is
/// written to a temporary remote file, downloaded to `dest` and removed.
pub fn export_data(session: &Session, app: &str, dest: Option<&Path>) -> StepResult<()> {
    let app_q = quote(app)?;
    let Some(dest) = dest else {
        manage(session, &format!("dumpdata --indent=2 {}", app_q))?;
        return Ok(());
    };
    let tmp_file = format!("/tmp/{}.tmp", app);
    let tmp_q = quote(&tmp_file)?;
    manage(session, &format!("dumpdata --indent=2 {} > {}", app_q, tmp_q))?;
    let data = session.download(&tmp_file)?;
    std::fs::write(dest, data).map_err(|source| StepError::LocalIo {
        path: dest.display().to_string(),
        source,
    })?;
    session.sudo(&format!("rm -f {}", tmp_q))?;
    Ok(())
}
