// src/core/steps/system.rs

use super::{Precondition, Step, StepId, StepResult, progress};
use crate::{
    core::session::Session,
    models::Value,
    system::{
        executor::ExecutionError,
        transport::{RunOptions, quote},
    },
};
use colored::Colorize;
use std::{thread, time::Duration};

/// `dpkg -s <package>` succeeds.
pub fn is_installed(session: &Session, package: &str) -> Result<bool, ExecutionError> {
    let output = session.execute(
        &format!("dpkg -s {}", quote(package)?),
        &RunOptions::quiet_sudo(),
    )?;
    Ok(output.success)
}

pub fn apt_install(session: &Session, packages: &str) -> Result<(), ExecutionError> {
    session.sudo(&format!("apt-get install -qy {}", packages))?;
    Ok(())
}

/// Installs `package` unless it is already present.
pub fn ensure_installed(session: &Session, package: &str) -> Result<(), ExecutionError> {
    if !is_installed(session, package)? {
        progress(format!("Installing {} on {}", package, session.target()));
        apt_install(session, &quote(package)?)?;
    }
    Ok(())
}

/// Joins YAML line continuations (`\` + newline) and squeezes whitespace.
fn package_list(raw: &str) -> String {
    raw.replace("\\\n", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct InstallPackages;

impl Step for InstallPackages {
    fn id(&self) -> StepId {
        StepId::InstallPackages
    }

    fn precondition(&self, session: &Session) -> StepResult<Precondition> {
        let packages = session.resolve_string_or("system.packages", "")?;
        if package_list(&packages).is_empty() {
            return Ok(Precondition::Skip("no system.packages configured".to_string()));
        }
        Ok(Precondition::Ready)
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        let packages = package_list(&session.resolve_string_or("system.packages", "")?);
        progress(format!("Installing system dependencies on {}", session.stage()));
        session.sudo("apt-get update")?;
        apt_install(session, &packages)?;
        Ok(())
    }
}

pub struct CreateDirs;

impl CreateDirs {
    /// Every `<section>.dirs.<name>` path of the context, rendered.
    pub fn directories(session: &Session) -> StepResult<Vec<String>> {
        let tree = session.tree()?;
        let mut paths = Vec::new();
        for (section, value) in tree {
            let Some(dirs) = value
                .as_tree()
                .and_then(|t| t.get("dirs"))
                .and_then(Value::as_tree)
            else {
                continue;
            };
            for name in dirs.keys() {
                let path = session.resolve_string(&format!("{}.dirs.{}", section, name))?;
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        Ok(paths)
    }
}

impl Step for CreateDirs {
    fn id(&self) -> StepId {
        StepId::CreateDirs
    }

    fn precondition(&self, session: &Session) -> StepResult<Precondition> {
        if Self::directories(session)?.is_empty() {
            return Ok(Precondition::Skip("no directories configured".to_string()));
        }
        Ok(Precondition::Ready)
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        progress(format!("Creating directories on {}", session.stage()));
        let paths = Self::directories(session)?
            .iter()
            .map(|p| quote(p))
            .collect::<Result<Vec<_>, _>>()?
            .join(" ");
        let user = session.resolve_string("system.user")?;
        let group = session.resolve_string("system.group")?;
        session.sudo(&format!("mkdir -p {}", paths))?;
        session.sudo(&format!(
            "chown -R {} {}",
            quote(&format!("{}:{}", user, group))?,
            paths
        ))?;
        Ok(())
    }
}

pub struct CheckServices;

impl CheckServices {
    /// Probe commands per service. A probe that cannot be built is `Err` and reported as a
    /// failure.
    fn checks(session: &Session) -> Vec<(&'static str, StepResult<String>)> {
        let uwsgi = || -> StepResult<String> {
            let uwsgi_ini = format!("{}/uwsgi.ini", session.project_dir()?);
            Ok(format!("ps aux | grep '[u]wsgi' | grep -q {}", quote(&uwsgi_ini)?))
        };
        vec![
            ("uwsgi", uwsgi()),
            ("nginx", Ok("ps aux | grep -q '[n]ginx'".to_string())),
            ("supervisor", Ok("ps aux | grep -q '[s]upervisord'".to_string())),
        ]
    }
}

impl Step for CheckServices {
    fn id(&self) -> StepId {
        StepId::CheckServices
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        progress(format!("Checking services on {}", session.stage()));
        let settle = session
            .resolve_u64_or("services.settle_seconds", 3)
            .unwrap_or_else(|e| {
                log::warn!("{}", e);
                3
            });
        if settle > 0 {
            thread::sleep(Duration::from_secs(settle));
        }
        let quiet = RunOptions {
            quiet: true,
            ..Default::default()
        };
        for (service, command) in Self::checks(session) {
            let label = format!("{}...", service);
            // A failed probe is reported, never propagated.
            let running = match command {
                Ok(command) => match session.execute(&command, &quiet) {
                    Ok(output) => output.success,
                    Err(e) => {
                        log::warn!("Could not check {}: {}", service, e);
                        false
                    }
                },
                Err(e) => {
                    log::warn!("Could not check {}: {}", service, e);
                    false
                }
            };
            let status = if running {
                "OK".green().bold()
            } else {
                "FAIL".red().bold()
            };
            println!(" - {:<20} [{}]", label, status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::steps::test_support::{session, session_with};
    use crate::system::fake::FakeTransport;
    use std::rc::Rc;

    #[test]
    fn test_package_list_joins_continuations() {
        assert_eq!(package_list("nginx \\\n  git\n  curl "), "nginx git curl");
        assert_eq!(package_list("  "), "");
    }

    #[test]
    fn test_install_packages_skips_when_nothing_configured() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new());
        let s = session(dir.path(), &fake);
        assert!(matches!(
            InstallPackages.precondition(&s).unwrap(),
            Precondition::Skip(_)
        ));

        let s = session_with(dir.path(), &fake, "system:\n  packages: \"nginx \\\\\n git\"\n");
        assert_eq!(InstallPackages.precondition(&s).unwrap(), Precondition::Ready);
        InstallPackages.run(&s).unwrap();
        assert_eq!(
            fake.command_lines(),
            vec!["apt-get update", "apt-get install -qy nginx git"]
        );
    }

    #[test]
    fn test_create_dirs_batches_every_dirs_entry() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new());
        let s = session(dir.path(), &fake);
        assert_eq!(
            CreateDirs::directories(&s).unwrap(),
            vec!["/srv/shop/src", "/srv/shop/env", "/srv/shop/logs"]
        );
        CreateDirs.run(&s).unwrap();
        assert_eq!(
            fake.command_lines(),
            vec![
                "mkdir -p /srv/shop/src /srv/shop/env /srv/shop/logs",
                "chown -R www-data:www-data /srv/shop/src /srv/shop/env /srv/shop/logs",
            ]
        );
        assert!(fake.commands.borrow().iter().all(|c| c.sudo));
    }

    #[test]
    fn test_check_services_never_fails() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new().failing("[n]ginx"));
        let s = session(dir.path(), &fake);
        CheckServices.run(&s).unwrap();
        assert_eq!(fake.count_matching("ps aux"), 3);
    }

    #[test]
    fn test_check_services_reports_unconfigured_project_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new());
        let s = session_with(
            dir.path(),
            &fake,
            "git:\n  repository: ~\nservices:\n  settle_seconds: 0\n",
        );
        assert!(s.project_dir().is_err());
        CheckServices.run(&s).unwrap();
        assert_eq!(fake.count_matching("ps aux"), 2);
        assert_eq!(fake.count_matching("[u]wsgi"), 0);
    }

    #[test]
    fn test_ensure_installed_only_installs_missing_packages() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new().failing("dpkg -s git"));
        let s = session(dir.path(), &fake);
        ensure_installed(&s, "git").unwrap();
        ensure_installed(&s, "supervisor").unwrap();
        assert_eq!(fake.count_matching("apt-get install -qy git"), 1);
        assert_eq!(fake.count_matching("apt-get install -qy supervisor"), 0);
    }
}
