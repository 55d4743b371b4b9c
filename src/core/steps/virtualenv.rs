// src/core/steps/virtualenv.rs

use super::{Precondition, Step, StepId, StepResult, progress, system};
use crate::{
    core::session::{Session, join},
    system::transport::quote,
};

/// Runs `<venv>/bin/<pip> <args>` from the project directory, so relative paths inside
/// requirement files resolve.
pub fn pip(session: &Session, args: &str) -> StepResult<String> {
    let (_, pip) = session.python_binaries()?;
    let venv = session.venv_path()?;
    let project_dir = session.project_dir()?;
    Ok(session.sudo_in(&project_dir, &format!("{}/bin/{} {}", venv, pip, args))?)
}

pub struct VirtualenvSetup;

impl Step for VirtualenvSetup {
    fn id(&self) -> StepId {
        StepId::VirtualenvSetup
    }

    fn precondition(&self, session: &Session) -> StepResult<Precondition> {
        let lib = join(&session.venv_path()?, "lib");
        if session.exists(&lib)? {
            return Ok(Precondition::Skip(format!("{} already exists", lib)));
        }
        Ok(Precondition::Ready)
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        progress(format!("Setting up virtualenv on {}", session.stage()));
        let venv = session.venv_path()?;
        let (_, pip) = session.python_binaries()?;
        let version = session.resolve_string("python.version")?;
        let package = session.resolve_string_or("virtualenv.package", "python-virtualenv")?;
        system::ensure_installed(session, &package)?;
        session.sudo(&format!(
            "virtualenv --python=python{} {}",
            quote(&version)?,
            quote(&venv)?
        ))?;
        session.sudo(&format!("{}/bin/{} install -U pip setuptools", venv, pip))?;
        Ok(())
    }
}

pub struct InstallRequirements {
    pub upgrade: bool,
}

impl Step for InstallRequirements {
    fn id(&self) -> StepId {
        StepId::InstallRequirements
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        let project_dir = session.project_dir()?;
        let flags = if self.upgrade { "-qUr" } else { "-qr" };

        for file in ["requirements.pip", "requirements.txt"] {
            let path = join(&project_dir, file);
            if session.exists(&path)? {
                progress(format!("Installing {} on {}", file, session.stage()));
                pip(session, &format!("install {} {}", flags, quote(&path)?))?;
            }
        }

        let upgrade = if self.upgrade { "-U " } else { "" };
        for requirement in session.resolve_list_or("virtualenv.extra_requirements", Vec::new())? {
            progress(format!("Installing {} on {}", requirement, session.stage()));
            let requirement = match requirement.strip_prefix("./") {
                Some(local) => join(&project_dir, local),
                None => requirement,
            };
            pip(session, &format!("install {}{}", upgrade, quote(&requirement)?))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::steps::test_support::{session, session_with};
    use crate::system::fake::FakeTransport;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    #[test]
    fn test_virtualenv_is_skipped_when_lib_exists() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new().with_path("/srv/shop/env/venv/lib"));
        let s = session(dir.path(), &fake);
        assert!(matches!(
            VirtualenvSetup.precondition(&s).unwrap(),
            Precondition::Skip(_)
        ));
    }

    #[test]
    fn test_virtualenv_creation() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new());
        let s = session(dir.path(), &fake);
        assert_eq!(VirtualenvSetup.precondition(&s).unwrap(), Precondition::Ready);
        VirtualenvSetup.run(&s).unwrap();
        assert_eq!(
            fake.command_lines(),
            vec![
                "dpkg -s python-virtualenv",
                "virtualenv --python=python3 /srv/shop/env/venv",
                "/srv/shop/env/venv/bin/pip3 install -U pip setuptools",
            ]
        );
    }

    #[test]
    fn test_virtualenv_tool_is_installed_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new().failing("dpkg -s python-virtualenv"));
        let s = session(dir.path(), &fake);
        VirtualenvSetup.run(&s).unwrap();
        assert_eq!(
            fake.command_lines(),
            vec![
                "dpkg -s python-virtualenv",
                "apt-get install -qy python-virtualenv",
                "virtualenv --python=python3 /srv/shop/env/venv",
                "/srv/shop/env/venv/bin/pip3 install -U pip setuptools",
            ]
        );
    }

    #[test]
    fn test_requirements_and_extras() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new().with_path("/srv/shop/src/shop/requirements.txt"));
        let s = session_with(
            dir.path(),
            &fake,
            "virtualenv:\n  extra_requirements: ['./vendor/lib', 'gunicorn']\n",
        );
        InstallRequirements { upgrade: false }.run(&s).unwrap();
        assert_eq!(
            fake.command_lines(),
            vec![
                "/srv/shop/env/venv/bin/pip3 install -qr /srv/shop/src/shop/requirements.txt",
                "/srv/shop/env/venv/bin/pip3 install /srv/shop/src/shop/vendor/lib",
                "/srv/shop/env/venv/bin/pip3 install gunicorn",
            ]
        );
        assert!(
            fake.commands
                .borrow()
                .iter()
                .filter(|c| c.command.contains("pip3"))
                .all(|c| c.cwd.as_deref() == Some("/srv/shop/src/shop"))
        );
    }

    #[test]
    fn test_upgrade_uses_dash_u() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new().with_path("/srv/shop/src/shop/requirements.pip"));
        let s = session(dir.path(), &fake);
        InstallRequirements { upgrade: true }.run(&s).unwrap();
        assert_eq!(
            fake.command_lines(),
            vec!["/srv/shop/env/venv/bin/pip3 install -qUr /srv/shop/src/shop/requirements.pip"]
        );
    }
}
