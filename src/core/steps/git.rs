// src/core/steps/git.rs

use super::{Step, StepId, StepResult, progress, system::ensure_installed};
use crate::{
    core::session::{Session, git_dirname, join},
    system::transport::quote,
};

/// Clones the repository, or updates an existing working copy in place.
pub struct Checkout;

impl Step for Checkout {
    fn id(&self) -> StepId {
        StepId::Checkout
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        ensure_installed(session, "git")?;

        let branch = session.resolve_string("git.branch")?;
        let repository = session.resolve_string("git.repository")?;
        let git_root = session.resolve_string("git.dirs.root")?;
        let dirname = git_dirname(&repository);
        let git_path = join(&git_root, dirname);
        let branch_q = quote(&branch)?;

        if session.exists(&join(&git_path, ".git"))? {
            progress(format!("Updating {} on {}", branch, session.stage()));
            for command in [
                "git reset --hard".to_string(),
                "git pull".to_string(),
                "git submodule update --init --recursive".to_string(),
                format!("git checkout {}", branch_q),
                "find . -iname '*.pyc' | xargs rm -f".to_string(),
            ] {
                session.sudo_in(&git_path, &command)?;
            }
        } else {
            progress(format!(
                "Cloning {} @ {} -> {} on {}",
                branch,
                repository,
                git_path,
                session.stage()
            ));
            session.sudo_in(
                &git_root,
                &format!(
                    "git clone --recursive -b {} {} {}",
                    branch_q,
                    quote(&repository)?,
                    quote(dirname)?
                ),
            )?;
        }
        Ok(())
    }
}
