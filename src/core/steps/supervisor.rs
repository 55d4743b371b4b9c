// src/core/steps/supervisor.rs

use super::{Step, StepId, StepResult, extras, progress, server_file_stem, system, upload_template};
use crate::{
    core::session::{Session, join},
    system::transport::{RunOptions, quote},
};
use serde_json::Value as JsonValue;

/// Registers the uWSGI process with supervisor and (re)starts it.
pub struct SupervisorSetup;

impl Step for SupervisorSetup {
    fn id(&self) -> StepId {
        StepId::SupervisorSetup
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        progress(format!("Configuring supervisor on {}", session.stage()));
        system::ensure_installed(session, "supervisor")?;

        let project_dir = session.project_dir()?;
        let dest = join(
            &session.resolve_string("supervisor.config_dir")?,
            &format!("{}.conf", server_file_stem(session)?),
        );
        upload_template(
            session,
            "supervisor.template",
            &dest,
            extras([
                ("uwsgi_ini", JsonValue::from(format!("{}/uwsgi.ini", project_dir))),
                ("venv_path", JsonValue::from(session.venv_path()?)),
            ]),
        )?;
        session.sudo("supervisorctl update")?;

        let program = quote(&session.resolve_string("supervisor.program_name")?)?;
        // `status` exits non-zero for stopped programs; only its output matters.
        let status = session.execute(
            &format!("supervisorctl status {}", program),
            &RunOptions::quiet_sudo(),
        )?;
        if status.stdout.contains("RUNNING") {
            session.sudo(&format!("supervisorctl restart {}", program))?;
        } else if status.stdout.contains("STOPPED") {
            session.sudo(&format!("supervisorctl start {}", program))?;
        }
        Ok(())
    }
}
