// src/core/steps/uwsgi.rs

use super::{Step, StepId, StepResult, extras, progress, upload_template};
use crate::{core::session::Session, system::transport::quote};
use serde_json::Value as JsonValue;

pub struct UwsgiSetup;

impl Step for UwsgiSetup {
    fn id(&self) -> StepId {
        StepId::UwsgiSetup
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        progress(format!("Configuring uwsgi on {}", session.stage()));
        let project_dir = session.project_dir()?;
        let project_name = session.resolve_string("django.project_name")?;
        let wsgi_file = format!("{}/{}/wsgi.py", project_dir, project_name);
        let uwsgi_ini = format!("{}/uwsgi.ini", project_dir);

        let log_file = quote(&format!("{}/uwsgi.log", session.resolve_string("logs.dirs.root")?))?;
        let owner = format!(
            "{}:{}",
            session.resolve_string("system.user")?,
            session.resolve_string("system.group")?
        );
        session.sudo(&format!("touch {}", log_file))?;
        session.sudo(&format!("chown {} {}", quote(&owner)?, log_file))?;

        upload_template(
            session,
            "uwsgi.template",
            &uwsgi_ini,
            extras([
                ("wsgi_file", JsonValue::from(wsgi_file)),
                ("venv_path", JsonValue::from(session.venv_path()?)),
            ]),
        )
    }
}
