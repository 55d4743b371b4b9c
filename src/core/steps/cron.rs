// src/core/steps/cron.rs

use super::{Precondition, Step, StepId, StepResult, extras, progress, server_file_stem, upload_rendered};
use crate::{
    core::{
        session::{Session, join},
        templates,
    },
    system::transport::quote,
};
use std::path::Path;

const TEMPLATE: &str = "cron.template";

/// Installs `dploy/cron.template` as `<cron.config_path>/<server name>`. Projects without a
/// cron template skip the step.
pub struct CronSetup;

impl Step for CronSetup {
    fn id(&self) -> StepId {
        StepId::CronSetup
    }

    fn precondition(&self, session: &Session) -> StepResult<Precondition> {
        if templates::find(Path::new(session.base_path()), TEMPLATE)?.is_none() {
            return Ok(Precondition::Skip(format!(
                "Skipping cron configuration on {}",
                session.stage()
            )));
        }
        Ok(Precondition::Ready)
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        let template = templates::load(Path::new(session.base_path()), TEMPLATE)?;
        // cron ignores files with dots in their name
        let dest = join(
            &session.resolve_string("cron.config_path")?,
            &server_file_stem(session)?,
        );
        upload_rendered(session, &template, &dest, extras([]))?;
        progress(format!("Configuring cron on {}", session.stage()));

        // cron ignores a last line without a newline
        let dest_q = quote(&dest)?;
        session.sudo(&format!("printf '\\n' >> {}", dest_q))?;
        session.sudo(&format!("chown root:root {}", dest_q))?;
        session.sudo(&format!("chmod 644 {}", dest_q))?;
        Ok(())
    }
}
