// src/core/steps/nginx.rs

use super::{Step, StepId, StepResult, extras, letsencrypt::LetsencryptSetup, progress, upload_template};
use crate::{
    core::{config_store::ConfigError, session::Session},
    models::{Host, Target},
    system::transport::quote,
};
use serde_json::Value as JsonValue;

/// Writes the nginx site configuration (plain, with configured certificates, or through
/// certbot) and reloads nginx.
pub struct NginxSetup;

impl NginxSetup {
    /// Path of `ssl.<key>` when configured and present on the bound host.
    fn existing(session: &Session, key: &str) -> StepResult<Option<String>> {
        let Some(path) = session.resolve_opt(key)?.and_then(|v| v.to_text()) else {
            return Ok(None);
        };
        if path.is_empty() || !session.exists(&path)? {
            return Ok(None);
        }
        Ok(Some(path))
    }

    fn upload_site(session: &Session) -> StepResult<()> {
        let config_path = session.resolve_string("nginx.config_path")?;
        let configured = |key: &str| -> StepResult<bool> {
            Ok(session
                .resolve_opt(key)?
                .is_some_and(|v| v.is_truthy()))
        };

        if configured("ssl.key")? && configured("ssl.cert")? {
            let key = Self::existing(session, "ssl.key")?;
            let cert = Self::existing(session, "ssl.cert")?;
            let dhparam = Self::existing(session, "ssl.dhparam")?;
            upload_template(
                session,
                "nginx_ssl.template",
                &config_path,
                extras([
                    ("ssl_letsencrypt", JsonValue::from(false)),
                    ("ssl_key", key.map_or(JsonValue::Null, JsonValue::from)),
                    ("ssl_cert", cert.map_or(JsonValue::Null, JsonValue::from)),
                    ("ssl_with_dhparam", JsonValue::from(dhparam.is_some())),
                ]),
            )
        } else {
            upload_template(
                session,
                "nginx.template",
                &config_path,
                extras([
                    ("ssl_letsencrypt", JsonValue::from(false)),
                    ("ssl_key", JsonValue::Null),
                    ("ssl_cert", JsonValue::Null),
                    ("ssl_with_dhparam", JsonValue::from(false)),
                ]),
            )
        }
    }
}

impl Step for NginxSetup {
    fn id(&self) -> StepId {
        StepId::NginxSetup
    }

    /// `nginx.hosts` when configured, the stage hosts otherwise.
    fn targets(&self, session: &Session) -> StepResult<Vec<Target>> {
        let hosts = session
            .local_resolver()
            .resolve_list_or("nginx.hosts", Vec::new())?;
        if hosts.is_empty() {
            return Ok(session.targets());
        }
        hosts
            .iter()
            .map(|entry| {
                Host::parse(entry).map(Target::Remote).ok_or_else(|| {
                    ConfigError::InvalidHost {
                        stage: session.stage().to_string(),
                        host: entry.clone(),
                    }
                    .into()
                })
            })
            .collect()
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        progress(format!("Configuring nginx on {}", session.stage()));
        if session.resolve_bool_or("ssl.letsencrypt", false)? {
            LetsencryptSetup.run(session)?;
        } else {
            Self::upload_site(session)?;
        }

        let document_root = session.resolve_string("nginx.document_root")?;
        if session.exists(&document_root)? {
            let owner = format!(
                "{}:{}",
                session.resolve_string("system.user")?,
                session.resolve_string("system.group")?
            );
            session.sudo(&format!(
                "chown -R {} {}",
                quote(&owner)?,
                quote(&document_root)?
            ))?;
        }
        session.sudo("service nginx reload")?;
        Ok(())
    }
}
