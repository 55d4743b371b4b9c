// src/core/steps/letsencrypt.rs

use super::{Step, StepId, StepResult, extras, progress, system, upload_template};
use crate::{
    constants::{LETSENCRYPT_DHPARAMS, LETSENCRYPT_LIVE_DIR},
    core::session::Session,
    system::transport::quote,
};
use serde_json::json;

/// Adds the certbot PPA and installs its nginx plugin.
pub struct LetsencryptInstall;

impl Step for LetsencryptInstall {
    fn id(&self) -> StepId {
        StepId::LetsencryptInstall
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        progress(format!("Installing certbot on {}", session.target()));
        system::ensure_installed(session, "software-properties-common")?;
        session.sudo("add-apt-repository -y ppa:certbot/certbot")?;
        session.sudo("apt-get update")?;
        system::apt_install(session, "python-certbot-nginx")?;
        Ok(())
    }
}

/// Obtains a certificate for `nginx.server_name` on first run, then writes the TLS site.
pub struct LetsencryptSetup;

impl Step for LetsencryptSetup {
    fn id(&self) -> StepId {
        StepId::LetsencryptSetup
    }

    fn run(&self, session: &Session) -> StepResult<()> {
        let server_name = session.resolve_string("nginx.server_name")?;
        let config_path = session.resolve_string("nginx.config_path")?;
        let live = format!("{}/{}", LETSENCRYPT_LIVE_DIR, server_name);
        let key = format!("{}/privkey.pem", live);
        let cert = format!("{}/fullchain.pem", live);

        if !system::is_installed(session, "certbot")? {
            LetsencryptInstall.run(session)?;
        }

        if !session.exists(&cert)? {
            progress(format!("Requesting a certificate for {}", server_name));
            upload_template(session, "nginx_letsencrypt_init.template", &config_path, extras([]))?;
            session.sudo(&format!(
                "certbot --authenticator webroot --webroot-path {} --installer nginx -d {}",
                quote(&session.resolve_string("nginx.document_root")?)?,
                quote(&server_name)?
            ))?;
        }

        upload_template(
            session,
            "nginx_letsencrypt.template",
            &config_path,
            extras([(
                "ssl",
                json!({
                    "letsencrypt": true,
                    "dhparams": LETSENCRYPT_DHPARAMS,
                    "key": key,
                    "cert": cert,
                }),
            )]),
        )?;
        Ok(())
    }
}
