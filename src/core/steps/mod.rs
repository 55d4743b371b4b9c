// src/core/steps/mod.rs

//! # Provisioning Steps
//!
//! The fixed catalog of operations a deployment is made of. Every step is addressed by a
//! [`StepId`], can be run on its own from the command line, and implements [`Step`]: a
//! precondition deciding whether there is anything to do on the bound host, and the action.

pub mod cron;
pub mod django;
pub mod git;
pub mod letsencrypt;
pub mod nginx;
pub mod supervisor;
pub mod system;
pub mod uwsgi;
pub mod virtualenv;

use crate::{
    core::{config_store::ConfigError, session::Session, templates},
    models::Target,
    system::executor::ExecutionError,
};
use serde_json::{Map, Value as JsonValue};
use std::{fmt, path::Path};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(
        "The project does not have a settings template. It must provide at least one of these files:\n - {}",
        .candidates.join("\n - ")
    )]
    SettingsTemplateNotFound { candidates: Vec<String> },
    #[error("Could not write '{path}': {source}")]
    LocalIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{step} failed on {target}: {source}")]
    Failed {
        step: StepId,
        target: Target,
        source: Box<StepError>,
    },
}

pub type StepResult<T> = Result<T, StepError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepId {
    InstallPackages,
    CreateDirs,
    Checkout,
    VirtualenvSetup,
    InstallRequirements,
    DjangoSettings,
    DjangoMigrate,
    DjangoCollectstatic,
    CronSetup,
    UwsgiSetup,
    SupervisorSetup,
    NginxSetup,
    LetsencryptSetup,
    LetsencryptInstall,
    CheckServices,
}

impl StepId {
    pub const ALL: [StepId; 15] = [
        StepId::InstallPackages,
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
        StepId::LetsencryptSetup,
        StepId::LetsencryptInstall,
        StepId::CheckServices,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StepId::InstallPackages => "install-packages",
            StepId::CreateDirs => "create-dirs",
            StepId::Checkout => "checkout",
            StepId::VirtualenvSetup => "virtualenv-setup",
            StepId::InstallRequirements => "install-requirements",
            StepId::DjangoSettings => "django-settings",
            StepId::DjangoMigrate => "django-migrate",
            StepId::DjangoCollectstatic => "django-collectstatic",
            StepId::CronSetup => "cron-setup",
            StepId::UwsgiSetup => "uwsgi-setup",
            StepId::SupervisorSetup => "supervisor-setup",
            StepId::NginxSetup => "nginx-setup",
            StepId::LetsencryptSetup => "letsencrypt-setup",
            StepId::LetsencryptInstall => "letsencrypt-install",
            StepId::CheckServices => "check-services",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }

    pub fn about(self) -> &'static str {
        match self {
            StepId::InstallPackages => "Install system packages (system.packages)",
            StepId::CreateDirs => "Create every <section>.dirs.* directory and set ownership",
            StepId::Checkout => "Clone or update the git repository",
            StepId::VirtualenvSetup => "Create the virtualenv if it does not exist",
            StepId::InstallRequirements => "Install pip requirements",
            StepId::DjangoSettings => "Upload the stage's local_settings.py",
            StepId::DjangoMigrate => "Run django migrations (django >= 1.7)",
            StepId::DjangoCollectstatic => "Collect static files",
            StepId::CronSetup => "Install dploy/cron.template if present",
            StepId::UwsgiSetup => "Configure uWSGI",
            StepId::SupervisorSetup => "Configure supervisor to run uWSGI",
            StepId::NginxSetup => "Configure nginx (and TLS)",
            StepId::LetsencryptSetup => "Obtain a certificate with certbot and configure nginx",
            StepId::LetsencryptInstall => "Install certbot",
            StepId::CheckServices => "Report whether uwsgi, nginx and supervisor are running",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a precondition check on the bound host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    Ready,
    Skip(String),
}

/// Options shared by the whole catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepOptions {
    /// Upgrade requirements (`pip install -U`).
    pub upgrade: bool,
}

pub trait Step {
    fn id(&self) -> StepId;

    /// Hosts the step runs on; the stage hosts unless the step overrides them.
    fn targets(&self, session: &Session) -> StepResult<Vec<Target>> {
        Ok(session.targets())
    }

    fn precondition(&self, _session: &Session) -> StepResult<Precondition> {
        Ok(Precondition::Ready)
    }

    fn run(&self, session: &Session) -> StepResult<()>;
}

/// The step implementing `id`.
pub fn step(id: StepId, options: StepOptions) -> Box<dyn Step> {
    match id {
        StepId::InstallPackages => Box::new(system::InstallPackages),
        StepId::CreateDirs => Box::new(system::CreateDirs),
        StepId::Checkout => Box::new(git::Checkout),
        StepId::VirtualenvSetup => Box::new(virtualenv::VirtualenvSetup),
        StepId::InstallRequirements => Box::new(virtualenv::InstallRequirements {
            upgrade: options.upgrade,
        }),
        StepId::DjangoSettings => Box::new(django::DjangoSettings),
        StepId::DjangoMigrate => Box::new(django::DjangoMigrate),
        StepId::DjangoCollectstatic => Box::new(django::DjangoCollectstatic),
        StepId::CronSetup => Box::new(cron::CronSetup),
        StepId::UwsgiSetup => Box::new(uwsgi::UwsgiSetup),
        StepId::SupervisorSetup => Box::new(supervisor::SupervisorSetup),
        StepId::NginxSetup => Box::new(nginx::NginxSetup),
        StepId::LetsencryptSetup => Box::new(letsencrypt::LetsencryptSetup),
        StepId::LetsencryptInstall => Box::new(letsencrypt::LetsencryptInstall),
        StepId::CheckServices => Box::new(system::CheckServices),
    }
}

// --- HELPERS SHARED BY THE STEPS ---

/// Renders the named template (project override or packaged default) and uploads it.
pub(crate) fn upload_template(
    session: &Session,
    name: &str,
    dest: &str,
    extras: Map<String, JsonValue>,
) -> StepResult<()> {
    let template = templates::load(Path::new(session.base_path()), name)?;
    upload_rendered(session, &template, dest, extras)
}

pub(crate) fn upload_rendered(
    session: &Session,
    template: &templates::Template,
    dest: &str,
    extras: Map<String, JsonValue>,
) -> StepResult<()> {
    let contents = templates::render(session, template, extras)?;
    log::debug!("Uploading {} ({} bytes) to {}", template.name, contents.len(), dest);
    session.upload(&contents, dest)?;
    Ok(())
}

/// Builds the extras map handed to a template.
pub(crate) fn extras<const N: usize>(entries: [(&str, JsonValue); N]) -> Map<String, JsonValue> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// `nginx.server_name` with dots replaced, used to name cron and supervisor files.
pub(crate) fn server_file_stem(session: &Session) -> StepResult<String> {
    Ok(session.resolve_string("nginx.server_name")?.replace('.', "_"))
}

pub(crate) fn progress(message: String) {
    use colored::Colorize;
    log::info!("{}", message);
    println!("{}", message.cyan());
}
