// src/core/templates.rs

//! Configuration file templates.
//!
//! A template named `nginx.template` is looked up in `<base_path>/dploy/nginx.template` first,
//! then among the defaults packaged in the binary. Rendering sees the materialized context,
//! `stage`, `base_path`, `project_dir`, the caller's extras and a `ctx(path=, default=)`
//! function.

use crate::{
    constants::PROJECT_TEMPLATES_DIR,
    core::{
        config_store::{ConfigError, ConfigResult},
        renderer,
        session::Session,
    },
};
use serde_json::{Map, Value as JsonValue};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

const PACKAGED: &[(&str, &str)] = &[
    ("nginx.template", include_str!("../templates/nginx.template")),
    ("nginx_ssl.template", include_str!("../templates/nginx_ssl.template")),
    (
        "nginx_letsencrypt_init.template",
        include_str!("../templates/nginx_letsencrypt_init.template"),
    ),
    (
        "nginx_letsencrypt.template",
        include_str!("../templates/nginx_letsencrypt.template"),
    ),
    ("uwsgi.template", include_str!("../templates/uwsgi.template")),
    ("supervisor.template", include_str!("../templates/supervisor.template")),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateOrigin {
    Project(PathBuf),
    Packaged,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub origin: TemplateOrigin,
    pub source: String,
}

/// `Ok(None)` when neither the project nor the packaged defaults provide `name`.
pub fn find(base_path: &Path, name: &str) -> ConfigResult<Option<Template>> {
    let project_path = base_path.join(PROJECT_TEMPLATES_DIR).join(name);
    if project_path.is_file() {
        log::debug!("Using project template {}", project_path.display());
        return read(&project_path).map(Some);
    }
    Ok(PACKAGED
        .iter()
        .find(|(packaged, _)| *packaged == name)
        .map(|(_, source)| Template {
            name: name.to_string(),
            origin: TemplateOrigin::Packaged,
            source: source.to_string(),
        }))
}

/// Like [`find`], but a missing template is an error naming both places searched.
pub fn load(base_path: &Path, name: &str) -> ConfigResult<Template> {
    find(base_path, name)?.ok_or_else(|| ConfigError::TemplateNotFound {
        name: name.to_string(),
        searched: format!(
            "{}, packaged defaults",
            base_path.join(PROJECT_TEMPLATES_DIR).join(name).display()
        ),
    })
}

/// Reads an arbitrary local file as a template.
pub fn read(path: &Path) -> ConfigResult<Template> {
    let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Template {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        origin: TemplateOrigin::Project(path.to_path_buf()),
        source,
    })
}

/// Renders `template` for the session's bound target.
pub fn render(
    session: &Session,
    template: &Template,
    extras: Map<String, JsonValue>,
) -> ConfigResult<String> {
    let resolver = session.resolver()?;
    let snapshot = resolver.materialize()?;

    let mut context = snapshot.clone();
    if let JsonValue::Object(map) = &mut context {
        if resolver.resolve_opt("git.repository")?.is_some() {
            map.insert(
                "project_dir".to_string(),
                JsonValue::String(session.project_dir()?),
            );
        }
        map.extend(extras);
    }
    renderer::render_file(&template.name, &template.source, &context, Arc::new(snapshot))
}
