//! # Config Store
//!
//! Loads the configuration layers of a deployment and merges them, lowest precedence first:
//!
//! 1. the built-in defaults compiled into the binary (`src/defaults.yml`),
//! 2. the `global` section of the project manifest (`dploy.yml`),
//! 3. the `stages.<stage>` section of the manifest,
//! 4. the remote per-stage override stored on the target host, fetched once per
//!    `(project, stage)` through a [`RemoteContextCache`].
use crate::{
    constants::MANIFEST_FILENAME,
    models::{Scalar, Tree, Value, tree_from_yaml},
    system::executor::ExecutionError,
};
use colored::Colorize;
use indexmap::IndexMap;
use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use thiserror::Error;

const BUILTIN_DEFAULTS: &str = include_str!("../defaults.yml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("The file dploy.yml was not found in the current directory ({path}).")]
    ManifestNotFound { path: PathBuf },
    #[error("Could not read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Error parsing YAML in '{origin}': {source}")]
    YamlParse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("'{origin}' must contain a mapping at its top level.")]
    NotAMapping { origin: String },
    #[error("Stage '{stage}' is not defined in dploy.yml. Available stages: {available}")]
    UnknownStage { stage: String, available: String },
    #[error("Stage '{stage}' does not define any host.")]
    NoHosts { stage: String },
    #[error("Invalid host '{host}' in stage '{stage}'.")]
    InvalidHost { stage: String, host: String },
    #[error("Configuration error: {path}")]
    Unresolved { path: String },
    #[error("Configuration error: {path} is a {found}, expected {expected}.")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Circular reference detected while rendering: {cycle}")]
    CircularReference { cycle: String },
    #[error("Maximum recursion depth ({depth}) exceeded while rendering '{path}'.")]
    MaxRecursionDepth { depth: u32, path: String },
    #[error("Could not render {what}: {message}")]
    Render { what: String, message: String },
    #[error("Template '{name}' not found. Searched: {searched}")]
    TemplateNotFound { name: String, searched: String },
    #[error("Could not fetch remote context '{path}': {source}")]
    RemoteFetch {
        path: String,
        #[source]
        source: ExecutionError,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// --- MERGE ---

/// Deep-merges `overlay` into `base`.
///
/// Mappings merge recursively, sequences concatenate (`base ++ overlay`), anything else is
/// replaced by the overlay. Keys only present in `base` are never removed and keep their
/// position; keys new in `overlay` are appended in overlay order.
pub fn merge(mut base: Tree, overlay: Tree) -> Tree {
    for (key, incoming) in overlay {
        match base.get_mut(&key) {
            Some(existing) => {
                let current = std::mem::replace(existing, Value::Scalar(Scalar::Null));
                *existing = merge_values(current, incoming);
            }
            None => {
                base.insert(key, incoming);
            }
        }
    }
    base
}

fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(existing), Value::Mapping(incoming)) => {
            Value::Mapping(merge(existing, incoming))
        }
        (Value::Sequence(mut existing), Value::Sequence(incoming)) => {
            existing.extend(incoming);
            Value::Sequence(existing)
        }
        (_, incoming) => incoming,
    }
}

// --- LOADING ---

/// Parses YAML text into a [`Tree`]. An empty document is an empty tree.
pub fn parse_tree(text: &str, origin: &str) -> ConfigResult<Tree> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|source| ConfigError::YamlParse {
            origin: origin.to_string(),
            source,
        })?;
    match yaml {
        serde_yaml::Value::Null => Ok(Tree::new()),
        serde_yaml::Value::Mapping(mapping) => Ok(tree_from_yaml(mapping)),
        _ => Err(ConfigError::NotAMapping {
            origin: origin.to_string(),
        }),
    }
}

/// Loads a local YAML file. `Ok(None)` when the file does not exist.
pub fn load_local(path: &Path) -> ConfigResult<Option<Tree>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    parse_tree(&text, &path.display().to_string()).map(Some)
}

/// The lowest-precedence layer, compiled into the binary.
pub fn builtin_defaults() -> ConfigResult<Tree> {
    parse_tree(BUILTIN_DEFAULTS, "built-in defaults")
}

/// The project manifest: shared settings plus per-stage overrides.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub global: Tree,
    pub stages: IndexMap<String, Tree>,
}

impl Manifest {
    /// Splits a parsed manifest into its `global` and `stages` sections.
    pub fn from_tree(mut tree: Tree, origin: &str) -> ConfigResult<Self> {
        let global = match tree.shift_remove("global") {
            None | Some(Value::Scalar(Scalar::Null)) => Tree::new(),
            Some(Value::Mapping(global)) => global,
            Some(_) => {
                return Err(ConfigError::NotAMapping {
                    origin: format!("{}: global", origin),
                });
            }
        };

        let mut stages = IndexMap::new();
        match tree.shift_remove("stages") {
            None | Some(Value::Scalar(Scalar::Null)) => {}
            Some(Value::Mapping(entries)) => {
                for (name, section) in entries {
                    let section = match section {
                        Value::Mapping(section) => section,
                        Value::Scalar(Scalar::Null) => Tree::new(),
                        _ => {
                            return Err(ConfigError::NotAMapping {
                                origin: format!("{}: stages.{}", origin, name),
                            });
                        }
                    };
                    stages.insert(name, section);
                }
            }
            Some(_) => {
                return Err(ConfigError::NotAMapping {
                    origin: format!("{}: stages", origin),
                });
            }
        }

        if !tree.is_empty() {
            log::debug!(
                "Ignoring unknown top-level manifest keys: {:?}",
                tree.keys().collect::<Vec<_>>()
            );
        }
        Ok(Self { global, stages })
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.keys().map(String::as_str).collect()
    }
}

/// Loads `<base_path>/dploy.yml`. The manifest is mandatory.
pub fn load_manifest(base_path: &Path) -> ConfigResult<Manifest> {
    let path = base_path.join(MANIFEST_FILENAME);
    let tree = load_local(&path)?.ok_or_else(|| ConfigError::ManifestNotFound {
        path: base_path.to_path_buf(),
    })?;
    Manifest::from_tree(tree, &path.display().to_string())
}

/// Merges defaults, the manifest's `global` section and the selected stage section.
pub fn stage_tree(defaults: Tree, manifest: &Manifest, stage: &str) -> ConfigResult<Tree> {
    let stage_section =
        manifest
            .stages
            .get(stage)
            .ok_or_else(|| ConfigError::UnknownStage {
                stage: stage.to_string(),
                available: manifest.stage_names().join(", "),
            })?;
    let tree = merge(defaults, manifest.global.clone());
    Ok(merge(tree, stage_section.clone()))
}

// --- REMOTE CONTEXT ---

/// `{root}/{project}/{stage}.yml`
pub fn remote_override_path(root: &str, project: &str, stage: &str) -> String {
    format!("{}/{}/{}.yml", root.trim_end_matches('/'), project, stage)
}

/// Remote per-stage overrides already fetched during this run, keyed by `(project, stage)`.
///
/// Owned by the session; an entry is fetched at most once and never invalidated.
#[derive(Debug, Default)]
pub struct RemoteContextCache {
    entries: HashMap<(String, String), Tree>,
    fetches: usize,
    hits: usize,
}

impl RemoteContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached override for `(project, stage)`, fetching it on first access.
    ///
    /// `fetch` receives the remote path and returns the file contents, or `None` when the
    /// file does not exist (reported as a warning, cached as an empty tree).
    pub fn get_or_fetch<F>(
        &mut self,
        root: &str,
        project: &str,
        stage: &str,
        fetch: F,
    ) -> ConfigResult<&Tree>
    where
        F: FnOnce(&str) -> Result<Option<String>, ExecutionError>,
    {
        let key = (project.to_string(), stage.to_string());
        if self.entries.contains_key(&key) {
            self.hits += 1;
            log::debug!("Remote context cache hit for {}/{}", project, stage);
        } else {
            let path = remote_override_path(root, project, stage);
            log::debug!("Remote context cache miss, fetching '{}'", path);
            self.fetches += 1;
            let tree = match fetch(&path).map_err(|source| ConfigError::RemoteFetch {
                path: path.clone(),
                source,
            })? {
                Some(text) => parse_tree(&text, &path)?,
                None => {
                    log::warn!("Remote context file not found: {}", path);
                    eprintln!(
                        "{}",
                        format!("Warning context file not found: {}", path).yellow()
                    );
                    Tree::new()
                }
            };
            self.entries.insert(key.clone(), tree);
        }
        self.entries
            .get(&key)
            .ok_or_else(|| ConfigError::Unresolved {
                path: remote_override_path(root, project, stage),
            })
    }

    /// Number of remote round-trips performed.
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    /// Number of lookups served from the cache.
    pub fn hits(&self) -> usize {
        self.hits
    }
}
