// src/core/session.rs

//! # Session
//!
//! One invocation bound to one stage. The session owns the merged configuration, the hosts of
//! the stage, the host currently being worked on, the transport used to reach it and the
//! remote-context cache.
//!
//! The remote per-stage override is merged in lazily: the first configuration lookup made
//! while a remote host is bound fetches it (through the cache) and the merged tree is kept for
//! the rest of the run.

use crate::{
    constants::{DEFAULT_REMOTE_CONTEXT_ROOT, DEV_STAGE, LOCAL_HOSTS},
    core::{
        config_store::{
            ConfigError, ConfigResult, RemoteContextCache, builtin_defaults, load_manifest, merge,
            stage_tree,
        },
        context_resolver::Resolver,
    },
    models::{Host, Target, Tree, Value},
    system::{
        executor::ExecutionError,
        transport::{CommandOutput, RunOptions, Transport},
    },
};
use std::{
    cell::{OnceCell, Ref, RefCell},
    path::Path,
    rc::Rc,
};

#[derive(Debug)]
pub struct Session {
    stage: String,
    base_path: String,
    local_tree: Tree,
    merged: OnceCell<Tree>,
    hosts: Vec<Host>,
    target: RefCell<Target>,
    transport: Rc<dyn Transport>,
    cache: RefCell<RemoteContextCache>,
}

impl Session {
    /// Loads `<base_path>/dploy.yml` and selects `stage`.
    pub fn load(base_path: &Path, stage: &str, transport: Rc<dyn Transport>) -> ConfigResult<Self> {
        let manifest = load_manifest(base_path)?;
        let tree = stage_tree(builtin_defaults()?, &manifest, stage)?;
        Self::new(base_path, stage, tree, transport)
    }

    /// Builds a session over an already merged local tree.
    pub fn new(
        base_path: &Path,
        stage: &str,
        tree: Tree,
        transport: Rc<dyn Transport>,
    ) -> ConfigResult<Self> {
        let base_path = dunce::simplified(base_path).to_string_lossy().to_string();
        let hosts = select_hosts(stage, &Resolver::new(&tree, stage, &base_path))?;
        log::debug!(
            "Stage '{}' bound to {}",
            stage,
            if hosts.is_empty() {
                "the local machine".to_string()
            } else {
                hosts.iter().map(Host::to_string).collect::<Vec<_>>().join(", ")
            }
        );
        Ok(Self {
            stage: stage.to_string(),
            base_path,
            local_tree: tree,
            merged: OnceCell::new(),
            hosts,
            target: RefCell::new(Target::Local),
            transport,
            cache: RefCell::new(RemoteContextCache::new()),
        })
    }

    /// Replaces the remote-context cache, e.g. with one shared by several sessions.
    pub fn with_cache(self, cache: RemoteContextCache) -> Self {
        self.cache.replace(cache);
        self
    }

    pub fn cache(&self) -> Ref<'_, RemoteContextCache> {
        self.cache.borrow()
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// True when the stage runs on the invoking machine.
    pub fn is_local(&self) -> bool {
        self.hosts.is_empty()
    }

    /// The targets a step runs on by default: every stage host, or the local machine.
    pub fn targets(&self) -> Vec<Target> {
        if self.hosts.is_empty() {
            vec![Target::Local]
        } else {
            self.hosts.iter().cloned().map(Target::Remote).collect()
        }
    }

    /// Directs subsequent commands (and configuration lookups) at `target`.
    pub fn bind(&self, target: Target) {
        log::debug!("Binding {}", target);
        self.target.replace(target);
    }

    pub fn target(&self) -> Target {
        self.target.borrow().clone()
    }

    // --- CONFIGURATION ---

    /// A resolver over the effective context for the bound target.
    pub fn resolver(&self) -> ConfigResult<Resolver<'_>> {
        Ok(Resolver::new(self.context()?, &self.stage, &self.base_path))
    }

    /// A resolver over the local layers only; never touches the network.
    pub fn local_resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.local_tree, &self.stage, &self.base_path)
    }

    pub fn resolve(&self, path: &str) -> ConfigResult<Value> {
        self.resolver()?.resolve(path)
    }

    pub fn resolve_or(&self, path: &str, default: Value) -> ConfigResult<Value> {
        self.resolver()?.resolve_or(path, default)
    }

    pub fn resolve_opt(&self, path: &str) -> ConfigResult<Option<Value>> {
        self.resolver()?.resolve_opt(path)
    }

    pub fn resolve_string(&self, path: &str) -> ConfigResult<String> {
        self.resolver()?.resolve_string(path)
    }

    pub fn resolve_string_or(&self, path: &str, default: &str) -> ConfigResult<String> {
        self.resolver()?.resolve_string_or(path, default)
    }

    pub fn resolve_bool_or(&self, path: &str, default: bool) -> ConfigResult<bool> {
        self.resolver()?.resolve_bool_or(path, default)
    }

    pub fn resolve_u64_or(&self, path: &str, default: u64) -> ConfigResult<u64> {
        self.resolver()?.resolve_u64_or(path, default)
    }

    pub fn resolve_list_or(&self, path: &str, default: Vec<String>) -> ConfigResult<Vec<String>> {
        self.resolver()?.resolve_list_or(path, default)
    }

    /// The effective configuration tree (remote override included once fetched).
    pub fn tree(&self) -> ConfigResult<&Tree> {
        self.context()
    }

    /// `<git.dirs.root>/<repository name>`
    pub fn project_dir(&self) -> ConfigResult<String> {
        let root = self.resolve_string("git.dirs.root")?;
        let repository = self.resolve_string("git.repository")?;
        Ok(join(&root, git_dirname(&repository)))
    }

    /// `<virtualenv.dirs.root>/<virtualenv.name>`
    pub fn venv_path(&self) -> ConfigResult<String> {
        let root = self.resolve_string("virtualenv.dirs.root")?;
        let name = self.resolve_string("virtualenv.name")?;
        Ok(join(&root, &name))
    }

    /// `python3` / `pip3` for Python 3, `python2` / `pip` otherwise.
    pub fn python_binaries(&self) -> ConfigResult<(&'static str, &'static str)> {
        let version = self.resolve_string_or("python.version", "3")?;
        Ok(if version.trim().starts_with('3') {
            ("python3", "pip3")
        } else {
            ("python2", "pip")
        })
    }

    fn context(&self) -> ConfigResult<&Tree> {
        if let Some(tree) = self.merged.get() {
            return Ok(tree);
        }
        let target = self.target();
        if !target.is_remote() {
            return Ok(&self.local_tree);
        }

        let local = self.local_resolver();
        let project = local.resolve_string("dploy.project_name")?;
        let root = local.resolve_string_or("dploy.context_root", DEFAULT_REMOTE_CONTEXT_ROOT)?;
        let overlay = self
            .cache
            .borrow_mut()
            .get_or_fetch(&root, &project, &self.stage, |path| {
                if !self.transport.exists(&target, path, true)? {
                    return Ok(None);
                }
                self.transport.download(&target, path, true).map(Some)
            })?
            .clone();

        let merged = merge(self.local_tree.clone(), overlay);
        Ok(self.merged.get_or_init(|| merged))
    }

    // --- TRANSPORT ---

    pub fn execute(
        &self,
        command: &str,
        options: &RunOptions,
    ) -> Result<CommandOutput, ExecutionError> {
        self.transport.execute(&self.target(), command, options)
    }

    pub fn run_with(&self, command: &str, options: &RunOptions) -> Result<String, ExecutionError> {
        self.transport.run(&self.target(), command, options)
    }

    /// Runs as the connecting user.
    pub fn run(&self, command: &str) -> Result<String, ExecutionError> {
        self.transport
            .run(&self.target(), command, &RunOptions::default())
    }

    pub fn sudo(&self, command: &str) -> Result<String, ExecutionError> {
        self.transport
            .run(&self.target(), command, &RunOptions::sudo())
    }

    pub fn sudo_in(&self, dir: &str, command: &str) -> Result<String, ExecutionError> {
        self.transport
            .run(&self.target(), command, &RunOptions::sudo().in_dir(dir))
    }

    pub fn exists(&self, path: &str) -> Result<bool, ExecutionError> {
        self.transport.exists(&self.target(), path, true)
    }

    pub fn upload(&self, contents: &str, dest: &str) -> Result<(), ExecutionError> {
        self.transport
            .upload(&self.target(), contents, dest, &RunOptions::sudo())
    }

    pub fn download(&self, path: &str) -> Result<String, ExecutionError> {
        self.transport.download(&self.target(), path, true)
    }
}

/// Empty host list (or a lone localhost) on `dev` means the local machine; any other stage
/// must name its hosts.
fn select_hosts(stage: &str, resolver: &Resolver<'_>) -> ConfigResult<Vec<Host>> {
    let raw = resolver.resolve_list_or("hosts", Vec::new())?;
    let local_only = match raw.as_slice() {
        [] => true,
        [only] => LOCAL_HOSTS.contains(&only.trim()),
        _ => false,
    };
    if stage == DEV_STAGE && local_only {
        return Ok(Vec::new());
    }
    if raw.is_empty() {
        return Err(ConfigError::NoHosts {
            stage: stage.to_string(),
        });
    }
    raw.iter()
        .map(|entry| {
            Host::parse(entry).ok_or_else(|| ConfigError::InvalidHost {
                stage: stage.to_string(),
                host: entry.clone(),
            })
        })
        .collect()
}

/// `git@github.com:acme/shop.git` → `shop`
pub fn git_dirname(repository: &str) -> &str {
    let name = repository
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(repository);
    name.strip_suffix(".git").unwrap_or(name)
}

/// Joins remote (POSIX) paths.
pub fn join(base: &str, child: &str) -> String {
    if child.starts_with('/') || base.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), child)
    }
}

/// Stage names declared by the manifest under `base_path`.
pub fn available_stages(base_path: &Path) -> ConfigResult<Vec<String>> {
    Ok(load_manifest(base_path)?
        .stage_names()
        .into_iter()
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_store::parse_tree;
    use crate::system::fake::FakeTransport;
    use pretty_assertions::assert_eq;

    const OVERRIDE: &str = "/root/.context/shop/prod.yml";

    fn tree(yaml: &str) -> Tree {
        parse_tree(yaml, "test").unwrap()
    }

    fn prod_tree() -> Tree {
        tree(
            "hosts: [deploy@web1]\ndploy:\n  project_name: shop\n  context_root: /root/.context\nsystem:\n  user: www-data\n  group: www-data\n",
        )
    }

    fn session(tree: Tree, stage: &str, fake: &Rc<FakeTransport>) -> Session {
        Session::new(Path::new("/work"), stage, tree, fake.clone()).unwrap()
    }

    #[test]
    fn test_dev_with_localhost_runs_locally() {
        let fake = Rc::new(FakeTransport::new());
        let s = session(tree("hosts: [localhost]\n"), "dev", &fake);
        assert!(s.is_local());
        assert_eq!(s.targets(), vec![Target::Local]);

        let s = session(tree("{}"), "dev", &fake);
        assert!(s.is_local());
    }

    #[test]
    fn test_remote_stage_without_hosts_is_rejected() {
        let fake = Rc::new(FakeTransport::new());
        let err = Session::new(Path::new("/work"), "prod", tree("hosts: []\n"), fake.clone())
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoHosts { .. }));

        let err = Session::new(Path::new("/work"), "prod", tree("hosts: ['a:b']\n"), fake)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHost { .. }));
    }

    #[test]
    fn test_remote_override_is_merged_once_when_a_host_is_bound() {
        let fake = Rc::new(FakeTransport::new().with_file(OVERRIDE, "system:\n  group: admins\n"));
        let s = session(prod_tree(), "prod", &fake);

        // Nothing is fetched while no remote host is bound.
        assert_eq!(s.resolve_string("system.group").unwrap(), "www-data");
        assert_eq!(s.cache().fetches(), 0);

        s.bind(s.targets()[0].clone());
        assert_eq!(s.resolve_string("system.group").unwrap(), "admins");
        assert_eq!(s.resolve_string("system.user").unwrap(), "www-data");
        assert_eq!(s.resolve_string("stage").unwrap(), "prod");
        assert_eq!(s.cache().fetches(), 1);
        assert_eq!(fake.count_matching("cat "), 1);
    }

    #[test]
    fn test_missing_override_falls_back_to_defaults_or_errors() {
        let fake = Rc::new(FakeTransport::new());
        let s = session(prod_tree(), "prod", &fake);
        s.bind(s.targets()[0].clone());

        assert_eq!(s.resolve_string_or("database.password", "none").unwrap(), "none");
        assert_eq!(
            s.resolve("database.password").unwrap_err().to_string(),
            "Configuration error: database.password"
        );
        assert_eq!(s.cache().fetches(), 1);
    }

    #[test]
    fn test_injected_cache_is_reused() {
        let fake = Rc::new(FakeTransport::new().with_file(OVERRIDE, "secret: x\n"));
        let mut cache = RemoteContextCache::new();
        cache
            .get_or_fetch("/root/.context", "shop", "prod", |_| Ok(Some("secret: y\n".into())))
            .unwrap();

        let s = session(prod_tree(), "prod", &fake).with_cache(cache);
        s.bind(s.targets()[0].clone());
        assert_eq!(s.resolve_string("secret").unwrap(), "y");
        assert_eq!(s.cache().hits(), 1);
        assert_eq!(fake.count_matching("cat "), 0);
    }

    #[test]
    fn test_project_dir_and_venv_path() {
        let fake = Rc::new(FakeTransport::new());
        let s = session(
            tree(
                "git:\n  repository: 'git@github.com:acme/shop.git'\n  dirs:\n    root: /srv/src/\nvirtualenv:\n  name: venv\n  dirs:\n    root: /srv/env\npython:\n  version: 2.7\n",
            ),
            "dev",
            &fake,
        );
        assert_eq!(s.project_dir().unwrap(), "/srv/src/shop");
        assert_eq!(s.venv_path().unwrap(), "/srv/env/venv");
        assert_eq!(s.python_binaries().unwrap(), ("python2", "pip"));
    }

    #[test]
    fn test_git_dirname() {
        assert_eq!(git_dirname("https://github.com/acme/shop.git"), "shop");
        assert_eq!(git_dirname("git@github.com:shop.git"), "shop");
        assert_eq!(git_dirname("/srv/repos/shop/"), "shop");
    }

    #[test]
    fn test_commands_go_to_the_bound_target() {
        let fake = Rc::new(FakeTransport::new());
        let s = session(prod_tree(), "prod", &fake);
        let web1 = s.targets()[0].clone();
        s.bind(web1.clone());
        s.sudo_in("/srv", "ls").unwrap();
        let recorded = fake.commands.borrow();
        let last = recorded.last().unwrap();
        assert_eq!(last.target, web1);
        assert!(last.sudo);
        assert_eq!(last.cwd.as_deref(), Some("/srv"));
    }
}
