// src/core/context_resolver.rs

use crate::{
    constants::{BASE_PATH_KEY, MAX_RECURSION_DEPTH, STAGE_KEY},
    core::{
        config_store::{ConfigError, ConfigResult},
        renderer,
    },
    models::{Scalar, Tree, Value},
};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

lazy_static! {
    /// Expression and statement blocks of a template. Comments never reference anything.
    static ref BLOCK_RE: Regex = Regex::new(r"(?s)\{\{(.*?)\}\}|\{%-?(.*?)-?%\}").unwrap();
    /// Quoted string literals inside a block.
    static ref LITERAL_RE: Regex = Regex::new(r#""[^"]*"|'[^']*'"#).unwrap();
    /// Dotted identifiers, with the pipe of a filter captured so filter names can be skipped.
    static ref REFERENCE_RE: Regex =
        Regex::new(r"(\|\s*)?\b([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)").unwrap();
}

/// Read-only view over one merged configuration tree with the `stage` and `base_path`
/// entries injected.
///
/// Every lookup renders lazily: a template leaf is rendered against the whole context each
/// time it is resolved. Templates may reference other template leaves; those are rendered
/// first, so a cross-reference always sees the final value of its target.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    tree: &'a Tree,
    stage: &'a str,
    base_path: &'a str,
}

/// Per-lookup rendering state: the chain of template paths being rendered and the leaves
/// already rendered during this lookup.
#[derive(Default)]
struct RenderState {
    stack: Vec<String>,
    rendered: HashMap<String, String>,
}

impl<'a> Resolver<'a> {
    pub fn new(tree: &'a Tree, stage: &'a str, base_path: &'a str) -> Self {
        Self {
            tree,
            stage,
            base_path,
        }
    }

    pub fn stage(&self) -> &'a str {
        self.stage
    }

    /// Resolves a dotted path to a fully rendered value.
    pub fn resolve(&self, path: &str) -> ConfigResult<Value> {
        self.resolve_opt(path)?
            .ok_or_else(|| ConfigError::Unresolved {
                path: path.to_string(),
            })
    }

    /// Like [`Resolver::resolve`], but returns `default` when the path does not resolve.
    pub fn resolve_or(&self, path: &str, default: Value) -> ConfigResult<Value> {
        Ok(self.resolve_opt(path)?.unwrap_or(default))
    }

    /// `Ok(None)` when the path does not resolve; rendering failures are still errors.
    pub fn resolve_opt(&self, path: &str) -> ConfigResult<Option<Value>> {
        match path {
            STAGE_KEY => return Ok(Some(Value::Plain(self.stage.to_string()))),
            BASE_PATH_KEY => return Ok(Some(Value::Plain(self.base_path.to_string()))),
            _ => {}
        }
        let Some(raw) = self.lookup(path) else {
            log::debug!("'{}' is not set", path);
            return Ok(None);
        };
        let mut state = RenderState::default();
        self.render_node(path, raw, &mut state).map(Some)
    }

    pub fn resolve_string(&self, path: &str) -> ConfigResult<String> {
        let value = self.resolve(path)?;
        value.to_text().ok_or_else(|| ConfigError::TypeMismatch {
            path: path.to_string(),
            expected: "string",
            found: value.kind(),
        })
    }

    pub fn resolve_string_or(&self, path: &str, default: &str) -> ConfigResult<String> {
        match self.resolve_opt(path)? {
            None => Ok(default.to_string()),
            Some(value) => value.to_text().ok_or_else(|| ConfigError::TypeMismatch {
                path: path.to_string(),
                expected: "string",
                found: value.kind(),
            }),
        }
    }

    /// Booleans, numbers and the usual YAML spellings of a flag (`yes`, `off`, ...).
    pub fn resolve_bool_or(&self, path: &str, default: bool) -> ConfigResult<bool> {
        let Some(value) = self.resolve_opt(path)? else {
            return Ok(default);
        };
        match &value {
            Value::Scalar(Scalar::Bool(b)) => Ok(*b),
            Value::Scalar(Scalar::Int(i)) => Ok(*i != 0),
            Value::Plain(s) | Value::Template(s) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => Ok(true),
                    "false" | "no" | "off" | "0" | "" => Ok(false),
                    _ => Err(ConfigError::TypeMismatch {
                        path: path.to_string(),
                        expected: "boolean",
                        found: value.kind(),
                    }),
                }
            }
            _ => Ok(value.is_truthy()),
        }
    }

    pub fn resolve_u64_or(&self, path: &str, default: u64) -> ConfigResult<u64> {
        let Some(value) = self.resolve_opt(path)? else {
            return Ok(default);
        };
        let mismatch = || ConfigError::TypeMismatch {
            path: path.to_string(),
            expected: "non-negative integer",
            found: value.kind(),
        };
        match &value {
            Value::Scalar(Scalar::Int(i)) => u64::try_from(*i).map_err(|_| mismatch()),
            Value::Plain(s) | Value::Template(s) => s.trim().parse().map_err(|_| mismatch()),
            _ => Err(mismatch()),
        }
    }

    /// A list of strings. A single string counts as a one-element list, an empty string as an
    /// empty one.
    pub fn resolve_list_or(&self, path: &str, default: Vec<String>) -> ConfigResult<Vec<String>> {
        let Some(value) = self.resolve_opt(path)? else {
            return Ok(default);
        };
        match &value {
            Value::Sequence(items) => items
                .iter()
                .filter(|item| !item.is_null())
                .map(|item| {
                    item.to_text().ok_or_else(|| ConfigError::TypeMismatch {
                        path: path.to_string(),
                        expected: "list of strings",
                        found: item.kind(),
                    })
                })
                .collect(),
            Value::Plain(s) | Value::Template(s) if s.trim().is_empty() => Ok(Vec::new()),
            other => other.to_text().map(|s| vec![s]).ok_or_else(|| {
                ConfigError::TypeMismatch {
                    path: path.to_string(),
                    expected: "list of strings",
                    found: other.kind(),
                }
            }),
        }
    }

    /// The whole context with every template rendered, as JSON, for file templates.
    pub fn materialize(&self) -> ConfigResult<JsonValue> {
        let mut state = RenderState::default();
        let mut rendered = Tree::new();
        for (key, value) in self.tree {
            rendered.insert(key.clone(), self.render_node(key, value, &mut state)?);
        }
        let mut json = serde_json::to_value(&rendered).map_err(|e| ConfigError::Render {
            what: "the configuration context".to_string(),
            message: e.to_string(),
        })?;
        self.inject_reserved(&mut json);
        Ok(json)
    }

    // --- INTERNALS ---

    /// Walks mappings by key and sequences by index. Null leaves count as absent.
    fn lookup(&self, path: &str) -> Option<&'a Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut node = self.tree.get(first)?;
        for segment in segments {
            node = match node {
                Value::Mapping(tree) => tree.get(segment)?,
                Value::Sequence(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        (!node.is_null()).then_some(node)
    }

    fn render_node(&self, path: &str, node: &Value, state: &mut RenderState) -> ConfigResult<Value> {
        match node {
            Value::Template(source) => self
                .render_template(path, source, state)
                .map(Value::Plain),
            Value::Mapping(tree) => {
                let mut rendered = Tree::new();
                for (key, child) in tree {
                    let child_path = format!("{}.{}", path, key);
                    rendered.insert(key.clone(), self.render_node(&child_path, child, state)?);
                }
                Ok(Value::Mapping(rendered))
            }
            Value::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.render_node(&format!("{}.{}", path, i), item, state))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            Value::Plain(_) | Value::Scalar(_) => Ok(node.clone()),
        }
    }

    fn render_template(
        &self,
        path: &str,
        source: &str,
        state: &mut RenderState,
    ) -> ConfigResult<String> {
        if let Some(done) = state.rendered.get(path) {
            return Ok(done.clone());
        }
        if state.stack.iter().any(|p| p == path) {
            let mut cycle = state.stack.clone();
            cycle.push(path.to_string());
            return Err(ConfigError::CircularReference {
                cycle: cycle.join(" -> "),
            });
        }
        if state.stack.len() as u32 >= MAX_RECURSION_DEPTH {
            return Err(ConfigError::MaxRecursionDepth {
                depth: MAX_RECURSION_DEPTH,
                path: path.to_string(),
            });
        }
        state.stack.push(path.to_string());

        // Render every template leaf this one refers to, then overlay the results onto the
        // raw context so the engine sees final values.
        let mut context = self.raw_context()?;
        for reference in referenced_paths(source) {
            let mut dependencies = Vec::new();
            self.collect_templates(&reference, &mut dependencies);
            for (dep_path, dep_source) in dependencies {
                let value = if dep_path == reference {
                    self.render_template(&dep_path, dep_source, state)?
                } else {
                    // A leaf under a partially matched or container reference may not be
                    // used at all: it is rendered when it can be and left raw otherwise.
                    if state.stack.contains(&dep_path) {
                        continue;
                    }
                    let depth = state.stack.len();
                    match self.render_template(&dep_path, dep_source, state) {
                        Ok(value) => value,
                        Err(e) => {
                            log::debug!("Leaving '{}' unrendered for '{}': {}", dep_path, path, e);
                            state.stack.truncate(depth);
                            continue;
                        }
                    }
                };
                let segments: Vec<&str> = dep_path.split('.').collect();
                renderer::set_json_path(&mut context, &segments, JsonValue::String(value));
            }
        }

        let rendered = renderer::render_value(source, &context, path)?;
        log::debug!("Rendered '{}' -> '{}'", path, rendered);

        state.stack.pop();
        state.rendered.insert(path.to_string(), rendered.clone());
        Ok(rendered)
    }

    /// Template leaves under the deepest existing node along `reference`. Only a leaf whose
    /// path equals `reference` is a certain dependency.
    fn collect_templates(&self, reference: &str, out: &mut Vec<(String, &'a str)>) {
        let mut node: Option<&'a Value> = None;
        let mut matched = Vec::new();
        for segment in reference.split('.') {
            let next = match node {
                None => self.tree.get(segment),
                Some(Value::Mapping(tree)) => tree.get(segment),
                Some(Value::Sequence(items)) => {
                    segment.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                Some(_) => None,
            };
            match next {
                Some(value) => {
                    node = Some(value);
                    matched.push(segment);
                }
                None => break,
            }
        }
        if let Some(node) = node {
            collect_template_leaves(&matched.join("."), node, out);
        }
    }

    /// The tree as JSON, templates unrendered, with the reserved entries injected.
    fn raw_context(&self) -> ConfigResult<JsonValue> {
        let mut json = serde_json::to_value(self.tree).map_err(|e| ConfigError::Render {
            what: "the configuration context".to_string(),
            message: e.to_string(),
        })?;
        self.inject_reserved(&mut json);
        Ok(json)
    }

    fn inject_reserved(&self, json: &mut JsonValue) {
        if let JsonValue::Object(map) = json {
            map.insert(STAGE_KEY.to_string(), JsonValue::String(self.stage.to_string()));
            map.insert(
                BASE_PATH_KEY.to_string(),
                JsonValue::String(self.base_path.to_string()),
            );
        }
    }
}

fn collect_template_leaves<'v>(path: &str, node: &'v Value, out: &mut Vec<(String, &'v str)>) {
    match node {
        Value::Template(source) => out.push((path.to_string(), source)),
        Value::Mapping(tree) => {
            for (key, child) in tree {
                collect_template_leaves(&format!("{}.{}", path, key), child, out);
            }
        }
        Value::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_template_leaves(&format!("{}.{}", path, i), item, out);
            }
        }
        Value::Plain(_) | Value::Scalar(_) => {}
    }
}

/// Dotted identifiers used inside the expression and statement blocks of `source`.
fn referenced_paths(source: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for block in BLOCK_RE.captures_iter(source) {
        let Some(body) = block.get(1).or_else(|| block.get(2)) else {
            continue;
        };
        let body = LITERAL_RE.replace_all(body.as_str(), " ");
        for reference in REFERENCE_RE.captures_iter(&body) {
            if reference.get(1).is_some() {
                continue;
            }
            let path = reference[2].to_string();
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_store::{merge, parse_tree};
    use pretty_assertions::assert_eq;

    fn tree(yaml: &str) -> Tree {
        parse_tree(yaml, "test").unwrap()
    }

    #[test]
    fn test_stage_is_reserved() {
        let t = tree("stage: overridden\nother: 1\n");
        let resolver = Resolver::new(&t, "prod", "/work");
        assert_eq!(resolver.resolve_string("stage").unwrap(), "prod");
        assert_eq!(resolver.resolve_string("base_path").unwrap(), "/work");
    }

    #[test]
    fn test_absent_path_without_default_is_a_configuration_error() {
        let t = tree("a:\n  b: 1\n");
        let resolver = Resolver::new(&t, "prod", "/work");
        let err = resolver.resolve("a.c").unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: a.c");
        assert!(matches!(resolver.resolve("a.b.c"), Err(ConfigError::Unresolved { .. })));
    }

    #[test]
    fn test_absent_path_with_default_returns_default() {
        let t = tree("a: 1\n");
        let resolver = Resolver::new(&t, "prod", "/work");
        assert_eq!(
            resolver.resolve_or("x.y", Value::from("fallback")).unwrap(),
            Value::from("fallback")
        );
        assert_eq!(resolver.resolve_string_or("x", "d").unwrap(), "d");
    }

    #[test]
    fn test_null_leaf_counts_as_unresolved() {
        let t = tree("ssl:\n  key: ~\n");
        let resolver = Resolver::new(&t, "prod", "/work");
        assert_eq!(resolver.resolve_opt("ssl.key").unwrap(), None);
        assert_eq!(resolver.resolve_string_or("ssl.key", "none").unwrap(), "none");
    }

    #[test]
    fn test_plain_strings_are_returned_verbatim() {
        let t = tree("cmd: 'echo $HOME } {'\n");
        let resolver = Resolver::new(&t, "prod", "/work");
        assert_eq!(resolver.resolve_string("cmd").unwrap(), "echo $HOME } {");
    }

    #[test]
    fn test_cross_reference_equals_manual_substitution() {
        let t = tree(
            "dploy:\n  project_name: shop\n  root: '/var/www/{{ dploy.project_name }}/{{ stage }}'\ngit:\n  dirs:\n    root: '{{ dploy.root }}/src'\n",
        );
        let resolver = Resolver::new(&t, "prod", "/work");
        let root = resolver.resolve_string("dploy.root").unwrap();
        assert_eq!(root, "/var/www/shop/prod");
        assert_eq!(
            resolver.resolve_string("git.dirs.root").unwrap(),
            format!("{}/src", root)
        );
    }

    #[test]
    fn test_templates_support_filters_and_conditionals() {
        let t = tree(
            "name: shop\nupper: '{{ name | upper }}'\nflag: true\nmode: '{% if flag %}on{% else %}off{% endif %}'\n",
        );
        let resolver = Resolver::new(&t, "dev", "/work");
        assert_eq!(resolver.resolve_string("upper").unwrap(), "SHOP");
        assert_eq!(resolver.resolve_string("mode").unwrap(), "on");
    }

    #[test]
    fn test_circular_reference_is_detected() {
        let t = tree("a: '{{ b }}'\nb: '{{ c }}'\nc: '{{ a }}'\n");
        let resolver = Resolver::new(&t, "dev", "/work");
        match resolver.resolve("a").unwrap_err() {
            ConfigError::CircularReference { cycle } => assert_eq!(cycle, "a -> b -> c -> a"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_optional_key_in_own_section_is_not_a_cycle() {
        let t = tree(
            "dploy:\n  project_name: shop\nnginx:\n  server_name: '{{ nginx.domain | default(value=dploy.project_name) }}'\n  alias: '{{ nginx.server_name }}'\n",
        );
        let resolver = Resolver::new(&t, "prod", "/work");
        assert_eq!(resolver.resolve_string("nginx.server_name").unwrap(), "shop");
        assert_eq!(resolver.resolve_string("nginx.alias").unwrap(), "shop");
        assert_eq!(resolver.materialize().unwrap()["nginx"]["server_name"], "shop");
    }

    #[test]
    fn test_whole_section_access_from_inside_the_section() {
        let t = tree(
            "dploy:\n  project_name: shop\n  root: '/srv/{{ dploy.project_name }}'\n  src: '{{ dploy[\"root\"] }}/src'\nlisting:\n  a: x\n  all: '{% for k, v in listing %}{{ k }};{% endfor %}'\n",
        );
        let resolver = Resolver::new(&t, "prod", "/work");
        assert_eq!(resolver.resolve_string("dploy.src").unwrap(), "/srv/shop/src");
        assert_eq!(resolver.resolve_string("listing.all").unwrap(), "a;all;");
    }

    #[test]
    fn test_sequences_are_indexed_and_rendered() {
        let t = tree("name: shop\nhosts:\n  - '{{ name }}1.example.com'\n  - db.example.com\n");
        let resolver = Resolver::new(&t, "prod", "/work");
        assert_eq!(resolver.resolve_string("hosts.0").unwrap(), "shop1.example.com");
        assert_eq!(
            resolver.resolve_list_or("hosts", vec![]).unwrap(),
            vec!["shop1.example.com", "db.example.com"]
        );
        assert_eq!(resolver.resolve_list_or("nope", vec!["x".into()]).unwrap(), vec!["x"]);
    }

    #[test]
    fn test_typed_helpers() {
        let t = tree("a: yes\nb: 'off'\nn: 3\nlist: solo\nempty: ''\nmap:\n  k: v\n");
        let resolver = Resolver::new(&t, "prod", "/work");
        assert!(resolver.resolve_bool_or("a", false).unwrap());
        assert!(!resolver.resolve_bool_or("b", true).unwrap());
        assert!(resolver.resolve_bool_or("missing", true).unwrap());
        assert_eq!(resolver.resolve_u64_or("n", 0).unwrap(), 3);
        assert_eq!(resolver.resolve_list_or("list", vec![]).unwrap(), vec!["solo"]);
        assert!(resolver.resolve_list_or("empty", vec!["x".into()]).unwrap().is_empty());
        assert!(matches!(
            resolver.resolve_string("map"),
            Err(ConfigError::TypeMismatch { expected: "string", .. })
        ));
    }

    #[test]
    fn test_alice_admins_scenario() {
        let defaults = tree("system:\n  user: www-data\n  group: www-data\n");
        let global = tree("system:\n  user: alice\n");
        let stage = tree("system:\n  group: admins\n");
        let merged = merge(merge(defaults, global), stage);
        let resolver = Resolver::new(&merged, "prod", "/work");
        assert_eq!(resolver.resolve_string("system.user").unwrap(), "alice");
        assert_eq!(resolver.resolve_string("system.group").unwrap(), "admins");
    }

    #[test]
    fn test_materialize_renders_everything() {
        let t = tree("name: shop\npath: '/srv/{{ name }}/{{ stage }}'\nlist: ['{{ name }}']\n");
        let resolver = Resolver::new(&t, "prod", "/work");
        let json = resolver.materialize().unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "shop",
                "path": "/srv/shop/prod",
                "list": ["shop"],
                "stage": "prod",
                "base_path": "/work",
            })
        );
    }

    #[test]
    fn test_referenced_paths_skip_filters_and_literals() {
        let refs = referenced_paths("{{ dploy.root ~ '/x.y' | upper }}{# c #}{% if b %}{% endif %}");
        assert!(refs.contains(&"dploy.root".to_string()));
        assert!(refs.contains(&"b".to_string()));
        assert!(!refs.contains(&"upper".to_string()));
        assert!(!refs.iter().any(|r| r == "x.y" || r == "c"));
    }
}
