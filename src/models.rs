// src/models.rs

//! Data model shared by the configuration engine and the provisioning steps.
//!
//! Configuration leaves are tagged once, when YAML is loaded: a string containing a Tera
//! marker (`{{`, `{%`, `{#`) becomes a [`Value::Template`], anything else a [`Value::Plain`].
//! The resolver relies on that tag instead of re-scanning strings at every lookup.

use indexmap::IndexMap;
use serde::{
    Serializer,
    ser::{SerializeMap, SerializeSeq},
};
use std::fmt;

/// An ordered mapping level of the configuration tree.
pub type Tree = IndexMap<String, Value>;

/// Non-string scalar leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
}

/// A node of the configuration tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Mapping(Tree),
    Sequence(Vec<Value>),
    /// A string without substitution markers. Returned verbatim by the resolver.
    Plain(String),
    /// A string holding substitution markers. Rendered against the context on lookup.
    Template(String),
    Scalar(Scalar),
}

/// Returns true when `s` contains a template marker.
pub fn has_template_markers(s: &str) -> bool {
    s.contains("{{") || s.contains("{%") || s.contains("{#")
}

impl Value {
    /// Builds a string leaf, tagging it as a template when it contains markers.
    pub fn string(s: impl Into<String>) -> Self {
        let s = s.into();
        if has_template_markers(&s) {
            Self::Template(s)
        } else {
            Self::Plain(s)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Scalar::Null))
    }

    pub fn is_template(&self) -> bool {
        matches!(self, Self::Template(_))
    }

    /// Raw text of a string leaf (plain or template).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Plain(s) | Self::Template(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Self::Mapping(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Text form of a leaf, used when a string is expected. Scalars are formatted,
    /// collections and null have no text form.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Plain(s) | Self::Template(s) => Some(s.clone()),
            Self::Scalar(Scalar::Bool(b)) => Some(b.to_string()),
            Self::Scalar(Scalar::Int(i)) => Some(i.to_string()),
            Self::Scalar(Scalar::Float(f)) => Some(f.to_string()),
            Self::Scalar(Scalar::Null) | Self::Mapping(_) | Self::Sequence(_) => None,
        }
    }

    /// Jinja-style truthiness: empty strings, zero, `false`, null and empty collections are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Plain(s) | Self::Template(s) => !s.is_empty(),
            Self::Scalar(Scalar::Null) => false,
            Self::Scalar(Scalar::Bool(b)) => *b,
            Self::Scalar(Scalar::Int(i)) => *i != 0,
            Self::Scalar(Scalar::Float(f)) => *f != 0.0,
            Self::Mapping(tree) => !tree.is_empty(),
            Self::Sequence(items) => !items.is_empty(),
        }
    }

    /// A short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mapping(_) => "mapping",
            Self::Sequence(_) => "sequence",
            Self::Plain(_) => "string",
            Self::Template(_) => "template",
            Self::Scalar(Scalar::Null) => "null",
            Self::Scalar(Scalar::Bool(_)) => "boolean",
            Self::Scalar(Scalar::Int(_)) => "integer",
            Self::Scalar(Scalar::Float(_)) => "float",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::string(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Scalar(Scalar::Bool(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Scalar(Scalar::Int(value))
    }
}

impl From<Tree> for Value {
    fn from(value: Tree) -> Self {
        Self::Mapping(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::Sequence(value.into_iter().map(Into::into).collect())
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(value: serde_yaml::Value) -> Self {
        use serde_yaml::Value as Yaml;
        match value {
            Yaml::Null => Self::Scalar(Scalar::Null),
            Yaml::Bool(b) => b.into(),
            Yaml::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Scalar(Scalar::Int(i))
                } else {
                    // u64 beyond i64 and floats both land here.
                    Self::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            Yaml::String(s) => s.into(),
            Yaml::Sequence(items) => items.into(),
            Yaml::Mapping(mapping) => Self::Mapping(tree_from_yaml(mapping)),
            Yaml::Tagged(tagged) => tagged.value.into(),
        }
    }
}

/// Converts a YAML mapping into a [`Tree`]. Non-string keys use their YAML text form.
pub fn tree_from_yaml(mapping: serde_yaml::Mapping) -> Tree {
    mapping
        .into_iter()
        .map(|(key, value)| (yaml_key_to_string(key), value.into()))
        .collect()
}

fn yaml_key_to_string(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Scalar(Scalar::Null) => serializer.serialize_unit(),
            Self::Scalar(Scalar::Bool(b)) => serializer.serialize_bool(*b),
            Self::Scalar(Scalar::Int(i)) => serializer.serialize_i64(*i),
            Self::Scalar(Scalar::Float(f)) => serializer.serialize_f64(*f),
            Self::Plain(s) | Self::Template(s) => serializer.serialize_str(s),
            Self::Sequence(items) => {
                let mut ser = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    ser.serialize_element(item)?;
                }
                ser.end()
            }
            Self::Mapping(tree) => {
                let mut ser = serializer.serialize_map(Some(tree.len()))?;
                for (key, value) in tree {
                    ser.serialize_entry(key, value)?;
                }
                ser.end()
            }
        }
    }
}

/// A remote host parsed from a `[user@]host[:port]` manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub user: Option<String>,
    pub hostname: String,
    pub port: Option<u16>,
}

impl Host {
    /// Parses a host string. Returns `None` for an empty host name or an invalid port.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (user, rest) = match raw.split_once('@') {
            Some((user, rest)) => (Some(user.to_string()), rest),
            None => (None, raw),
        };
        let (hostname, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (host, Some(port.parse::<u16>().ok()?)),
            None => (rest, None),
        };
        if hostname.is_empty() {
            return None;
        }
        Some(Self {
            user,
            hostname: hostname.to_string(),
            port,
        })
    }

    /// The `[user@]host` destination handed to ssh.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.hostname),
            None => self.hostname.clone(),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination())?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

/// Where a command runs: the local machine (`dev` without hosts) or a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Local,
    Remote(Host),
}

impl Target {
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote(host) => write!(f, "{}", host),
        }
    }
}
