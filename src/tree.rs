//! Configuration tree with deferred references
//!
//! Property values may contain `<%= path.to.prop %>` references that are
//! resolved against the same tree when read. A string made of exactly one
//! reference takes the referenced value as-is (lists stay lists); anything
//! else is spliced as text. `<%= read('file') %>` reads a file relative to the
//! project directory at the moment of resolution, which lets a later task see
//! artifacts written by an earlier one.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::{DistError, Result};

/// Longest reference chain followed before giving up
pub const MAX_RESOLUTION_DEPTH: usize = 16;

static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<%=\s*(.*?)\s*%>").expect("reference syntax is a valid regex"));

static PROPERTY_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_$][\w$-]*(?:\.[\w$-]+)*$").expect("property path is a valid regex")
});

static READ_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^read\(\s*(?:'([^']*)'|"([^"]*)")\s*\)$"#).expect("read() is a valid regex")
});

/// Immutable property tree shared by every task in a run
#[derive(Debug, Clone)]
pub struct ConfigTree {
    root: Value,
    base_dir: PathBuf,
}

impl ConfigTree {
    pub fn new(root: Value, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            root,
            base_dir: base_dir.into(),
        }
    }

    /// Build the tree from `[properties]` plus every `[imports]` JSON file
    pub fn from_config(config: &Config, base_dir: &Path) -> Result<Self> {
        let mut root: Map<String, Value> = config.properties.clone();

        for (name, file) in &config.imports {
            if root.contains_key(name) {
                return Err(DistError::InvalidConfig {
                    reason: format!("import '{}' collides with a property of the same name", name),
                });
            }

            let path = base_dir.join(file);
            let content = std::fs::read_to_string(&path)?;
            let value: Value =
                serde_json::from_str(&content).map_err(|source| DistError::ImportParse {
                    name: name.clone(),
                    path: path.clone(),
                    source,
                })?;

            debug!(import = %name, path = %path.display(), "loaded import");
            root.insert(name.clone(), value);
        }

        Ok(Self::new(Value::Object(root), base_dir))
    }

    /// Directory that relative paths are resolved against
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Look up a dotted path without resolving references
    pub fn raw(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.root, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Resolve a dotted path, expanding every reference inside the value
    pub fn get(&self, path: &str) -> Result<Value> {
        Resolver::new(self, true).lookup(path, path)
    }

    pub fn get_string(&self, path: &str) -> Result<String> {
        Ok(render_value(&self.get(path)?))
    }

    /// Resolve the references in an arbitrary string
    pub fn resolve_str(&self, text: &str) -> Result<Value> {
        Resolver::new(self, true).interpolate(text)
    }

    pub fn resolve_string(&self, text: &str) -> Result<String> {
        Ok(render_value(&self.resolve_str(text)?))
    }

    /// Resolve each item, flattening items that resolve to lists
    pub fn resolve_list(&self, items: &[String]) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            flatten_into(self.resolve_str(item)?, &mut out);
        }
        Ok(out)
    }

    /// Resolve without performing `read()` file reads
    ///
    /// Used before a run starts, when files produced by earlier tasks do not
    /// exist yet.
    pub fn check(&self, text: &str) -> Result<()> {
        Resolver::new(self, false).interpolate(text).map(|_| ())
    }
}

struct Resolver<'a> {
    tree: &'a ConfigTree,
    read_files: bool,
    stack: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(tree: &'a ConfigTree, read_files: bool) -> Self {
        Self {
            tree,
            read_files,
            stack: Vec::new(),
        }
    }

    fn interpolate(&mut self, text: &str) -> Result<Value> {
        if !text.contains("<%=") {
            return Ok(Value::String(text.to_string()));
        }

        if let Some(caps) = REFERENCE.captures(text) {
            let whole = caps.get(0).map(|m| m.start() == 0 && m.end() == text.len());
            if whole == Some(true) {
                return self.evaluate(&caps[1], text);
            }
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in REFERENCE.captures_iter(text) {
            let Some(span) = caps.get(0) else { continue };
            out.push_str(&text[last..span.start()]);
            let value = self.evaluate(&caps[1], text)?;
            out.push_str(&render_value(&value));
            last = span.end();
        }
        out.push_str(&text[last..]);

        Ok(Value::String(out))
    }

    fn evaluate(&mut self, expression: &str, text: &str) -> Result<Value> {
        if let Some(caps) = READ_CALL.captures(expression) {
            let file = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            return self.read(file);
        }

        if !PROPERTY_PATH.is_match(expression) {
            return Err(DistError::InvalidReference {
                expression: expression.to_string(),
            });
        }

        self.lookup(expression, text)
    }

    fn lookup(&mut self, path: &str, text: &str) -> Result<Value> {
        if self.stack.iter().any(|p| p == path) || self.stack.len() >= MAX_RESOLUTION_DEPTH {
            let mut chain = self.stack.clone();
            chain.push(path.to_string());
            return Err(DistError::CyclicReference {
                chain: chain.join(" -> "),
            });
        }

        let raw = self
            .tree
            .raw(path)
            .ok_or_else(|| DistError::UnresolvedReference {
                reference: path.to_string(),
                text: text.to_string(),
            })?
            .clone();

        self.stack.push(path.to_string());
        let resolved = self.resolve_value(&raw);
        self.stack.pop();

        resolved
    }

    fn resolve_value(&mut self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::String(s) => self.interpolate(s)?,
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.resolve_value(v))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.resolve_value(v)?);
                }
                Value::Object(out)
            }
            other => other.clone(),
        })
    }

    fn read(&self, file: &str) -> Result<Value> {
        if !self.read_files {
            return Ok(Value::String(String::new()));
        }

        let path = self.tree.base_dir.join(file);
        let content = std::fs::read_to_string(&path)
            .map_err(|source| DistError::ReferenceRead { path: path.clone(), source })?;
        debug!(path = %path.display(), bytes = content.len(), "read() reference");

        Ok(Value::String(content))
    }
}

/// Text form of a resolved value when spliced into a string
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render_value).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn flatten_into(value: Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        Value::Null => {}
        other => out.push(render_value(&other)),
    }
}
