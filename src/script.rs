//! Rhai scripting for custom tasks
//!
//! Scripts run with the project directory as their working directory and can
//! read the resolved property tree through `config("path")` and
//! `resolve("<%= ... %>")`. Anything passed to `print` becomes the task output.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use tracing::debug;

use crate::files;
use crate::tree::ConfigTree;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Script execution engine
#[derive(Debug, Clone, Default)]
pub struct ScriptEngine;

impl ScriptEngine {
    pub fn new() -> Self {
        Self
    }

    fn create_engine(tree: &Arc<ConfigTree>) -> Engine {
        let mut engine = Engine::new();

        engine.set_max_expr_depths(64, 64);
        engine.set_max_operations(1_000_000);
        engine.set_max_modules(10);
        engine.set_max_string_size(16 * 1024 * 1024);

        Self::register_tree(&mut engine, tree);
        Self::register_stdlib(&mut engine, tree.base_dir());

        engine
    }

    /// Run `script` as task `task`, returning everything it printed
    pub fn execute(
        &self,
        script: &str,
        task: &str,
        tree: Arc<ConfigTree>,
    ) -> ScriptResult<String> {
        let mut scope = Scope::new();
        scope.push("task", task.to_string());
        scope.push("cwd", tree.base_dir().to_string_lossy().to_string());

        let output = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&output);

        let mut engine = Self::create_engine(&tree);
        engine.on_print(move |s| {
            if let Ok(mut out) = sink.lock() {
                out.push_str(s);
                out.push('\n');
            }
        });
        engine.on_debug(|s, _, pos| debug!(position = %pos, "{}", s));

        engine.run_with_scope(&mut scope, script)?;

        let result = output.lock().map(|out| out.clone()).unwrap_or_default();
        Ok(result)
    }

    fn register_tree(engine: &mut Engine, tree: &Arc<ConfigTree>) {
        let t = Arc::clone(tree);
        engine.register_fn("config", move |path: &str| -> ScriptResult<Dynamic> {
            let value = t.get(path).map_err(|e| e.to_string())?;
            rhai::serde::to_dynamic(&value)
        });

        let t = Arc::clone(tree);
        engine.register_fn("resolve", move |text: &str| -> ScriptResult<String> {
            t.resolve_string(text).map_err(|e| e.to_string().into())
        });
    }

    fn register_stdlib(engine: &mut Engine, base: &Path) {
        let at = {
            let base = base.to_path_buf();
            move |path: &str| -> PathBuf { base.join(path) }
        };

        let resolve = at.clone();
        engine.register_fn("read_file", move |path: &str| -> ScriptResult<String> {
            std::fs::read_to_string(resolve(path))
                .map_err(|e| format!("Failed to read file '{}': {}", path, e).into())
        });

        let resolve = at.clone();
        engine.register_fn("write_file", move |path: &str, content: &str| -> ScriptResult<()> {
            files::write_file(&resolve(path), content)
                .map_err(|e| format!("Failed to write file '{}': {}", path, e).into())
        });

        let resolve = at.clone();
        engine.register_fn("file_exists", move |path: &str| -> bool { resolve(path).exists() });

        let resolve = at.clone();
        engine.register_fn("mkdir", move |path: &str| -> ScriptResult<()> {
            std::fs::create_dir_all(resolve(path))
                .map_err(|e| format!("Failed to create directory '{}': {}", path, e).into())
        });

        let root = base.to_path_buf();
        engine.register_fn("glob", move |pattern: &str| -> ScriptResult<rhai::Array> {
            let paths = files::glob_paths(pattern, &root).map_err(|e| e.to_string())?;
            Ok(paths
                .into_iter()
                .map(|p| Dynamic::from(p.strip_prefix(&root).unwrap_or(&p).to_string_lossy().to_string()))
                .collect())
        });

        let root = base.to_path_buf();
        engine.register_fn("exec", move |cmd: &str| -> ScriptResult<String> {
            let output = if cfg!(windows) {
                std::process::Command::new("cmd")
                    .args(["/C", cmd])
                    .current_dir(&root)
                    .output()
            } else {
                std::process::Command::new("sh")
                    .args(["-c", cmd])
                    .current_dir(&root)
                    .output()
            };

            match output {
                Ok(o) if o.status.success() => Ok(String::from_utf8_lossy(&o.stdout).to_string()),
                Ok(o) => {
                    let stderr = String::from_utf8_lossy(&o.stderr);
                    Err(format!("Command failed: {}", stderr.trim_end()).into())
                }
                Err(e) => Err(format!("Failed to execute command: {}", e).into()),
            }
        });

        engine.register_fn("get_env", |key: &str| -> String {
            std::env::var(key).unwrap_or_default()
        });

        engine.register_fn("parse_json", |s: &str| -> ScriptResult<Dynamic> {
            let value: serde_json::Value =
                serde_json::from_str(s).map_err(|e| format!("Failed to parse JSON: {}", e))?;
            rhai::serde::to_dynamic(&value)
        });

        engine.register_fn("to_json", |value: Dynamic| -> ScriptResult<String> {
            let json: serde_json::Value = rhai::serde::from_dynamic(&value)?;
            serde_json::to_string_pretty(&json)
                .map_err(|e| format!("Failed to serialize JSON: {}", e).into())
        });

        engine.register_fn("semver_bump", |version: &str, part: &str| -> ScriptResult<String> {
            let parts: Vec<u32> = version
                .split('.')
                .map(|s| s.parse().unwrap_or(0))
                .collect();

            let [major, minor, patch] = parts.as_slice() else {
                return Err(format!("Invalid semver format: {}", version).into());
            };

            match part {
                "major" => Ok(format!("{}.0.0", major + 1)),
                "minor" => Ok(format!("{}.{}.0", major, minor + 1)),
                "patch" => Ok(format!("{}.{}.{}", major, minor, patch + 1)),
                _ => Err(format!("Unknown version part: {}", part).into()),
            }
        });
    }
}

/// `*.rhai` files directly inside `dir`, sorted by name
///
/// A missing directory simply means there are no script tasks.
pub fn discover(dir: &Path) -> crate::error::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "rhai") {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(base: &Path) -> Arc<ConfigTree> {
        Arc::new(ConfigTree::new(
            json!({
                "pkg": { "name": "melonjs", "version": "10.2.1" },
                "path": { "main": "build/<%= pkg.name %>.js" }
            }),
            base,
        ))
    }

    #[test]
    fn test_basic_script() {
        let temp = tempfile::tempdir().unwrap();
        let result = ScriptEngine::new()
            .execute(r#"print("building " + task);"#, "dorelease", tree(temp.path()))
            .unwrap();
        assert_eq!(result.trim(), "building dorelease");
    }

    #[test]
    fn test_config_access_is_resolved() {
        let temp = tempfile::tempdir().unwrap();
        let result = ScriptEngine::new()
            .execute(
                r#"
                let pkg = config("pkg");
                print(pkg.version);
                print(config("path.main"));
                print(resolve("v<%= pkg.version %>"));
                "#,
                "t",
                tree(temp.path()),
            )
            .unwrap();
        assert_eq!(result, "10.2.1\nbuild/melonjs.js\nv10.2.1\n");
    }

    #[test]
    fn test_files_are_relative_to_project() {
        let temp = tempfile::tempdir().unwrap();
        ScriptEngine::new()
            .execute(
                r#"write_file("build/VERSION", semver_bump(config("pkg.version"), "minor"));"#,
                "t",
                tree(temp.path()),
            )
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(temp.path().join("build/VERSION")).unwrap(),
            "10.3.0"
        );
    }

    #[test]
    fn test_unresolved_config_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = ScriptEngine::new()
            .execute(r#"config("nope.missing");"#, "t", tree(temp.path()))
            .unwrap_err();
        assert!(err.to_string().contains("nope.missing"));
    }

    #[test]
    fn test_semver_bump_rejects_garbage() {
        let temp = tempfile::tempdir().unwrap();
        let result = ScriptEngine::new().execute(r#"semver_bump("1.2", "patch");"#, "t", tree(temp.path()));
        assert!(result.is_err());
    }

    #[test]
    fn test_discover_scripts() {
        let temp = tempfile::tempdir().unwrap();
        assert!(discover(&temp.path().join("tasks")).unwrap().is_empty());

        std::fs::create_dir_all(temp.path().join("tasks")).unwrap();
        std::fs::write(temp.path().join("tasks/dorelease.rhai"), "").unwrap();
        std::fs::write(temp.path().join("tasks/bump.rhai"), "").unwrap();
        std::fs::write(temp.path().join("tasks/README.md"), "").unwrap();

        let found: Vec<_> = discover(&temp.path().join("tasks"))
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(found, vec!["bump.rhai", "dorelease.rhai"]);
    }
}
