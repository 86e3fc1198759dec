//! Built-in atomic task operations
//!
//! Each operation reads its options, resolving deferred references against
//! the run's [`ConfigTree`] at the moment it executes, and returns a short
//! summary of what it did.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{
    CleanOptions, ConcatOptions, CopyOptions, ExecOptions, OpConfig, ReplaceOptions,
    ScriptOptions, ShaderOptions,
};
use crate::error::{DistError, Result};
use crate::files::{self, write_file};
use crate::script::ScriptEngine;
use crate::shader;
use crate::template::{substitute, VariableSet};
use crate::tree::ConfigTree;

/// Everything an operation can see while it runs
pub struct TaskContext<'a> {
    pub name: &'a str,
    pub tree: &'a Arc<ConfigTree>,
    /// Shell for exec tasks with `shell = true`
    pub shell: Option<&'a str>,
}

impl TaskContext<'_> {
    pub fn base_dir(&self) -> &Path {
        self.tree.base_dir()
    }

    fn failed(&self, reason: impl Into<String>) -> DistError {
        DistError::TaskFailed {
            task: self.name.to_string(),
            reason: reason.into(),
            stderr: None,
        }
    }
}

/// An atomic operation supplied by library code
///
/// Returning `Err` fails the task and aborts the run.
pub trait TaskOperation: Send + Sync {
    fn run(&self, ctx: &TaskContext<'_>) -> Result<String>;
}

pub async fn run_builtin(
    op: &OpConfig,
    ctx: &TaskContext<'_>,
    scripts: &ScriptEngine,
) -> Result<String> {
    match op {
        OpConfig::Concat(o) => concat(o, ctx),
        OpConfig::Replace(o) => replace(o, ctx),
        OpConfig::Shader(o) => extract_shaders(o, ctx),
        OpConfig::Clean(o) => clean(o, ctx),
        OpConfig::Copy(o) => copy(o, ctx),
        OpConfig::Exec(o) => exec(o, ctx).await,
        OpConfig::Script(o) => script(o, ctx, scripts),
    }
}

fn relative<'p>(path: &'p Path, base: &Path) -> std::path::Display<'p> {
    path.strip_prefix(base).unwrap_or(path).display()
}

fn concat(options: &ConcatOptions, ctx: &TaskContext<'_>) -> Result<String> {
    let base = ctx.base_dir();
    let patterns = ctx.tree.resolve_list(&options.src)?;
    let sources = files::expand(&patterns, base, true)?;
    let dest = base.join(ctx.tree.resolve_string(&options.dest)?);

    let mut parts = Vec::with_capacity(sources.len());
    for src in &sources {
        parts.push(std::fs::read_to_string(src)?);
    }
    write_file(&dest, &parts.join(&options.separator))?;

    Ok(format!(
        "concatenated {} files into {}",
        sources.len(),
        relative(&dest, base)
    ))
}

fn replace(options: &ReplaceOptions, ctx: &TaskContext<'_>) -> Result<String> {
    let base = ctx.base_dir();

    let mut variables = VariableSet::with_prefix(options.prefix.clone());
    for (token, value) in &options.variables {
        variables.insert(token.clone(), ctx.tree.resolve_string(value)?);
    }
    let pipeline = options.pipeline()?;

    let mut written = 0;
    let mut unchanged = 0;

    for mapping in &options.files {
        for pair in mapping.pairs(ctx.tree, options.preserve_order)? {
            let src = match pair.src.as_slice() {
                [] => continue,
                [single] => single,
                _ => {
                    return Err(DistError::InvalidTask {
                        task: ctx.name.to_string(),
                        reason: format!(
                            "{} sources map to the single file {}; use `expand` or a directory destination",
                            pair.src.len(),
                            relative(&pair.dest, base)
                        ),
                    })
                }
            };

            let source = std::fs::read_to_string(src)?;
            let output = pipeline.apply(&substitute(&source, &variables)?);

            if output == source && !options.force {
                debug!(file = %src.display(), "no replacements, skipped");
                unchanged += 1;
                continue;
            }

            write_file(&pair.dest, &output)?;
            written += 1;
        }
    }

    Ok(format!("{} files written, {} unchanged", written, unchanged))
}

fn extract_shaders(options: &ShaderOptions, ctx: &TaskContext<'_>) -> Result<String> {
    let base = ctx.base_dir();
    let src = base.join(ctx.tree.resolve_string(&options.src)?);
    let dest = base.join(ctx.tree.resolve_string(&options.dest)?);

    let mut artifacts = shader::extract(&src, &dest, options.strip, &options.extensions)?;
    if artifacts.is_empty() {
        warn!(dir = %src.display(), "no shader fragments found");
    }
    if options.minify {
        shader::minify(&mut artifacts)?;
    }

    Ok(format!(
        "extracted {} shaders into {}",
        artifacts.len(),
        relative(&dest, base)
    ))
}

fn clean(options: &CleanOptions, ctx: &TaskContext<'_>) -> Result<String> {
    let base = ctx.base_dir();
    let mut removed = 0;

    for pattern in ctx.tree.resolve_list(&options.paths)? {
        for path in files::glob_paths(&pattern, base)? {
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else if path.exists() {
                std::fs::remove_file(&path)?;
            } else {
                continue;
            }
            debug!(path = %path.display(), "removed");
            removed += 1;
        }
    }

    Ok(format!("removed {} paths", removed))
}

fn copy(options: &CopyOptions, ctx: &TaskContext<'_>) -> Result<String> {
    let mut copied = 0;

    for mapping in &options.files {
        for pair in mapping.pairs(ctx.tree, true)? {
            let [src] = pair.src.as_slice() else {
                return Err(ctx.failed(format!(
                    "cannot copy {} files onto {}",
                    pair.src.len(),
                    pair.dest.display()
                )));
            };

            if let Some(parent) = pair.dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(src, &pair.dest)?;
            copied += 1;
        }
    }

    Ok(format!("copied {} files", copied))
}

fn expand_env(text: &str) -> Result<String> {
    shellexpand::full(text)
        .map(|s| s.into_owned())
        .map_err(|e| DistError::InvalidConfig {
            reason: format!("cannot expand '{}': {}", text, e),
        })
}

/// Quote `arg` so the shell sees it as a single word
fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        arg.to_string()
    } else if cfg!(windows) {
        format!("\"{}\"", arg.replace('"', "\"\""))
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

async fn exec(options: &ExecOptions, ctx: &TaskContext<'_>) -> Result<String> {
    let tree = ctx.tree;
    let command = expand_env(&tree.resolve_string(&options.command)?)?;
    let args: Vec<String> = tree
        .resolve_list(&options.args)?
        .iter()
        .map(|a| expand_env(a))
        .collect::<Result<_>>()?;

    let cwd: PathBuf = match &options.cwd {
        Some(dir) => ctx.base_dir().join(expand_env(&tree.resolve_string(dir)?)?),
        None => ctx.base_dir().to_path_buf(),
    };

    let mut cmd = if options.shell {
        // `command` is a shell line as written; each arg is one word
        let line = std::iter::once(command.clone())
            .chain(args.iter().map(|a| shell_quote(a)))
            .collect::<Vec<_>>()
            .join(" ");
        let (shell, flag) = match ctx.shell {
            Some(shell) => (shell, "-c"),
            None if cfg!(windows) => ("cmd", "/C"),
            None => ("sh", "-c"),
        };
        let mut c = Command::new(shell);
        c.arg(flag).arg(line);
        c
    } else {
        let program = which::which_in(&command, std::env::var_os("PATH"), &cwd).map_err(|_| {
            DistError::CommandNotFound {
                command: command.clone(),
            }
        })?;
        let mut c = Command::new(program);
        c.args(&args);
        c
    };

    for (key, value) in &options.env {
        cmd.env(key, expand_env(&tree.resolve_string(value)?)?);
    }
    cmd.current_dir(&cwd);

    info!(task = %ctx.name, command = %command, args = ?args, "exec");

    if options.foreground {
        let status = cmd
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        if !status.success() {
            return Err(ctx.failed(format!(
                "`{}` exited with code {}",
                command,
                status.code().unwrap_or(1)
            )));
        }
        return Ok(String::new());
    }

    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DistError::TaskFailed {
            task: ctx.name.to_string(),
            reason: format!(
                "`{}` exited with code {}",
                command,
                output.status.code().unwrap_or(1)
            ),
            stderr: Some(stderr.trim_end().to_string()).filter(|s| !s.is_empty()),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn script(options: &ScriptOptions, ctx: &TaskContext<'_>, engine: &ScriptEngine) -> Result<String> {
    let source = match (&options.script, &options.file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(file)) => std::fs::read_to_string(ctx.base_dir().join(file))?,
        (None, None) => return Err(ctx.failed("script task has no source")),
    };

    engine
        .execute(&source, ctx.name, Arc::clone(ctx.tree))
        .map_err(|source| DistError::ScriptFailed {
            task: ctx.name.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FileMapping;
    use crate::rewrite::BuiltinPipeline;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn context_tree(base: &Path) -> Arc<ConfigTree> {
        Arc::new(ConfigTree::new(
            json!({
                "pkg": { "name": "melonjs", "version": "10.2.1" },
                "sources": ["src/b.js", "src/a.js"],
                "path": { "main": "build/<%= pkg.name %>.js" }
            }),
            base,
        ))
    }

    fn ctx<'a>(tree: &'a Arc<ConfigTree>) -> TaskContext<'a> {
        TaskContext {
            name: "test",
            tree,
            shell: None,
        }
    }

    fn project() -> tempfile::TempDir {
        let temp = tempfile::tempdir().unwrap();
        write_file(&temp.path().join("src/a.js"), "var a = \"__VERSION__\";").unwrap();
        write_file(
            &temp.path().join("src/b.js"),
            "this._super(me.Object, \"init\", [x]);",
        )
        .unwrap();
        temp
    }

    #[test]
    fn test_concat_uses_manifest_order() {
        let temp = project();
        let tree = context_tree(temp.path());

        concat(
            &ConcatOptions {
                src: vec!["<%= sources %>".to_string()],
                dest: "<%= path.main %>".to_string(),
                separator: "\n".to_string(),
            },
            &ctx(&tree),
        )
        .unwrap();

        let out = std::fs::read_to_string(temp.path().join("build/melonjs.js")).unwrap();
        assert_eq!(
            out,
            "this._super(me.Object, \"init\", [x]);\nvar a = \"__VERSION__\";"
        );
    }

    #[test]
    fn test_replace_in_place_with_variables_and_pipeline() {
        let temp = project();
        let tree = context_tree(temp.path());
        write_file(
            &temp.path().join("build/melonjs.js"),
            "me.version = \"__VERSION__\";\nthis._super(me.Object, \"init\");\n__KEEP__",
        )
        .unwrap();

        let mut variables = BTreeMap::new();
        variables.insert("__VERSION__".to_string(), "<%= pkg.version %>".to_string());

        let summary = replace(
            &ReplaceOptions {
                variables,
                prefix: String::new(),
                pipelines: vec![BuiltinPipeline::SuperCall],
                patterns: vec![],
                preserve_order: false,
                force: true,
                files: vec![FileMapping {
                    src: vec!["<%= path.main %>".to_string()],
                    dest: "build/".to_string(),
                    expand: true,
                    flatten: true,
                }],
            },
            &ctx(&tree),
        )
        .unwrap();

        assert_eq!(summary, "1 files written, 0 unchanged");
        let out = std::fs::read_to_string(temp.path().join("build/melonjs.js")).unwrap();
        assert_eq!(
            out,
            "me.version = \"10.2.1\";\nme.Object.prototype.init.apply(this);\n__KEEP__"
        );
    }

    #[test]
    fn test_replace_without_force_skips_unchanged() {
        let temp = project();
        let tree = context_tree(temp.path());

        let summary = replace(
            &ReplaceOptions {
                variables: BTreeMap::new(),
                prefix: String::new(),
                pipelines: vec![],
                patterns: vec![],
                preserve_order: true,
                force: false,
                files: vec![FileMapping {
                    src: vec!["src/*.js".to_string()],
                    dest: "out/".to_string(),
                    expand: true,
                    flatten: false,
                }],
            },
            &ctx(&tree),
        )
        .unwrap();

        assert_eq!(summary, "0 files written, 2 unchanged");
        assert!(!temp.path().join("out").exists());
    }

    #[test]
    fn test_replace_rejects_many_to_one() {
        let temp = project();
        let tree = context_tree(temp.path());

        let err = replace(
            &ReplaceOptions {
                variables: BTreeMap::new(),
                prefix: String::new(),
                pipelines: vec![],
                patterns: vec![],
                preserve_order: true,
                force: true,
                files: vec![FileMapping {
                    src: vec!["src/*.js".to_string()],
                    dest: "out.js".to_string(),
                    expand: false,
                    flatten: false,
                }],
            },
            &ctx(&tree),
        )
        .unwrap_err();

        assert!(matches!(err, DistError::InvalidTask { .. }));
    }

    #[test]
    fn test_shader_extract_and_minify() {
        let temp = project();
        let tree = context_tree(temp.path());
        write_file(
            &temp.path().join("src/glsl/quad.frag"),
            "// quad\nvoid main(void) {\n    gl_FragColor = vec4(1.0);\n}\n",
        )
        .unwrap();

        let summary = extract_shaders(
            &ShaderOptions {
                src: "src/glsl".to_string(),
                dest: "build/glsl".to_string(),
                strip: true,
                minify: true,
                extensions: crate::shader::default_extensions(),
            },
            &ctx(&tree),
        )
        .unwrap();

        assert_eq!(summary, "extracted 1 shaders into build/glsl");
        assert_eq!(
            std::fs::read_to_string(temp.path().join("build/glsl/quad.glsl")).unwrap(),
            "void main(void){gl_FragColor=vec4(1.0);}"
        );
    }

    #[test]
    fn test_clean_removes_files_and_directories() {
        let temp = project();
        let tree = context_tree(temp.path());
        write_file(&temp.path().join("build/docs/index.html"), "").unwrap();
        write_file(&temp.path().join("build/melonjs.js"), "").unwrap();

        let summary = clean(
            &CleanOptions {
                paths: vec![
                    "build/docs".to_string(),
                    "<%= path.main %>".to_string(),
                    "build/missing.js".to_string(),
                ],
            },
            &ctx(&tree),
        )
        .unwrap();

        assert_eq!(summary, "removed 2 paths");
        assert!(!temp.path().join("build/docs").exists());
        assert!(!temp.path().join("build/melonjs.js").exists());
        assert!(temp.path().join("src/a.js").exists());
    }

    #[test]
    fn test_copy_keeps_relative_layout() {
        let temp = project();
        let tree = context_tree(temp.path());

        copy(
            &CopyOptions {
                files: vec![FileMapping {
                    src: vec!["src/*.js".to_string()],
                    dest: "dist/".to_string(),
                    expand: true,
                    flatten: false,
                }],
            },
            &ctx(&tree),
        )
        .unwrap();

        assert!(temp.path().join("dist/src/a.js").is_file());
        assert!(temp.path().join("dist/src/b.js").is_file());
    }

    #[tokio::test]
    async fn test_exec_failure_reports_task() {
        let temp = project();
        let tree = context_tree(temp.path());

        let err = exec(
            &ExecOptions {
                command: "exit 3".to_string(),
                args: vec![],
                shell: true,
                env: BTreeMap::new(),
                cwd: None,
                foreground: false,
            },
            &ctx(&tree),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DistError::TaskFailed { ref task, .. } if task == "test"));
    }

    #[tokio::test]
    async fn test_exec_missing_command() {
        let temp = project();
        let tree = context_tree(temp.path());

        let err = exec(
            &ExecOptions {
                command: "definitely-not-a-real-tool-4821".to_string(),
                args: vec![],
                shell: false,
                env: BTreeMap::new(),
                cwd: None,
                foreground: false,
            },
            &ctx(&tree),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DistError::CommandNotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_resolves_args() {
        let temp = project();
        let tree = context_tree(temp.path());

        let out = exec(
            &ExecOptions {
                command: "echo".to_string(),
                args: vec!["<%= path.main %>".to_string(), "<%= sources %>".to_string()],
                shell: false,
                env: BTreeMap::new(),
                cwd: None,
                foreground: false,
            },
            &ctx(&tree),
        )
        .await
        .unwrap();

        assert_eq!(out.trim(), "build/melonjs.js src/b.js src/a.js");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("build/melonjs.js"), "build/melonjs.js");
        if cfg!(unix) {
            assert_eq!(shell_quote("my docs/index.md"), "'my docs/index.md'");
            assert_eq!(shell_quote("it's"), "'it'\\''s'");
            assert_eq!(shell_quote(""), "''");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_args_keep_spaces() {
        let temp = project();
        let tree = Arc::new(ConfigTree::new(
            json!({ "docs": "build/my docs/index.md" }),
            temp.path(),
        ));

        let out = exec(
            &ExecOptions {
                command: "printf '%s\\n'".to_string(),
                args: vec!["<%= docs %>".to_string(), "two words".to_string()],
                shell: true,
                env: BTreeMap::new(),
                cwd: None,
                foreground: false,
            },
            &ctx(&tree),
        )
        .await
        .unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines, vec!["build/my docs/index.md", "two words"]);
    }
}
