//! Configuration parsing for distrun.toml
//!
//! Handles loading and validating the pipeline configuration. String options
//! are kept unresolved here; deferred references are resolved against the
//! [`ConfigTree`](crate::tree::ConfigTree) when a task runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{DistError, Result};
use crate::files::FileMapping;
use crate::rewrite::{BuiltinPipeline, RewritePipeline, RewriteRule};

/// Default config file names to search for
pub const CONFIG_FILES: &[&str] = &["distrun.toml", "Distrun.toml"];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// JSON files loaded into the property tree (name -> path)
    #[serde(default)]
    pub imports: BTreeMap<String, String>,

    /// Static properties, may contain `<%= %>` references
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,

    /// Composite tasks
    #[serde(default)]
    pub aliases: BTreeMap<String, AliasConfig>,

    /// Atomic task definitions
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

/// Global settings for distrun behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Directory scanned for `*.rhai` task scripts
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: PathBuf,

    /// Task run when none is named on the command line
    #[serde(default = "default_task")]
    pub default_task: String,

    /// Shell used by exec tasks with `shell = true`
    #[serde(default)]
    pub shell: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tasks_dir: default_tasks_dir(),
            default_task: default_task(),
            shell: None,
        }
    }
}

fn default_tasks_dir() -> PathBuf {
    PathBuf::from("tasks")
}

fn default_task() -> String {
    "default".to_string()
}

fn default_separator() -> String {
    "\n".to_string()
}

fn default_extensions() -> Vec<String> {
    crate::shader::default_extensions()
}

/// A composite task: either a bare list or a table with a description
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AliasConfig {
    List(Vec<String>),
    Detailed {
        #[serde(default)]
        desc: Option<String>,
        tasks: Vec<String>,
    },
}

impl AliasConfig {
    pub fn tasks(&self) -> &[String] {
        match self {
            AliasConfig::List(tasks) => tasks,
            AliasConfig::Detailed { tasks, .. } => tasks,
        }
    }

    pub fn desc(&self) -> Option<&str> {
        match self {
            AliasConfig::List(_) => None,
            AliasConfig::Detailed { desc, .. } => desc.as_deref(),
        }
    }
}

/// Configuration for a single atomic task
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    /// Human-readable description
    #[serde(default)]
    pub desc: Option<String>,

    #[serde(flatten)]
    pub op: OpConfig,
}

/// Built-in operations, selected with `op = "..."`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum OpConfig {
    Concat(ConcatOptions),
    Replace(ReplaceOptions),
    Shader(ShaderOptions),
    Clean(CleanOptions),
    Copy(CopyOptions),
    Exec(ExecOptions),
    Script(ScriptOptions),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConcatOptions {
    /// Source files in concatenation order
    pub src: Vec<String>,
    pub dest: String,
    #[serde(default = "default_separator")]
    pub separator: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PatternConfig {
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplaceOptions {
    /// Literal token -> value
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Prefix prepended to every token
    #[serde(default)]
    pub prefix: String,

    /// Built-in pipelines, applied after variables
    #[serde(default)]
    pub pipelines: Vec<BuiltinPipeline>,

    /// Custom rules, applied after built-in pipelines
    #[serde(default)]
    pub patterns: Vec<PatternConfig>,

    /// Keep expanded files in declared order
    #[serde(default)]
    pub preserve_order: bool,

    /// Write files even when nothing changed
    #[serde(default)]
    pub force: bool,

    pub files: Vec<FileMapping>,
}

impl ReplaceOptions {
    /// Compile built-in pipelines and custom patterns into one pipeline
    pub fn pipeline(&self) -> Result<RewritePipeline> {
        let mut pipeline = RewritePipeline::new();
        for builtin in &self.pipelines {
            pipeline.extend(builtin.pipeline());
        }
        for p in &self.patterns {
            pipeline.push(RewriteRule::new(&p.pattern, p.replacement.clone())?);
        }
        Ok(pipeline)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShaderOptions {
    /// Directory containing shader fragments
    pub src: String,
    /// Directory receiving one artifact per fragment
    pub dest: String,
    #[serde(default)]
    pub strip: bool,
    /// Run shader-minify over the artifacts right after extraction
    #[serde(default)]
    pub minify: bool,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleanOptions {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CopyOptions {
    pub files: Vec<FileMapping>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecOptions {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Run `command` through the shell instead of directly
    #[serde(default)]
    pub shell: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Inherit stdio, for long-running commands such as a dev server
    #[serde(default)]
    pub foreground: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScriptOptions {
    /// Inline Rhai source
    #[serde(default)]
    pub script: Option<String>,
    /// Path to a Rhai file, relative to the project directory
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl OpConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            OpConfig::Concat(_) => "concat",
            OpConfig::Replace(_) => "replace",
            OpConfig::Shader(_) => "shader",
            OpConfig::Clean(_) => "clean",
            OpConfig::Copy(_) => "copy",
            OpConfig::Exec(_) => "exec",
            OpConfig::Script(_) => "script",
        }
    }

    /// Every option string that may carry deferred references
    pub fn references(&self) -> Vec<&str> {
        fn mappings(files: &[FileMapping]) -> impl Iterator<Item = &str> {
            files
                .iter()
                .flat_map(|f| f.src.iter().chain(std::iter::once(&f.dest)))
                .map(String::as_str)
        }

        match self {
            OpConfig::Concat(o) => o
                .src
                .iter()
                .chain(std::iter::once(&o.dest))
                .map(String::as_str)
                .collect(),
            OpConfig::Replace(o) => o
                .variables
                .values()
                .map(String::as_str)
                .chain(mappings(&o.files))
                .collect(),
            OpConfig::Shader(o) => vec![o.src.as_str(), o.dest.as_str()],
            OpConfig::Clean(o) => o.paths.iter().map(String::as_str).collect(),
            OpConfig::Copy(o) => mappings(&o.files).collect(),
            OpConfig::Exec(o) => std::iter::once(&o.command)
                .chain(o.args.iter())
                .chain(o.env.values())
                .chain(o.cwd.iter())
                .map(String::as_str)
                .collect(),
            OpConfig::Script(_) => Vec::new(),
        }
    }

    /// Static checks run when the task graph is built
    pub fn validate(&self, task: &str) -> Result<()> {
        let invalid = |reason: &str| DistError::InvalidTask {
            task: task.to_string(),
            reason: reason.to_string(),
        };

        match self {
            OpConfig::Concat(o) if o.src.is_empty() => Err(invalid("'src' must list at least one file")),
            OpConfig::Replace(o) => {
                if o.files.is_empty() {
                    return Err(invalid("'files' must contain at least one mapping"));
                }
                o.pipeline().map(|_| ())
            }
            OpConfig::Copy(o) if o.files.is_empty() => {
                Err(invalid("'files' must contain at least one mapping"))
            }
            OpConfig::Exec(o) if o.command.trim().is_empty() => Err(invalid("'command' is empty")),
            OpConfig::Script(o) => match (&o.script, &o.file) {
                (Some(_), Some(_)) => Err(invalid("cannot have both 'script' and 'file'")),
                (None, None) => Err(invalid("must have 'script' or 'file'")),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

impl Config {
    /// Load configuration from the specified path or search for it
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let config_path = match path {
            Some(p) => {
                if p.exists() {
                    p.to_path_buf()
                } else {
                    return Err(DistError::ConfigNotFound {
                        searched: vec![p.to_path_buf()],
                    });
                }
            }
            None => Self::find_config()?,
        };

        let content = std::fs::read_to_string(&config_path)?;
        let config = Self::parse(&content, &config_path)?;

        Ok((config, config_path))
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| DistError::ConfigParse {
            source: e,
            path: path.to_path_buf(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Search for config file starting from current directory
    fn find_config() -> Result<PathBuf> {
        let mut current = std::env::current_dir()?;
        let mut searched = Vec::new();

        loop {
            for name in CONFIG_FILES {
                let candidate = current.join(name);
                searched.push(candidate.clone());
                if candidate.exists() {
                    return Ok(candidate);
                }
            }

            if !current.pop() {
                break;
            }
        }

        Err(DistError::ConfigNotFound { searched })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        for (name, alias) in &self.aliases {
            if self.tasks.contains_key(name) {
                return Err(DistError::DuplicateTask { name: name.clone() });
            }

            if alias.tasks().is_empty() {
                return Err(DistError::InvalidTask {
                    task: name.clone(),
                    reason: "Alias must list at least one task".to_string(),
                });
            }
        }

        for (name, task) in &self.tasks {
            task.op.validate(name)?;
        }

        Ok(())
    }

    /// Project directory for a config file path
    pub fn base_dir(config_path: &Path) -> PathBuf {
        match config_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}
