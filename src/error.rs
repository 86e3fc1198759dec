//! Error types for distrun
//!
//! Uses `miette` for pretty error reporting with help text. Every variant
//! belongs to one [`ErrorKind`], which decides whether the failure happened
//! before anything ran or while a task was executing.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for distrun operations
#[derive(Error, Diagnostic, Debug)]
pub enum DistError {
    #[error("Configuration file not found")]
    #[diagnostic(
        code(distrun::config::not_found),
        help("Create a distrun.toml in your project root, or specify one with --config")
    )]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Failed to parse configuration {}", path.display())]
    #[diagnostic(code(distrun::config::parse))]
    ConfigParse {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Failed to parse import '{name}' from {}", path.display())]
    #[diagnostic(code(distrun::config::import))]
    ImportParse {
        name: String,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {reason}")]
    #[diagnostic(code(distrun::config::invalid))]
    InvalidConfig { reason: String },

    #[error("Unresolved reference '{reference}' in \"{text}\"")]
    #[diagnostic(
        code(distrun::config::unresolved),
        help("Define the property under [properties] or add an [imports] entry")
    )]
    UnresolvedReference { reference: String, text: String },

    #[error("Invalid reference expression '{expression}'")]
    #[diagnostic(
        code(distrun::config::bad_reference),
        help("References are dotted paths like <%= pkg.name %> or read('path')")
    )]
    InvalidReference { expression: String },

    #[error("Cyclic reference: {chain}")]
    #[diagnostic(code(distrun::config::cyclic_reference))]
    CyclicReference { chain: String },

    #[error("Failed to read {} for a read() reference", path.display())]
    #[diagnostic(
        code(distrun::config::read),
        help("read() targets are usually produced by an earlier task in the sequence")
    )]
    ReferenceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task '{name}' not found")]
    #[diagnostic(
        code(distrun::task::not_found),
        help("Run `distrun list` to see available tasks")
    )]
    TaskNotFound { name: String, available: Vec<String> },

    #[error("Task '{name}' is registered twice")]
    #[diagnostic(code(distrun::task::duplicate))]
    DuplicateTask { name: String },

    #[error("Circular task reference detected: {cycle}")]
    #[diagnostic(
        code(distrun::task::cycle),
        help("Check the [aliases] entries in your configuration")
    )]
    CyclicDependency { cycle: String },

    #[error("Invalid task '{task}': {reason}")]
    #[diagnostic(code(distrun::config::invalid_task))]
    InvalidTask { task: String, reason: String },

    #[error("Shader fragments {} and {} both extract to {}", first.display(), second.display(), artifact.display())]
    #[diagnostic(
        code(distrun::shader::collision),
        help("Give fragments distinct file stems, e.g. quad-vertex.vert and quad-fragment.frag")
    )]
    ShaderCollision {
        artifact: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Invalid rewrite pattern '{pattern}'")]
    #[diagnostic(code(distrun::transform::pattern))]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid glob pattern '{pattern}'")]
    #[diagnostic(code(distrun::config::glob))]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Task '{task}' failed: {reason}")]
    #[diagnostic(code(distrun::exec::failed))]
    TaskFailed {
        task: String,
        reason: String,
        #[help]
        stderr: Option<String>,
    },

    #[error("Command not found: {command}")]
    #[diagnostic(
        code(distrun::exec::command_not_found),
        help("Ensure the command is installed and in your PATH")
    )]
    CommandNotFound { command: String },

    #[error("Script execution failed in task '{task}'")]
    #[diagnostic(code(distrun::script::failed))]
    ScriptFailed {
        task: String,
        #[source]
        source: Box<rhai::EvalAltResult>,
    },

    #[error("I/O error")]
    #[diagnostic(code(distrun::io))]
    Io(#[from] std::io::Error),
}

/// Broad classification of a [`DistError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected while loading or expanding; nothing has run yet
    Configuration,
    /// A rewrite rule that does not compile
    Transform,
    /// An atomic task reported failure
    TaskFailure,
    Io,
}

impl DistError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DistError::ConfigNotFound { .. }
            | DistError::ConfigParse { .. }
            | DistError::ImportParse { .. }
            | DistError::InvalidConfig { .. }
            | DistError::UnresolvedReference { .. }
            | DistError::InvalidReference { .. }
            | DistError::CyclicReference { .. }
            | DistError::TaskNotFound { .. }
            | DistError::DuplicateTask { .. }
            | DistError::CyclicDependency { .. }
            | DistError::InvalidTask { .. }
            | DistError::ShaderCollision { .. }
            | DistError::InvalidGlob { .. } => ErrorKind::Configuration,
            DistError::InvalidPattern { .. } => ErrorKind::Transform,
            DistError::TaskFailed { .. }
            | DistError::CommandNotFound { .. }
            | DistError::ScriptFailed { .. }
            | DistError::ReferenceRead { .. } => ErrorKind::TaskFailure,
            DistError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Result type alias for distrun operations
pub type Result<T> = std::result::Result<T, DistError>;
