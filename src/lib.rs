//! distrun - build pipelines for JavaScript library distributions
//!
//! This crate provides both a CLI tool and a library for running a
//! distribution pipeline: concatenating sources, templating version strings
//! and shader bodies into the bundle, rewriting legacy call syntax, and
//! extracting and minifying GLSL shaders.
//!
//! # Features
//!
//! - **TOML configuration** - tasks, aliases and properties in `distrun.toml`
//! - **Deferred references** - `<%= pkg.version %>` resolved when a task runs
//! - **Composite tasks** - expanded depth-first, aborted on the first failure
//! - **Rhai scripting** - custom tasks from the `tasks/` directory
//!
//! # Example
//!
//! ```toml
//! # distrun.toml
//!
//! [imports]
//! pkg = "package.json"
//!
//! [aliases]
//! build = ["concat:dist", "replace:dist"]
//!
//! [tasks."concat:dist"]
//! op = "concat"
//! src = ["src/a.js", "src/b.js"]
//! dest = "build/<%= pkg.name %>.js"
//!
//! [tasks."replace:dist"]
//! op = "replace"
//! pipelines = ["super-call"]
//! files = [{ src = ["build/<%= pkg.name %>.js"], dest = "build/", expand = true, flatten = true }]
//!
//! [tasks."replace:dist".variables]
//! __VERSION__ = "<%= pkg.version %>"
//! ```
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use distrun::{Config, ConfigTree, Executor, ExecutorConfig, TaskGraph};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (config, path) = Config::load(None)?;
//!     let base = Config::base_dir(&path);
//!     let tree = ConfigTree::from_config(&config, &base)?;
//!     let graph = TaskGraph::from_config(&config, &[])?;
//!
//!     let executor = Executor::new(tree, ExecutorConfig::default());
//!     executor.execute(&graph, "build").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod files;
pub mod graph;
pub mod ops;
pub mod rewrite;
pub mod script;
pub mod shader;
pub mod template;
pub mod tree;

// Re-export main types
pub use config::Config;
pub use error::{DistError, ErrorKind, Result};
pub use executor::{Executor, ExecutorConfig, RunReport, RunState, TaskResult};
pub use graph::{Operation, Task, TaskGraph, TaskNode};
pub use ops::{TaskContext, TaskOperation};
pub use rewrite::{RewritePipeline, RewriteRule};
pub use script::ScriptEngine;
pub use template::{substitute, VariableSet};
pub use tree::ConfigTree;
