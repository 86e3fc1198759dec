//! Task execution engine
//!
//! A run expands the requested task into its atomic sequence, checks every
//! deferred reference the sequence uses, then executes the steps one at a
//! time. The first failing step aborts the run and the remaining steps are
//! reported as skipped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::config::OpConfig;
use crate::error::{DistError, Result};
use crate::graph::{Operation, Task, TaskGraph, TaskNode};
use crate::ops::{self, TaskContext};
use crate::script::ScriptEngine;
use crate::tree::ConfigTree;

/// Executor configuration
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Print the sequence without running it
    pub dry_run: bool,
    /// Print task output
    pub verbose: bool,
    /// No spinner and no per-task lines
    pub quiet: bool,
    /// Shell for exec tasks with `shell = true`
    pub shell: Option<String>,
}

/// Lifecycle of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Where a run is, or where it stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Expanding,
    Running(usize),
    Completed,
    Aborted { task: String, index: usize },
}

/// Result of executing a single step
#[derive(Debug)]
pub struct TaskResult {
    pub name: String,
    pub state: TaskState,
    pub duration: Duration,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        self.state == TaskState::Succeeded
    }
}

/// Outcome of one requested task
#[derive(Debug)]
pub struct RunReport {
    pub task: String,
    pub state: RunState,
    /// Steps that ran, in order
    pub results: Vec<TaskResult>,
    /// Steps that never started
    pub skipped: Vec<String>,
    /// The error that aborted the run
    pub failure: Option<DistError>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn total_duration(&self) -> Duration {
        self.results.iter().map(|r| r.duration).sum()
    }
}

/// Task executor
pub struct Executor {
    tree: Arc<ConfigTree>,
    config: ExecutorConfig,
    script_engine: ScriptEngine,
}

impl Executor {
    pub fn new(tree: ConfigTree, config: ExecutorConfig) -> Self {
        Self {
            tree: Arc::new(tree),
            config,
            script_engine: ScriptEngine::new(),
        }
    }

    pub fn tree(&self) -> &ConfigTree {
        &self.tree
    }

    /// Run a task and fail with the error of the step that aborted it
    pub async fn execute(&self, graph: &TaskGraph, task_name: &str) -> Result<RunReport> {
        let mut report = self.run(graph, task_name).await?;
        match report.failure.take() {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }

    /// Run a task, reporting a failed step in the returned report
    ///
    /// Errors found before the first step starts (unknown tasks, unresolved
    /// references) are returned as `Err` and nothing runs.
    pub async fn run(&self, graph: &TaskGraph, task_name: &str) -> Result<RunReport> {
        let mut state = RunState::Expanding;
        debug!(task = %task_name, ?state, "run started");

        let sequence = graph.expand(task_name)?;
        self.preflight(&sequence)?;

        if self.config.dry_run {
            self.print_dry_run(task_name, &sequence);
            return Ok(RunReport {
                task: task_name.to_string(),
                state: RunState::Completed,
                results: Vec::new(),
                skipped: sequence.iter().map(|n| n.name.clone()).collect(),
                failure: None,
            });
        }

        let mut results = Vec::with_capacity(sequence.len());
        let mut failure = None;

        for (index, node) in sequence.iter().enumerate() {
            state = RunState::Running(index);
            debug!(task = %node.name, ?state, "step");

            let (result, error) = self.run_step(node).await;
            if !self.config.quiet {
                self.print_task_result(&result);
            }
            results.push(result);

            if let Some(error) = error {
                state = RunState::Aborted {
                    task: node.name.clone(),
                    index,
                };
                failure = Some(error);
                break;
            }
        }

        if !matches!(state, RunState::Aborted { .. }) {
            state = RunState::Completed;
        }

        let skipped: Vec<String> = sequence
            .iter()
            .skip(results.len())
            .map(|n| n.name.clone())
            .collect();

        let report = RunReport {
            task: task_name.to_string(),
            state,
            results,
            skipped,
            failure,
        };

        info!(
            task = %task_name,
            ran = report.results.len(),
            skipped = report.skipped.len(),
            success = report.success(),
            "run finished"
        );

        if !self.config.quiet {
            self.print_summary(&report);
        }

        Ok(report)
    }

    /// Resolve every reference the sequence will need, skipping file reads
    fn preflight(&self, sequence: &[&TaskNode]) -> Result<()> {
        for node in sequence {
            if let Task::Atomic(Operation::Builtin(op)) = &node.task {
                for text in op.references() {
                    self.tree.check(text)?;
                }
            }
        }
        Ok(())
    }

    async fn run_step(&self, node: &TaskNode) -> (TaskResult, Option<DistError>) {
        let start = Instant::now();
        let ctx = TaskContext {
            name: &node.name,
            tree: &self.tree,
            shell: self.config.shell.as_deref(),
        };

        debug!(task = %node.name, from = ?TaskState::Pending, to = ?TaskState::Running, "transition");
        info!(task = %node.name, "task started");
        let pb = self.spinner(node);

        let outcome = match &node.task {
            Task::Atomic(Operation::Builtin(op)) => {
                ops::run_builtin(op, &ctx, &self.script_engine).await
            }
            Task::Atomic(Operation::Custom(op)) => op.run(&ctx),
            Task::Composite(_) => Err(DistError::InvalidTask {
                task: node.name.clone(),
                reason: "composite task in an expanded sequence".to_string(),
            }),
        };

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let duration = start.elapsed();
        info!(task = %node.name, ?duration, ok = outcome.is_ok(), "task finished");

        match outcome {
            Ok(output) => (
                TaskResult {
                    name: node.name.clone(),
                    state: TaskState::Succeeded,
                    duration,
                    output: Some(output),
                    error: None,
                },
                None,
            ),
            Err(e) => (
                TaskResult {
                    name: node.name.clone(),
                    state: TaskState::Failed,
                    duration,
                    output: None,
                    error: Some(e.to_string()),
                },
                Some(e),
            ),
        }
    }

    fn spinner(&self, node: &TaskNode) -> Option<ProgressBar> {
        let foreground = matches!(
            &node.task,
            Task::Atomic(Operation::Builtin(OpConfig::Exec(o))) if o.foreground
        );
        if self.config.quiet || foreground {
            return None;
        }

        let pb = ProgressBar::new_spinner();
        if let Ok(s) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(s);
        }
        pb.set_message(format!("Running {}", node.name));
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }

    fn print_dry_run(&self, task_name: &str, sequence: &[&TaskNode]) {
        println!(
            "{} {}",
            style("Execution plan (dry run):").bold().cyan(),
            style(task_name).bold()
        );
        println!();

        for (i, node) in sequence.iter().enumerate() {
            let op = match &node.task {
                Task::Atomic(op) => op.describe(),
                Task::Composite(_) => "composite".to_string(),
            };
            println!(
                "{} {} {}",
                style(format!("{:>3}.", i + 1)).dim(),
                style(&node.name).bold(),
                style(format!("[{}]", op)).dim()
            );
            if let Some(desc) = &node.desc {
                println!("     {} {}", style("→").dim(), desc);
            }
        }
    }

    fn print_task_result(&self, result: &TaskResult) {
        let status = if result.success() {
            style("✓").green()
        } else {
            style("✗").red()
        };

        let duration = format!("{:.2}s", result.duration.as_secs_f64());

        println!(
            "{} {} {}",
            status,
            style(&result.name).bold(),
            style(duration).dim()
        );

        if self.config.verbose {
            if let Some(output) = result.output.as_deref().filter(|o| !o.trim().is_empty()) {
                for line in output.trim_end().lines() {
                    println!("    {}", style(line).dim());
                }
            }
        }

        if let Some(error) = &result.error {
            eprintln!("  {}", style(error).red());
        }
    }

    fn print_summary(&self, report: &RunReport) {
        println!();

        let total = report.total_duration();
        match &report.state {
            RunState::Aborted { task, .. } => {
                println!(
                    "{} {} aborted at {} after {:.2}s",
                    style("✗").red().bold(),
                    style(&report.task).bold(),
                    style(task).bold(),
                    total.as_secs_f64()
                );
                if !report.skipped.is_empty() {
                    println!(
                        "  {} {}",
                        style("skipped:").dim(),
                        report.skipped.join(", ")
                    );
                }
            }
            _ => println!(
                "{} {} tasks completed in {:.2}s",
                style("✓").green().bold(),
                report.results.len(),
                total.as_secs_f64()
            ),
        }
    }
}
