//! Task registry and composite expansion
//!
//! Tasks are either atomic (an operation) or composite (an ordered list of
//! other task names). The registry keeps a petgraph `DiGraph` with an edge
//! from every composite to each of its members, which is how cycles are
//! rejected at registration time. Running a task means expanding it
//! depth-first into the flat sequence of atomic tasks it stands for.

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::config::{Config, OpConfig, ScriptOptions};
use crate::error::{DistError, Result};
use crate::ops::TaskOperation;

/// What an atomic task does
#[derive(Clone)]
pub enum Operation {
    /// Declared in distrun.toml (or discovered in the tasks directory)
    Builtin(OpConfig),
    /// Supplied by library code
    Custom(Arc<dyn TaskOperation>),
}

impl Operation {
    pub fn describe(&self) -> String {
        match self {
            Operation::Builtin(op) => op.kind().to_string(),
            Operation::Custom(_) => "custom".to_string(),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Builtin(op) => f.debug_tuple("Builtin").field(op).finish(),
            Operation::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Task {
    Atomic(Operation),
    Composite(Vec<String>),
}

/// A node in the task graph
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub name: String,
    pub desc: Option<String>,
    pub task: Task,
}

impl TaskNode {
    pub fn atomic(name: impl Into<String>, op: Operation) -> Self {
        Self {
            name: name.into(),
            desc: None,
            task: Task::Atomic(op),
        }
    }

    pub fn composite(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            desc: None,
            task: Task::Composite(members),
        }
    }

    pub fn with_desc(mut self, desc: Option<impl Into<String>>) -> Self {
        self.desc = desc.map(Into::into);
        self
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.task, Task::Composite(_))
    }

    /// Member names of a composite; empty for atomic tasks
    pub fn members(&self) -> &[String] {
        match &self.task {
            Task::Composite(members) => members,
            Task::Atomic(_) => &[],
        }
    }
}

/// The task registry
#[derive(Debug, Default)]
pub struct TaskGraph {
    graph: DiGraph<TaskNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration plus discovered script files
    pub fn from_config(config: &Config, scripts: &[PathBuf]) -> Result<Self> {
        let mut graph = Self::new();

        for (name, task) in &config.tasks {
            graph.register(
                TaskNode::atomic(name.clone(), Operation::Builtin(task.op.clone()))
                    .with_desc(task.desc.clone()),
            )?;
        }

        for (name, alias) in &config.aliases {
            graph.register(
                TaskNode::composite(name.clone(), alias.tasks().to_vec()).with_desc(alias.desc()),
            )?;
        }

        for path in scripts {
            let Some(stem) = path.file_stem() else { continue };
            let op = OpConfig::Script(ScriptOptions {
                script: None,
                file: Some(path.clone()),
            });
            graph.register(
                TaskNode::atomic(stem.to_string_lossy(), Operation::Builtin(op))
                    .with_desc(Some(format!("Script {}", path.display()))),
            )?;
        }

        graph.register_target_groups()?;
        graph.validate()?;

        Ok(graph)
    }

    /// Add a task, rejecting duplicate names, reference cycles and
    /// options that cannot run (such as rewrite patterns that do not compile)
    pub fn register(&mut self, node: TaskNode) -> Result<()> {
        if self.name_to_index.contains_key(&node.name) {
            return Err(DistError::DuplicateTask { name: node.name });
        }

        if let Task::Atomic(Operation::Builtin(op)) = &node.task {
            op.validate(&node.name)?;
        }

        if node.members().contains(&node.name) {
            return Err(DistError::CyclicDependency {
                cycle: format!("{} -> {}", node.name, node.name),
            });
        }

        let name = node.name.clone();
        let members = node.members().to_vec();
        let idx = self.graph.add_node(node);
        self.name_to_index.insert(name.clone(), idx);

        // Edges from this composite to members that already exist
        for member in &members {
            if let Some(&member_idx) = self.name_to_index.get(member) {
                self.graph.update_edge(idx, member_idx, ());
            }
        }

        // Edges from existing composites that were waiting for this name
        let referrers: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&i| i != idx && self.graph[i].members().contains(&name))
            .collect();
        for referrer in referrers {
            self.graph.update_edge(referrer, idx, ());
        }

        if is_cyclic_directed(&self.graph) {
            let cycle = self.find_cycle_description(idx);
            // The newest node has the highest index, so removal moves nothing else
            self.graph.remove_node(idx);
            self.name_to_index.remove(&name);
            return Err(DistError::CyclicDependency { cycle });
        }

        debug!(task = %name, members = members.len(), "registered task");
        Ok(())
    }

    /// Register `prefix` as a composite of all `prefix:target` tasks
    ///
    /// Skipped for prefixes that are already task names.
    fn register_target_groups(&mut self) -> Result<()> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in self.task_names() {
            if let Some((prefix, _)) = name.split_once(':') {
                groups
                    .entry(prefix.to_string())
                    .or_default()
                    .push(name.to_string());
            }
        }

        for (prefix, mut targets) in groups {
            if self.has_task(&prefix) {
                continue;
            }
            targets.sort();
            let desc = format!("All {} targets", prefix);
            self.register(TaskNode::composite(prefix, targets).with_desc(Some(desc)))?;
        }

        Ok(())
    }

    /// Check that every composite member is registered
    pub fn validate(&self) -> Result<()> {
        for node in self.graph.node_weights() {
            for member in node.members() {
                if !self.has_task(member) {
                    return Err(DistError::TaskNotFound {
                        name: member.clone(),
                        available: self.available(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Flatten a task into the ordered atomic tasks it runs
    ///
    /// Depth-first, in declared order. A task listed twice runs twice.
    pub fn expand(&self, task_name: &str) -> Result<Vec<&TaskNode>> {
        let mut sequence = Vec::new();
        let mut stack = Vec::new();
        self.expand_into(task_name, &mut stack, &mut sequence)?;

        debug!(task = %task_name, steps = sequence.len(), "expanded task");
        Ok(sequence)
    }

    fn expand_into<'a>(
        &'a self,
        name: &str,
        stack: &mut Vec<String>,
        sequence: &mut Vec<&'a TaskNode>,
    ) -> Result<()> {
        let node = self.get_task(name).ok_or_else(|| DistError::TaskNotFound {
            name: name.to_string(),
            available: self.available(),
        })?;

        match &node.task {
            Task::Atomic(_) => sequence.push(node),
            Task::Composite(members) => {
                if stack.iter().any(|s| s == name) {
                    let mut chain = stack.clone();
                    chain.push(name.to_string());
                    return Err(DistError::CyclicDependency {
                        cycle: chain.join(" -> "),
                    });
                }

                stack.push(name.to_string());
                for member in members {
                    self.expand_into(member, stack, sequence)?;
                }
                stack.pop();
            }
        }

        Ok(())
    }

    /// Find a human-readable description of a cycle through `start`
    fn find_cycle_description(&self, start: NodeIndex) -> String {
        let mut visited = HashSet::new();
        let mut path = vec![self.graph[start].name.clone()];

        if self.dfs_find_cycle(start, start, &mut visited, &mut path) {
            path.join(" -> ")
        } else {
            "Unknown cycle".to_string()
        }
    }

    fn dfs_find_cycle(
        &self,
        current: NodeIndex,
        target: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        path: &mut Vec<String>,
    ) -> bool {
        for neighbor in self.graph.neighbors(current) {
            if neighbor == target {
                path.push(self.graph[target].name.clone());
                return true;
            }

            if visited.insert(neighbor) {
                path.push(self.graph[neighbor].name.clone());
                if self.dfs_find_cycle(neighbor, target, visited, path) {
                    return true;
                }
                path.pop();
            }
        }

        false
    }

    fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.task_names().map(str::to_string).collect();
        names.sort();
        names
    }

    /// Check if a task exists
    pub fn has_task(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Get a task by name
    pub fn get_task(&self, name: &str) -> Option<&TaskNode> {
        self.name_to_index.get(name).map(|&idx| &self.graph[idx])
    }

    /// All task names in registration order
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|n| n.name.as_str())
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.node_weights()
    }

    /// Direct members of a composite task
    pub fn members(&self, name: &str) -> Option<&[String]> {
        self.get_task(name).map(TaskNode::members)
    }

    /// Composite tasks that list the given task
    pub fn dependents(&self, name: &str) -> Option<Vec<&str>> {
        self.name_to_index.get(name).map(|&idx| {
            self.graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|i| self.graph[i].name.as_str())
                .collect()
        })
    }
}
