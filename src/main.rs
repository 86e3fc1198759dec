//! distrun - build pipelines for JavaScript library distributions
//!
//! Runs named tasks from a distrun.toml:
//! - composite tasks expanded depth-first into atomic steps
//! - concat, templating and regex rewrites over file sets
//! - shader extraction and minification
//! - external tools and Rhai scripts

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use console::style;

mod cli;

use cli::{Cli, Commands, EffectiveCommand, GraphFormat, ListFormat};
use distrun::config::Config;
use distrun::error::{DistError, Result};
use distrun::executor::{Executor, ExecutorConfig};
use distrun::graph::{Operation, Task, TaskGraph};
use distrun::script;
use distrun::tree::ConfigTree;

#[tokio::main]
async fn main() -> ExitCode {
    // Set up panic handler for nice error messages
    miette::set_panic_hook();

    let cli = Cli::parse();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());
    if cli.verbose {
        if let Ok(directive) = "distrun=debug".parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            ExitCode::FAILURE
        }
    }
}

/// Everything loaded from one distrun.toml
struct Project {
    config: Config,
    path: PathBuf,
    tree: ConfigTree,
    graph: TaskGraph,
}

impl Project {
    fn load(config_path: Option<&Path>) -> Result<Self> {
        let (config, path) = Config::load(config_path)?;
        let base = Config::base_dir(&path);
        let tree = ConfigTree::from_config(&config, &base)?;
        let scripts = script::discover(&base.join(&config.settings.tasks_dir))?;
        let graph = TaskGraph::from_config(&config, &scripts)?;

        Ok(Self {
            config,
            path,
            tree,
            graph,
        })
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(cwd) = &cli.cwd {
        std::env::set_current_dir(cwd)?;
    }

    match cli.effective_command() {
        EffectiveCommand::Subcommand(cmd) => run_command(cmd, &cli).await,
        EffectiveCommand::RunTasks(tasks) => run_tasks(tasks, false, &cli).await,
        EffectiveCommand::None => {
            let project = Project::load(cli.config.as_deref())?;
            let default_task = project.config.settings.default_task.clone();
            if project.graph.has_task(&default_task) {
                run_project(project, &[default_task], false, &cli).await
            } else {
                print_task_list(&project.graph, ListFormat::Table, false)
            }
        }
    }
}

async fn run_command(cmd: &Commands, cli: &Cli) -> Result<()> {
    match cmd {
        Commands::Run { tasks, dry_run } => run_tasks(tasks, *dry_run, cli).await,

        Commands::List { format, members } => {
            let project = Project::load(cli.config.as_deref())?;
            print_task_list(&project.graph, format.clone(), *members)
        }

        Commands::Graph { task, format } => {
            let project = Project::load(cli.config.as_deref())?;
            print_graph(&project.graph, task.as_deref(), format.clone())
        }

        Commands::Init { force } => init_config(*force),

        Commands::Check => {
            let project = Project::load(cli.config.as_deref())?;
            let mut references = 0;
            for node in project.graph.tasks() {
                if let Task::Atomic(Operation::Builtin(op)) = &node.task {
                    for text in op.references() {
                        project.tree.check(text)?;
                        references += 1;
                    }
                }
            }

            println!(
                "{} {} is valid ({} tasks, {} references)",
                style("✓").green(),
                project.path.display(),
                project.graph.task_names().count(),
                references
            );
            Ok(())
        }
    }
}

async fn run_tasks(tasks: &[String], dry_run: bool, cli: &Cli) -> Result<()> {
    let project = Project::load(cli.config.as_deref())?;
    run_project(project, tasks, dry_run, cli).await
}

async fn run_project(project: Project, tasks: &[String], dry_run: bool, cli: &Cli) -> Result<()> {
    let exec_config = ExecutorConfig {
        dry_run,
        verbose: cli.verbose,
        quiet: cli.quiet,
        shell: project.config.settings.shell.clone(),
    };

    let executor = Executor::new(project.tree, exec_config);

    for task in tasks {
        executor.execute(&project.graph, task).await?;
    }

    Ok(())
}

fn to_json(value: &serde_json::Value) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| DistError::InvalidConfig {
        reason: e.to_string(),
    })
}

fn summary(graph: &TaskGraph, name: &str) -> String {
    match graph.get_task(name) {
        Some(node) => match (&node.desc, &node.task) {
            (Some(desc), _) => desc.clone(),
            (None, Task::Atomic(op)) => format!("[{}]", op.describe()),
            (None, Task::Composite(members)) => format!("[{} tasks]", members.len()),
        },
        None => String::new(),
    }
}

fn print_task_list(graph: &TaskGraph, format: ListFormat, show_members: bool) -> Result<()> {
    let mut names: Vec<_> = graph.task_names().collect();
    names.sort();

    match format {
        ListFormat::Table => {
            println!("{}", style("Available tasks:").bold());
            println!();

            let max_name_len = names.iter().map(|n| n.len()).max().unwrap_or(0);

            for name in names {
                print!(
                    "  {}{}  {}",
                    style(name).cyan().bold(),
                    " ".repeat(max_name_len - name.len()),
                    style(summary(graph, name)).dim()
                );

                if show_members {
                    if let Some(members) = graph.members(name).filter(|m| !m.is_empty()) {
                        print!(
                            " {}",
                            style(format!("[{}]", members.join(", "))).yellow().dim()
                        );
                    }
                }

                println!();
            }
        }

        ListFormat::Json => {
            let mut tasks = serde_json::Map::new();
            for name in names {
                let Some(node) = graph.get_task(name) else { continue };
                let mut obj = serde_json::Map::new();
                if let Some(desc) = &node.desc {
                    obj.insert("description".to_string(), serde_json::json!(desc));
                }
                match &node.task {
                    Task::Atomic(op) => {
                        obj.insert("op".to_string(), serde_json::json!(op.describe()));
                    }
                    Task::Composite(members) if show_members => {
                        obj.insert("tasks".to_string(), serde_json::json!(members));
                    }
                    Task::Composite(_) => {}
                }
                tasks.insert(name.to_string(), serde_json::Value::Object(obj));
            }
            println!("{}", to_json(&serde_json::Value::Object(tasks))?);
        }

        ListFormat::Plain => {
            for name in names {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

fn print_graph(graph: &TaskGraph, task: Option<&str>, format: GraphFormat) -> Result<()> {
    let composites: Vec<&str> = match task {
        Some(name) => {
            // Validates the name and every member below it
            graph.expand(name)?;
            let mut seen = Vec::new();
            collect_composites(graph, name, &mut seen);
            seen
        }
        None => graph
            .tasks()
            .filter(|t| t.is_composite())
            .map(|t| t.name.as_str())
            .collect(),
    };

    match format {
        GraphFormat::Text => match task {
            Some(name) => {
                println!("{}", style(format!("Task tree for {}:", name)).bold());
                println!();
                print_tree(graph, name, 1);
            }
            None => {
                println!("{}", style("Composite tasks:").bold());
                println!();
                for name in composites {
                    let members = graph.members(name).unwrap_or_default();
                    println!(
                        "  {} {} {}",
                        style(name).cyan().bold(),
                        style("→").dim(),
                        members.join(", ")
                    );
                }
            }
        },

        GraphFormat::Dot => {
            println!("digraph distrun {{");
            println!("  rankdir=LR;");
            println!("  node [shape=box];");

            for name in composites {
                for member in graph.members(name).unwrap_or_default() {
                    println!("  \"{}\" -> \"{}\";", name, member);
                }
            }

            println!("}}");
        }

        GraphFormat::Json => {
            let mut nodes = Vec::new();
            let mut edges = Vec::new();

            for name in &composites {
                for member in graph.members(name).unwrap_or_default() {
                    edges.push(serde_json::json!({ "from": name, "to": member }));
                }
            }
            for node in graph.tasks() {
                let involved = composites.contains(&node.name.as_str())
                    || composites
                        .iter()
                        .any(|c| graph.members(c).unwrap_or_default().contains(&node.name));
                if task.is_none() || involved {
                    nodes.push(serde_json::json!({
                        "id": node.name,
                        "description": node.desc,
                        "composite": node.is_composite(),
                    }));
                }
            }

            println!(
                "{}",
                to_json(&serde_json::json!({ "nodes": nodes, "edges": edges }))?
            );
        }
    }

    Ok(())
}

fn collect_composites<'g>(graph: &'g TaskGraph, name: &str, seen: &mut Vec<&'g str>) {
    let Some(node) = graph.get_task(name) else { return };
    if !node.is_composite() || seen.contains(&node.name.as_str()) {
        return;
    }
    seen.push(node.name.as_str());
    for member in node.members() {
        collect_composites(graph, member, seen);
    }
}

fn print_tree(graph: &TaskGraph, name: &str, depth: usize) {
    let indent = "  ".repeat(depth);
    match graph.get_task(name) {
        Some(node) if node.is_composite() => {
            println!("{}{}", indent, style(name).cyan().bold());
            for member in node.members() {
                print_tree(graph, member, depth + 1);
            }
        }
        _ => println!(
            "{}{} {}",
            indent,
            name,
            style(summary(graph, name)).dim()
        ),
    }
}

const CONFIG_TEMPLATE: &str = r#"# distrun.toml - distribution pipeline

[imports]
pkg = "package.json"
sources = "sources.json"

[properties]
specs = "tests/spec/**/*.js"

[properties.path]
main = "build/<%= pkg.name %>.js"
min = "build/<%= pkg.name %>.min.js"
glsl = "build/glsl/"
docs = "build/docs/"

# Shader bodies are read when replace:dist runs, after glsl has produced them
[properties.shaders]
primitive_fragment = "<%= read('build/glsl/primitive-fragment.glsl') %>"
primitive_vertex = "<%= read('build/glsl/primitive-vertex.glsl') %>"
quad_fragment = "<%= read('build/glsl/quad-fragment.glsl') %>"
quad_vertex = "<%= read('build/glsl/quad-vertex.glsl') %>"

[settings]
default_task = "default"
tasks_dir = "tasks"

[aliases]
default = ["test", "uglify"]
build = { desc = "Build the distributable", tasks = ["lint", "uglify"] }
glsl = { desc = "Extract and minify shaders", tasks = ["dot:glsl", "replace:glsl"] }
lint = ["eslint:beforeConcat", "glsl", "concat", "replace:dist", "eslint:afterConcat"]
es2015 = ["babel"]
doc = ["replace:docs", "jsdoc"]
test = ["lint", "karma"]
serve = ["connect:keepalive"]
gh-pages = ["test", "build", "doc", "copy:dist", "buildGhPages:dist"]
release = ["gh-pages", "dorelease"]

[tasks."concat:dist"]
op = "concat"
src = ["<%= sources %>"]
dest = "<%= path.main %>"

[tasks."replace:dist"]
op = "replace"
pipelines = ["super-call"]
force = true
files = [{ src = ["<%= path.main %>"], dest = "build/", expand = true, flatten = true }]

[tasks."replace:dist".variables]
__VERSION__ = "<%= pkg.version %>"
__PRIMITIVE_FRAGMENT__ = "<%= shaders.primitive_fragment %>"
__QUAD_FRAGMENT__ = "<%= shaders.quad_fragment %>"
__PRIMITIVE_VERTEX__ = "<%= shaders.primitive_vertex %>"
__QUAD_VERTEX__ = "<%= shaders.quad_vertex %>"

# Templated copies of the sources, keeping their directories, for jsdoc
[tasks."replace:docs"]
op = "replace"
force = true
files = [{ src = ["<%= sources %>", "README.md"], dest = "<%= path.docs %>", expand = true }]

[tasks."replace:docs".variables]
__VERSION__ = "<%= pkg.version %>"

[tasks."replace:glsl"]
op = "replace"
pipelines = ["shader-minify"]
preserve_order = true
files = [{ src = ["<%= path.glsl %>*.glsl"], dest = "<%= path.glsl %>", expand = true, flatten = true }]

[tasks."dot:glsl"]
op = "shader"
src = "src/video/webgl/glsl/"
dest = "<%= path.glsl %>"
strip = false

[tasks."uglify:dist"]
op = "exec"
command = "npx"
args = ["terser", "<%= path.main %>", "--compress", "--mangle", "eval=true", "--comments", "/(?:^!|@(?:license|preserve|cc_on))/", "-o", "<%= path.min %>"]

[tasks."eslint:beforeConcat"]
op = "exec"
command = "npx"
args = ["eslint", "-c", ".eslintrc.json", "<%= specs %>", "<%= sources %>", "Gruntfile.js", "plugins/**/*.js"]

[tasks."eslint:afterConcat"]
op = "exec"
command = "npx"
args = ["eslint", "-c", ".eslintrc.json", "<%= path.main %>"]

[tasks."babel:dist"]
op = "exec"
command = "npx"
args = ["babel", "--presets", "env", "--retain-lines", "--no-source-maps", "<%= path.main %>", "-o", "<%= path.main %>"]

[tasks."clean:dist"]
desc = "Remove the bundles"
op = "clean"
paths = ["<%= path.main %>", "<%= path.min %>"]

[tasks."clean:jsdoc"]
desc = "Remove generated documentation"
op = "clean"
paths = ["build/*.map", "build/docs", "build/glsl/*.glsl", "docs/**/*.*", "docs/scripts", "docs/styles", "docs/images", "docs/img"]

# Reads the templated copies written by replace:docs
[tasks."jsdoc:dist"]
op = "exec"
command = "npx"
args = ["jsdoc", "-c", "jsdoc_conf.json", "-t", "tasks/jsdoc-template/template", "-d", "docs", "-r", "<%= path.docs %>src", "<%= path.docs %>README.md"]

[tasks."connect:keepalive"]
desc = "Serve the project directory"
op = "exec"
command = "npx"
args = ["http-server", "-p", "8000"]
foreground = true

[tasks."copy:dist"]
op = "copy"
files = [{ src = ["index.html", "<%= path.main %>", "<%= path.min %>", "docs/**", "examples/**", "media/logo.png", "plugins/**"], dest = "dist/", expand = true }]

[tasks."buildGhPages:dist"]
desc = "Publish dist/ to the gh-pages branch"
op = "exec"
command = "npx"
args = ["gh-pages", "--dist", "dist", "--branch", "gh-pages"]

[tasks."karma:unit"]
op = "exec"
command = "npx"
args = ["karma", "start", "karma.conf.js", "--single-run", "--browsers", "ChromeHeadless"]
"#;

const RELEASE_TEMPLATE: &str = r#"// Print the next patch version for a release
let pkg = config("pkg");
let next = semver_bump(pkg.version, "patch");
print("releasing " + pkg.name + " " + next);
"#;

fn init_config(force: bool) -> Result<()> {
    let path = Path::new("distrun.toml");

    if path.exists() && !force {
        return Err(DistError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "distrun.toml already exists (use --force to overwrite)",
        )));
    }

    std::fs::write(path, CONFIG_TEMPLATE)?;

    let release = Path::new("tasks/dorelease.rhai");
    if !release.exists() || force {
        distrun::files::write_file(release, RELEASE_TEMPLATE)?;
    }

    println!(
        "{} Created {}",
        style("✓").green(),
        style("distrun.toml").bold()
    );

    Ok(())
}
