//! End-to-end runs of a small distribution pipeline through the library API

use std::path::Path;

use distrun::rewrite::strip_comments;
use distrun::shader::minify_source;
use distrun::{Config, ConfigTree, DistError, ErrorKind, Executor, ExecutorConfig, RunState, TaskGraph};

const QUAD_FRAGMENT: &str = "/* quad */\nuniform sampler2D uSampler;\nvarying vec2 vRegion;\n\nvoid main(void) {\n    // sample\n    gl_FragColor = texture2D(uSampler, vRegion);\n}\n";

const CONFIG: &str = r#"
[imports]
pkg = "package.json"
sources = "sources.json"

[properties.path]
main = "build/<%= pkg.name %>.js"
glsl = "build/glsl/"

[properties.shaders]
quad_fragment = "<%= read('build/glsl/quad-fragment.glsl') %>"

[aliases]
glsl = ["dot:glsl", "replace:glsl"]
build = ["clean:dist", "glsl", "concat:dist", "replace:dist"]
broken = ["concat:dist", "exec:fail", "replace:dist"]

[tasks."clean:dist"]
op = "clean"
paths = ["build"]

[tasks."dot:glsl"]
op = "shader"
src = "src/glsl"
dest = "<%= path.glsl %>"
strip = true

[tasks."replace:glsl"]
op = "replace"
pipelines = ["shader-minify"]
force = true
files = [{ src = ["<%= path.glsl %>*.glsl"], dest = "<%= path.glsl %>", expand = true, flatten = true }]

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
__QUAD_FRAGMENT__ = "<%= shaders.quad_fragment %>"

[tasks."exec:fail"]
op = "exec"
command = "exit 1"
shell = true
"#;

fn write(base: &Path, path: &str, content: &str) {
    let path = base.join(path);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn project() -> tempfile::TempDir {
    let temp = tempfile::tempdir().unwrap();
    let base = temp.path();
    write(base, "distrun.toml", CONFIG);
    write(base, "package.json", r#"{ "name": "melonjs", "version": "10.2.1" }"#);
    write(base, "sources.json", r#"["src/me.js", "src/renderer.js"]"#);
    write(base, "src/me.js", "var me = { version : \"__VERSION__\" };");
    write(
        base,
        "src/renderer.js",
        "me.Renderer = me.Object.extend({ init : function (c) { this._super(me.Object, \"init\", [c]); this.quad = \"__QUAD_FRAGMENT__\"; } });",
    );
    write(base, "src/glsl/quad-fragment.frag", QUAD_FRAGMENT);
    write(base, "build/stale.js", "old");
    temp
}

fn load(base: &Path) -> (ConfigTree, TaskGraph) {
    let path = base.join("distrun.toml");
    let config = Config::parse(&std::fs::read_to_string(&path).unwrap(), &path).unwrap();
    let tree = ConfigTree::from_config(&config, base).unwrap();
    let graph = TaskGraph::from_config(&config, &[]).unwrap();
    (tree, graph)
}

fn quiet() -> ExecutorConfig {
    ExecutorConfig {
        quiet: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_build_produces_templated_bundle() {
    let temp = project();
    let (tree, graph) = load(temp.path());

    let report = Executor::new(tree, quiet())
        .execute(&graph, "build")
        .await
        .unwrap();

    let steps: Vec<_> = report.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        steps,
        vec!["clean:dist", "dot:glsl", "replace:glsl", "concat:dist", "replace:dist"]
    );

    let shader = minify_source(&strip_comments().apply(QUAD_FRAGMENT));
    let bundle = std::fs::read_to_string(temp.path().join("build/melonjs.js")).unwrap();
    assert_eq!(
        bundle,
        format!(
            "var me = {{ version : \"10.2.1\" }};\nme.Renderer = me.Object.extend({{ init : function (c) {{ me.Object.prototype.init.apply(this, [c]); this.quad = \"{}\"; }} }});",
            shader
        )
    );
    assert!(!bundle.contains("__"));
    assert!(!temp.path().join("build/stale.js").exists());
}

#[tokio::test]
async fn test_failed_step_keeps_earlier_artifacts() {
    let temp = project();
    let (tree, graph) = load(temp.path());

    let report = Executor::new(tree, quiet()).run(&graph, "broken").await.unwrap();

    assert_eq!(
        report.state,
        RunState::Aborted {
            task: "exec:fail".to_string(),
            index: 1
        }
    );
    assert_eq!(report.skipped, vec!["replace:dist"]);

    let bundle = std::fs::read_to_string(temp.path().join("build/melonjs.js")).unwrap();
    assert!(bundle.contains("__VERSION__"));
    assert_eq!(
        report.failure.as_ref().map(DistError::kind),
        Some(ErrorKind::TaskFailure)
    );
}

#[tokio::test]
async fn test_missing_shader_artifact_fails_at_task_time() {
    let temp = project();
    let (tree, graph) = load(temp.path());

    // Without glsl first, the read() target does not exist yet
    let executor = Executor::new(tree, quiet());
    executor.execute(&graph, "concat:dist").await.unwrap();

    let err = executor.execute(&graph, "replace:dist").await.unwrap_err();
    assert!(matches!(err, DistError::ReferenceRead { .. }));
}
