// tests/pipeline.rs
//
// End-to-end coverage through the public library API. Most cases here
// stick to the parse -> graph boundary (the same boundary `tiniflow check`
// exercises), confirming the shapes the DSL frontend promises actually
// land in the graph model. A couple of scenarios go further and run
// `WorkflowGroup::run` for real, spawning actual children and reading
// back what they wrote to confirm the pipe wiring itself, not just the
// graph shape.

use std::sync::atomic::{AtomicU32, Ordering};

use tiniflow::dsl::interpret;
use tiniflow::dsl::transpile::{self, RenderOptions};

static TEMPFILE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A path under the system temp dir, unique per call within this process
/// (distinct tests spawning real children run concurrently and must not
/// collide on the same file).
fn tempfile_path(tag: &str) -> std::path::PathBuf {
    let n = TEMPFILE_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("tiniflow_test_{tag}_{}_{n}", std::process::id()))
}

const LINEAR_PIPELINE: &str = "\
#!/usr/bin/env tiniflow
* produce = echo hello
* consume = wc -c
% _ = produce | consume
";

const FANOUT_PIPELINE: &str = "\
#!/usr/bin/env tiniflow
* source = echo hello
* left = cat
* right = cat
% _ = source | left || source | right
";

const CONTROL_PIPELINE: &str = "\
#!/usr/bin/env tiniflow
* build = make all
* cleanup = rm -rf build/tmp
% _ = build - cleanup || on.always
";

#[test]
fn linear_pipeline_parses_into_one_workflow() {
    let group = interpret::execute(LINEAR_PIPELINE).expect("parses");
    assert_eq!(group.workflow_count(), 1);
}

#[test]
fn fanout_pipeline_parses_without_error() {
    let group = interpret::execute(FANOUT_PIPELINE).expect("parses");
    assert_eq!(group.workflow_count(), 1);
}

#[test]
fn control_edge_with_always_tag_parses() {
    let group = interpret::execute(CONTROL_PIPELINE).expect("parses");
    assert_eq!(group.workflow_count(), 1);
}

#[test]
fn missing_shebang_is_rejected() {
    let err = interpret::execute("* produce = echo hi\n").unwrap_err();
    assert!(matches!(err, tiniflow::TiniflowError::MissingShebang));
}

#[test]
fn reference_to_undeclared_node_is_rejected() {
    let src = "#!/usr/bin/env tiniflow\n* a = echo hi\n% _ = a | ghost\n";
    assert!(interpret::execute(src).is_err());
}

#[test]
fn mixed_separator_edge_is_rejected_before_execution() {
    let src = "#!/usr/bin/env tiniflow\n* a = echo hi\n* b = cat\n* c = cat\n% _ = a | b - c\n";
    assert!(interpret::execute(src).is_err());
}

#[test]
fn transpile_output_is_self_consistent_with_interpret() {
    let rendered = transpile::render(LINEAR_PIPELINE, "linear.tf", &RenderOptions::default()).expect("renders");
    assert!(rendered.contains("group.add_node(\"echo hello\""));
    assert!(rendered.contains("group.add_node(\"wc -c\""));
    assert!(rendered.contains("group.run(\"linear.tf\")"));

    // Whatever the generated program would build, `interpret::execute`
    // must be able to build the same shape directly from the source.
    let group = interpret::execute(LINEAR_PIPELINE).expect("parses");
    assert_eq!(group.workflow_count(), 1);
}

#[test]
fn named_workflow_header_scopes_nodes_into_a_second_workflow() {
    let src = "\
#!/usr/bin/env tiniflow
* setup = echo init
> nightly
* job = echo run
";
    let group = interpret::execute(src).expect("parses");
    assert_eq!(group.workflow_count(), 2);
}

/// S2 — linear data pipeline: `a`'s stdout feeds `b`'s stdin over one pipe.
/// `b` redirects its own output to a file (so the assertion doesn't depend
/// on what the executor wires `b`'s own stdout to) and must see exactly
/// what `a` produced, piped through `wc -l`.
#[test]
fn linear_pipeline_runs_and_wires_stdout_to_stdin() {
    let out = tempfile_path("s2");
    let src = format!(
        "#!/usr/bin/env tiniflow\n* a = seq 1 3\n* b = wc -l > {}\n% _ = a | b\n",
        out.display()
    );
    let group = interpret::execute(&src).expect("parses");
    group.run("s2.tf").expect("runs to completion");

    let contents = std::fs::read_to_string(&out).expect("b wrote its output");
    std::fs::remove_file(&out).ok();
    assert_eq!(contents.trim(), "3");
}

/// S3 — fan-out with tee: `a`'s single stdout is duplicated to both `b`
/// and `c` by an inserted Tee process. Both sinks redirect to their own
/// file and must each receive the full line `a` produced.
#[test]
fn fanout_pipeline_runs_and_tees_to_both_sinks() {
    let out_b = tempfile_path("s3_b");
    let out_c = tempfile_path("s3_c");
    let src = format!(
        "#!/usr/bin/env tiniflow\n* a = echo x\n* b = cat > {}\n* c = cat > {}\n% _ = a | b || a | c\n",
        out_b.display(),
        out_c.display()
    );
    let group = interpret::execute(&src).expect("parses");
    group.run("s3.tf").expect("runs to completion");

    let b_contents = std::fs::read_to_string(&out_b).expect("b wrote its output");
    let c_contents = std::fs::read_to_string(&out_c).expect("c wrote its output");
    std::fs::remove_file(&out_b).ok();
    std::fs::remove_file(&out_c).ok();
    assert_eq!(b_contents, "x\n");
    assert_eq!(c_contents, "x\n");
}
