//! End-to-end graph execution through the public surface: structured
//! input -> graph -> scheduler -> report, with real shell commands.

use std::sync::Arc;

use serde_json::json;

use shellflow_core::config::{ExecOptions, Shell};
use shellflow_core::error::FlowError;
use shellflow_core::types::NodeState;
use shellflow_exec::{ProcessRegistry, Scheduler};

fn sh_options() -> ExecOptions {
    ExecOptions {
        shell: Some(Shell::Sh),
        ..Default::default()
    }
}

fn scheduler() -> Scheduler {
    Scheduler::new(Arc::new(ProcessRegistry::new()))
}

#[test]
fn test_parallel_block_compiles_to_fan_out_shape() {
    let graph = shellflow_graph::compile_value(
        &json!([
            "mkdir dist",
            {"parallel": ["cp a dist/", "cp b dist/"]},
            "zip -r out.zip dist/"
        ]),
        false,
    )
    .unwrap();

    assert_eq!(graph.len(), 4);
    let nodes = graph.nodes();
    // Both copies depend on the mkdir; the zip depends on both copies.
    assert!(nodes[0].after.is_empty());
    assert_eq!(nodes[1].after, vec!["n1"]);
    assert_eq!(nodes[2].after, vec!["n1"]);
    assert_eq!(nodes[3].after, vec!["n2", "n3"]);
}

#[test]
fn test_cycle_fails_before_anything_spawns() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let err = shellflow_graph::compile_value(
        &json!([
            {"id": "a", "run": format!("touch {}", marker.display()), "after": ["b"]},
            {"id": "b", "run": format!("touch {}", marker.display()), "after": ["a"]}
        ]),
        false,
    )
    .unwrap_err();

    assert!(matches!(err, FlowError::Cycle { .. }));
    assert!(!marker.exists(), "no command may run for a cyclic graph");
}

#[tokio::test]
async fn test_dependency_ordering_is_observable() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("a.done");
    // B would fail if it started before A finished writing.
    let graph = shellflow_graph::compile_value(
        &json!([
            {"id": "a", "run": format!("sleep 1; echo ready > {}", marker.display())},
            {"id": "b", "run": format!("cat {}", marker.display()), "after": ["a"]}
        ]),
        false,
    )
    .unwrap();

    let report = scheduler().run(&graph, &sh_options()).await;
    assert!(report.succeeded);
    assert_eq!(report.results[1].stdout, "ready");
}

#[tokio::test]
async fn test_fan_out_fan_in_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().display();
    let graph = shellflow_graph::compile_value(
        &json!([
            format!("mkdir {base}/dist; echo A > {base}/a; echo B > {base}/b"),
            {"parallel": [
                format!("cp {base}/a {base}/dist/"),
                format!("cp {base}/b {base}/dist/")
            ]},
            format!("cat {base}/dist/a {base}/dist/b")
        ]),
        false,
    )
    .unwrap();

    let report = scheduler().run(&graph, &sh_options()).await;
    assert!(report.succeeded);
    assert_eq!(report.results[3].stdout, "A\nB");
}

#[tokio::test]
async fn test_parallel_flag_on_flat_list() {
    let graph =
        shellflow_graph::compile_value(&json!(["echo x", "echo y", "echo z"]), true).unwrap();
    for node in graph.nodes() {
        assert!(node.after.is_empty());
    }
    let report = scheduler().run(&graph, &sh_options()).await;
    assert!(report.succeeded);
    // Insertion order regardless of finish order.
    let ids: Vec<&str> = report.results.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(ids, vec!["n1", "n2", "n3"]);
}

#[tokio::test]
async fn test_strict_mode_skip_is_user_visible() {
    let graph = shellflow_graph::compile_value(
        &json!([
            {"id": "build", "run": "echo building; exit 2"},
            {"id": "test", "run": "echo testing", "after": ["build"]},
            {"id": "deploy", "run": "echo deploying", "after": ["test"]}
        ]),
        false,
    )
    .unwrap();

    let options = ExecOptions {
        strict: true,
        ..sh_options()
    };
    let report = scheduler().run(&graph, &options).await;
    assert!(!report.succeeded);
    let states: Vec<NodeState> = report.results.iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec![NodeState::Failed, NodeState::Skipped, NodeState::Skipped]
    );
    assert_eq!(report.results[0].exit_code, Some(2));
}

#[tokio::test]
async fn test_shellflow_text_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().display();
    let flow = format!("mkdir {base}/out; {{ touch {base}/out/x & touch {base}/out/y }}; ls {base}/out");
    let graph = shellflow_graph::compile_text(&flow).unwrap();
    assert_eq!(graph.len(), 4);

    let report = scheduler().run(&graph, &sh_options()).await;
    assert!(report.succeeded);
    assert_eq!(report.results[3].stdout, "x\ny");
}
