use std::sync::Arc;

use rpa_flow::config::{EngineSettings, NodeKind, Workflow};
use rpa_flow::engine::{ErrorKind, RunStatus, WorkflowExecutor};
use rpa_flow::error::ConfigError;
use serde_json::json;

const EXAMPLE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/workflows/example.json");

#[test]
fn test_load_example_workflow() {
    let workflow = Workflow::from_file(EXAMPLE).expect("Failed to load workflow");

    assert_eq!(workflow.name(), "example");
    assert_eq!(workflow.id(), Some("example"));
    assert_eq!(workflow.nodes().len(), 5);
    assert_eq!(workflow.start_node().id, "start");
    assert_eq!(workflow.successor_of("start"), Some("fetch"));
    assert_eq!(workflow.successor_of("fetch"), Some("check"));
    assert!(workflow.variables().is_empty());

    let check = workflow.get_node("check").unwrap();
    match &check.kind {
        NodeKind::Decision(decision) => {
            assert_eq!(decision.condition, "x == 1");
            assert_eq!(decision.true_path.as_deref(), Some("end"));
        }
        other => panic!("unexpected kind: {other:?}"),
    }
}

#[test]
fn test_workflow_roundtrip_with_real_file() {
    let original = Workflow::from_file(EXAMPLE).expect("Failed to load workflow");

    let json = original.to_json().expect("Failed to serialize");
    let restored = Workflow::load(&json).expect("Failed to parse");

    assert_eq!(restored.name(), original.name());
    assert_eq!(restored.nodes(), original.nodes());
    assert_eq!(restored.edges(), original.edges());
    assert_eq!(restored.variables(), original.variables());
}

#[test]
fn test_edge_to_unknown_node_is_rejected() {
    let result = Workflow::load(
        r#"{
            "name": "broken",
            "nodes": [{"id": "s", "type": "START"}, {"id": "e", "type": "END"}],
            "edges": [{"from_node": "s", "to_node": "missing"}]
        }"#,
    );

    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_example_with_real_processes() {
    let workflow = Arc::new(Workflow::from_file(EXAMPLE).unwrap());

    let report = WorkflowExecutor::new(workflow).execute().await;

    assert_eq!(report.status, RunStatus::Success, "{:?}", report.error);
    assert_eq!(serde_json::Value::Object(report.context.clone()), json!({"x": 1}));
    assert!(report.error.is_none());
    assert!(report.logs.iter().any(|line| line.contains("[fetch] OK")));

    let parsed: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(parsed["status"], "success");
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_example_with_variable_override() {
    let workflow = Arc::new(Workflow::from_file(EXAMPLE).unwrap());
    let mut variables = serde_json::Map::new();
    variables.insert("operator".to_string(), json!("ana"));

    let report = WorkflowExecutor::new(workflow)
        .with_variables(variables)
        .execute()
        .await;

    assert!(report.is_success());
    assert_eq!(
        serde_json::Value::Object(report.context.clone()),
        json!({"operator": "ana", "x": 1})
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_cycle_is_stopped_by_visit_budget() {
    let workflow = Arc::new(
        Workflow::load(
            r#"{
                "name": "forever",
                "nodes": [
                    {"id": "s", "type": "START"},
                    {"id": "tick", "type": "ACTION", "script": "echo '{}'"},
                    {"id": "again", "type": "DECISION", "condition": "1 == 1", "true_path": "tick"},
                    {"id": "e", "type": "END"}
                ],
                "edges": [
                    {"from_node": "s", "to_node": "tick"},
                    {"from_node": "tick", "to_node": "again"}
                ]
            }"#,
        )
        .unwrap(),
    );
    let mut settings = EngineSettings::default();
    settings.engine.max_node_visits = 12;

    let report = WorkflowExecutor::new(workflow)
        .with_settings(settings)
        .execute()
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error_kind, Some(ErrorKind::InfiniteLoopGuard));
    assert_eq!(report.nodes_visited, 12);
}

#[cfg(unix)]
fn failing_step(on_error: &str) -> Arc<Workflow> {
    let json = json!({
        "name": "failing",
        "nodes": [
            {"id": "s", "type": "START"},
            {"id": "boom", "type": "ACTION", "script": "echo broken >&2; exit 1", "on_error": on_error},
            {"id": "after", "type": "ACTION", "script": "echo '{\"after\": true}'"},
            {"id": "e", "type": "END"}
        ],
        "edges": [
            {"from_node": "s", "to_node": "boom"},
            {"from_node": "boom", "to_node": "after"},
            {"from_node": "after", "to_node": "e"}
        ]
    });
    Arc::new(Workflow::load(&json.to_string()).unwrap())
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_step_stops_workflow() {
    let report = WorkflowExecutor::new(failing_step("stop")).execute().await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error_kind, Some(ErrorKind::StepFailure));
    assert!(report.error.as_deref().unwrap_or_default().contains("boom"));
    assert!(report.context.get("after").is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_step_can_continue() {
    let report = WorkflowExecutor::new(failing_step("continue")).execute().await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.context.get("after"), Some(&json!(true)));
    assert!(report.logs.iter().any(|line| line.contains("[boom] failed, continuing")));
}
