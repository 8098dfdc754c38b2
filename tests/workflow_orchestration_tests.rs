use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vulnscope::client::{
    CompletionClient, CompletionError, CompletionRequest, CompletionResponse,
};
use vulnscope::event::{EventBus, EventKind, EventPayload};
use vulnscope::orchestrator::{PatternSettings, SpecializedAgents, WorkflowOrchestrator};
use vulnscope::patterns::debate::DebateConfig;
use vulnscope::workflow::{Stage, WorkflowError, WorkflowStatus, WorkflowType};

/// Completion client that always returns the same text. Pure by
/// construction, so agent behavior is deterministic.
struct FixedClient {
    response: String,
}

impl FixedClient {
    fn garbage() -> Self {
        Self {
            response: "this is not json".to_string(),
        }
    }
}

#[async_trait]
impl CompletionClient for FixedClient {
    async fn create_completion(
        &self,
        _request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        Ok(CompletionResponse::from_text(self.response.clone()))
    }
}

fn build_orchestrator(bus: Arc<EventBus>) -> WorkflowOrchestrator {
    let _ = env_logger::builder().is_test(true).try_init();
    let client: Arc<dyn CompletionClient> = Arc::new(FixedClient::garbage());
    let agents = SpecializedAgents::new(bus.clone(), client);
    WorkflowOrchestrator::new(bus, agents).with_pattern_settings(PatternSettings {
        debate: DebateConfig {
            max_rounds: 1,
            round_timeout: Duration::from_millis(50),
            conclusion_timeout: Duration::from_millis(50),
            require_evidence: true,
        },
        ..PatternSettings::default()
    })
}

async fn wait_until_completed(
    orchestrator: &WorkflowOrchestrator,
    workflow_id: &str,
) -> serde_json::Value {
    for _ in 0..200 {
        let status = orchestrator.get_workflow_status(workflow_id).await.unwrap();
        if status["status"] == "completed" || status["status"] == "failed" {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("workflow {} did not finish in time", workflow_id);
}

fn diamond_stages() -> Vec<Stage> {
    vec![
        Stage::single("prepare", "guided_assessment", "Prepare"),
        Stage::single("scan_left", "guided_assessment", "Scan left branch").depends_on(&["prepare"]),
        Stage::single("scan_right", "guided_assessment", "Scan right branch")
            .depends_on(&["prepare"]),
        Stage::single("merge", "guided_assessment", "Merge branch results")
            .depends_on(&["scan_left", "scan_right"]),
    ]
}

#[tokio::test]
async fn diamond_dependencies_run_in_topological_waves() {
    let bus = Arc::new(EventBus::new());
    let orchestrator = build_orchestrator(bus.clone());

    let (_sub, mut status_rx) = bus.subscribe(EventKind::WorkflowStatus, "observer");

    let created = orchestrator
        .create_custom_workflow(
            WorkflowType::TargetedAnalysis,
            "repo-1",
            "repository",
            serde_json::json!({}),
            None,
            None,
            diamond_stages(),
        )
        .await
        .unwrap();
    let workflow_id = created["workflow_id"].as_str().unwrap().to_string();

    orchestrator.start_workflow(&workflow_id).await.unwrap();
    wait_until_completed(&orchestrator, &workflow_id).await;

    // Collect progress values until the terminal event.
    let mut progress_values = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), status_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let EventPayload::WorkflowStatus { progress, status, .. } = &event.payload else {
            continue;
        };
        if *progress > 0.0 {
            progress_values.push(*progress);
        }
        if *status == WorkflowStatus::Completed {
            break;
        }
    }
    assert_eq!(progress_values, vec![0.25, 0.75, 1.0]);

    let results = orchestrator.get_workflow_results(&workflow_id).await.unwrap();
    let stage_results = results["stage_results"].as_object().unwrap();
    assert_eq!(stage_results.len(), 4);
    for stage in ["prepare", "scan_left", "scan_right", "merge"] {
        assert_eq!(stage_results[stage]["status"], "completed");
    }
}

#[tokio::test]
async fn create_rejects_dependency_cycles() {
    let bus = Arc::new(EventBus::new());
    let orchestrator = build_orchestrator(bus);

    let stages = vec![
        Stage::single("a", "guided_assessment", "").depends_on(&["b"]),
        Stage::single("b", "guided_assessment", "").depends_on(&["a"]),
    ];
    let result = orchestrator
        .create_custom_workflow(
            WorkflowType::TargetedAnalysis,
            "repo-1",
            "repository",
            serde_json::json!({}),
            None,
            None,
            stages,
        )
        .await;
    assert!(matches!(result, Err(WorkflowError::InvalidDefinition(_))));
}

#[tokio::test]
async fn create_rejects_unknown_agents() {
    let bus = Arc::new(EventBus::new());
    let orchestrator = build_orchestrator(bus);

    let stages = vec![Stage::single("a", "nonexistent_agent", "")];
    let result = orchestrator
        .create_custom_workflow(
            WorkflowType::TargetedAnalysis,
            "repo-1",
            "repository",
            serde_json::json!({}),
            None,
            None,
            stages,
        )
        .await;
    assert!(matches!(result, Err(WorkflowError::AgentNotFound(_))));
}

#[tokio::test]
async fn start_workflow_is_idempotent() {
    let bus = Arc::new(EventBus::new());
    let orchestrator = build_orchestrator(bus);

    let created = orchestrator
        .create_custom_workflow(
            WorkflowType::TargetedAnalysis,
            "repo-1",
            "repository",
            serde_json::json!({}),
            None,
            None,
            diamond_stages(),
        )
        .await
        .unwrap();
    let workflow_id = created["workflow_id"].as_str().unwrap().to_string();

    orchestrator.start_workflow(&workflow_id).await.unwrap();
    // A second start does not relaunch; it reports current state.
    let second = orchestrator.start_workflow(&workflow_id).await.unwrap();
    assert!(second["status"] == "running" || second["status"] == "completed");

    wait_until_completed(&orchestrator, &workflow_id).await;
    let results = orchestrator.get_workflow_results(&workflow_id).await.unwrap();
    // Each stage index executed exactly once.
    assert_eq!(results["stage_results"].as_object().unwrap().len(), 4);
}

#[tokio::test]
async fn unknown_workflow_ids_are_errors() {
    let bus = Arc::new(EventBus::new());
    let orchestrator = build_orchestrator(bus);

    assert!(matches!(
        orchestrator.start_workflow("missing").await,
        Err(WorkflowError::NotFound(_))
    ));
    assert!(matches!(
        orchestrator.get_workflow_status("missing").await,
        Err(WorkflowError::NotFound(_))
    ));
    assert!(matches!(
        orchestrator.pause_workflow("missing").await,
        Err(WorkflowError::NotFound(_))
    ));
}

#[tokio::test]
async fn pause_requires_a_running_workflow() {
    let bus = Arc::new(EventBus::new());
    let orchestrator = build_orchestrator(bus);

    let created = orchestrator
        .create_custom_workflow(
            WorkflowType::TargetedAnalysis,
            "repo-1",
            "repository",
            serde_json::json!({}),
            None,
            None,
            diamond_stages(),
        )
        .await
        .unwrap();
    let workflow_id = created["workflow_id"].as_str().unwrap().to_string();

    // Not started yet: pause is an invalid-state error, stop is a no-op
    // that just reports status.
    assert!(matches!(
        orchestrator.pause_workflow(&workflow_id).await,
        Err(WorkflowError::InvalidState { .. })
    ));
    let stopped = orchestrator.stop_workflow(&workflow_id).await.unwrap();
    assert_eq!(stopped["status"], "initializing");
}

#[tokio::test]
async fn failed_stage_does_not_abort_independent_stages() {
    let bus = Arc::new(EventBus::new());
    let orchestrator = build_orchestrator(bus);

    // "assessment" fails (no assessment id in artifacts); "setup" succeeds
    // through the generic fall-through.
    let stages = vec![
        Stage::single("assessment", "guided_assessment", "Needs missing artifacts"),
        Stage::single("setup", "guided_assessment", "Generic stage"),
    ];
    let created = orchestrator
        .create_custom_workflow(
            WorkflowType::TargetedAnalysis,
            "repo-1",
            "repository",
            serde_json::json!({}),
            None,
            None,
            stages,
        )
        .await
        .unwrap();
    let workflow_id = created["workflow_id"].as_str().unwrap().to_string();

    orchestrator.start_workflow(&workflow_id).await.unwrap();
    let status = wait_until_completed(&orchestrator, &workflow_id).await;
    assert_eq!(status["status"], "completed");

    let results = orchestrator.get_workflow_results(&workflow_id).await.unwrap();
    let stage_results = results["stage_results"].as_object().unwrap();
    assert!(stage_results["assessment"]["error"].is_string());
    assert_eq!(stage_results["setup"]["status"], "completed");
}

#[tokio::test]
async fn comprehensive_workflow_on_empty_repository() {
    let bus = Arc::new(EventBus::new());
    let orchestrator = build_orchestrator(bus);

    let created = orchestrator
        .create_workflow(
            WorkflowType::Comprehensive,
            "empty-repo",
            "repository",
            serde_json::json!({
                "repository_info": {"files_count": 0, "languages": []},
            }),
            None,
            None,
        )
        .await
        .unwrap();
    let workflow_id = created["workflow_id"].as_str().unwrap().to_string();
    assert_eq!(created["stages"], 7);

    orchestrator.start_workflow(&workflow_id).await.unwrap();
    let status = wait_until_completed(&orchestrator, &workflow_id).await;
    assert_eq!(status["status"], "completed");

    let results = orchestrator.get_workflow_results(&workflow_id).await.unwrap();
    assert_eq!(results["findings"], serde_json::json!([]));
    assert_eq!(results["artifacts"]["findings"], serde_json::json!([]));
    assert!(results["execution_time"].is_number());
    // Independent branch results are all present.
    let stage_results = results["stage_results"].as_object().unwrap();
    assert_eq!(stage_results.len(), 7);
}

#[tokio::test]
async fn workflow_task_surface_reports_failures() {
    use vulnscope::agent::Agent;
    use vulnscope::task::{Task, TaskStatus};

    let bus = Arc::new(EventBus::new());
    let orchestrator = build_orchestrator(bus);

    let task = Task::new("t1", "start_workflow", "", "cli", "workflow_orchestrator");
    let execution = orchestrator.handle_task(&task).await;
    assert_eq!(execution.status, TaskStatus::Failed);

    let task = Task::new("t2", "unknown_type", "", "cli", "workflow_orchestrator");
    let execution = orchestrator.handle_task(&task).await;
    assert_eq!(execution.status, TaskStatus::Failed);

    let task = Task::new("t3", "create_workflow", "", "cli", "workflow_orchestrator")
        .with_parameters(serde_json::json!({
            "workflow_type": "policy_compliance",
            "target_id": "repo-9",
            "target_type": "repository",
        }));
    let execution = orchestrator.handle_task(&task).await;
    assert_eq!(execution.status, TaskStatus::Completed);
    let summary = execution.result.unwrap();
    assert_eq!(summary["workflow_type"], "policy_compliance");
}
