use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use vulnscope::agent::{Agent, AgentRuntime};
use vulnscope::agents::assessment::{AssessmentStage, GuidedAssessmentAgent};
use vulnscope::agents::{
    ExploitationVerificationAgent, RemediationPlanningAgent, SecurityPolicyAgent,
};
use vulnscope::client::{
    CompletionClient, CompletionError, CompletionRequest, CompletionResponse,
};
use vulnscope::event::{Event, EventBus, EventKind, EventPayload};
use vulnscope::task::{Task, TaskStatus};

/// Pure completion client returning one fixed response.
struct FixedClient {
    response: String,
}

impl FixedClient {
    fn garbage() -> Arc<dyn CompletionClient> {
        Arc::new(Self {
            response: "{ definitely not valid json".to_string(),
        })
    }

    fn json(value: serde_json::Value) -> Arc<dyn CompletionClient> {
        Arc::new(Self {
            response: value.to_string(),
        })
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

#[tokio::test]
async fn exploitation_defaults_to_undetermined_on_garbage() {
    let bus = Arc::new(EventBus::new());
    let agent = ExploitationVerificationAgent::new(bus, FixedClient::garbage());

    let finding = json!({"finding_id": "f1", "vulnerability_type": "SQL Injection"});
    let verification = agent.verify_exploitability(&finding, &json!({})).await;

    assert_eq!(verification["status"], "undetermined");
    assert_eq!(verification["confidence"], 0.0);
    assert_eq!(verification["exploitation_path"], json!([]));
    assert_eq!(verification["finding_id"], "f1");
}

#[tokio::test]
async fn exploitation_parses_valid_response() {
    let bus = Arc::new(EventBus::new());
    let agent = ExploitationVerificationAgent::new(
        bus.clone(),
        FixedClient::json(json!({
            "status": "exploitable",
            "confidence": 0.9,
            "exploitation_path": ["reach endpoint", "inject payload"],
            "risk_factors": ["no input validation"],
        })),
    );

    let (_sub, mut rx) = bus.subscribe(EventKind::ExploitVerification, "observer");
    let verification = agent
        .verify_exploitability(&json!({"finding_id": "f2"}), &json!({}))
        .await;

    assert_eq!(verification["status"], "exploitable");
    assert_eq!(verification["exploitation_path"].as_array().unwrap().len(), 2);

    // The domain event is broadcast with the same verdict.
    let event = rx.recv().await.unwrap();
    let EventPayload::ExploitVerification { status, confidence, .. } = &event.payload else {
        panic!("unexpected payload");
    };
    assert_eq!(status.as_str(), "exploitable");
    assert!((confidence - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn exploitation_rejects_invalid_status_values() {
    let bus = Arc::new(EventBus::new());
    let agent = ExploitationVerificationAgent::new(
        bus,
        FixedClient::json(json!({"status": "absolutely_hackable", "confidence": 0.8})),
    );
    let verification = agent
        .verify_exploitability(&json!({"finding_id": "f3"}), &json!({}))
        .await;
    assert_eq!(verification["status"], "undetermined");
}

#[tokio::test]
async fn remediation_defaults_on_garbage() {
    let bus = Arc::new(EventBus::new());
    let agent = RemediationPlanningAgent::new(bus, FixedClient::garbage());

    let plan = agent
        .create_remediation_plan(&json!({"finding_id": "f1"}), &json!({}), &json!({}))
        .await;

    assert_eq!(plan["priority"], "medium");
    assert_eq!(plan["complexity"], "moderate");
    assert_eq!(plan["steps"].as_array().unwrap().len(), 2);
    assert!(plan["estimated_effort"].as_str().unwrap().contains("Unknown"));
}

#[tokio::test]
async fn remediation_parses_and_stores_plans() {
    let bus = Arc::new(EventBus::new());
    let agent = RemediationPlanningAgent::new(
        bus,
        FixedClient::json(json!({
            "priority": "high",
            "complexity": "simple",
            "steps": [{"description": "escape output", "explanation": "prevents xss"}],
            "code_changes": {"before": "echo $x", "after": "echo htmlspecialchars($x)"},
            "estimated_effort": "2 hours",
            "challenges": [],
            "best_practices": ["encode on output"],
        })),
    );

    let plan = agent
        .create_remediation_plan(&json!({"finding_id": "f9"}), &json!({}), &json!({}))
        .await;
    assert_eq!(plan["priority"], "high");
    assert_eq!(plan["complexity"], "simple");

    let plan_id = plan["plan_id"].as_str().unwrap();
    let stored = agent.get_remediation_plan(plan_id).await.unwrap();
    assert_eq!(stored["priority"], "high");

    let by_finding = agent.get_remediation_plans_by_finding("f9").await;
    assert_eq!(by_finding.len(), 1);
}

#[tokio::test]
async fn remediation_invalid_enum_values_fall_back() {
    let bus = Arc::new(EventBus::new());
    let agent = RemediationPlanningAgent::new(
        bus,
        FixedClient::json(json!({"priority": "urgent!!", "complexity": "who knows"})),
    );
    let plan = agent
        .create_remediation_plan(&json!({"finding_id": "f1"}), &json!({}), &json!({}))
        .await;
    assert_eq!(plan["priority"], "medium");
    assert_eq!(plan["complexity"], "moderate");
}

#[tokio::test]
async fn policy_defaults_to_requires_investigation() {
    let bus = Arc::new(EventBus::new());
    let agent = SecurityPolicyAgent::new(bus, FixedClient::garbage());

    let evaluation = agent
        .evaluate_policy_compliance(&json!({"id": "repo-1"}), "repository", &json!({}))
        .await;
    assert_eq!(evaluation["compliance_status"], "requires_investigation");
    assert_eq!(evaluation["compliance_gaps"], json!([]));
}

#[tokio::test]
async fn policy_recommendation_type_inferred_from_gaps() {
    let bus = Arc::new(EventBus::new());
    let agent = SecurityPolicyAgent::new(
        bus,
        FixedClient::json(json!({
            "title": "Adopt an input validation policy",
            "description": "Define validation requirements",
            "justification": "Several injection findings",
            "implementation_steps": ["draft", "review", "publish"],
            "policy_references": ["SDL-4"],
        })),
    );

    let input = json!({
        "compliance_gaps": [
            {"description": "Missing policy for input validation"}
        ]
    });
    let recommendation = agent
        .generate_policy_recommendation(&input, None, &json!({}))
        .await;
    assert_eq!(recommendation["recommendation_type"], "new_policy");
    assert_eq!(
        recommendation["implementation_steps"].as_array().unwrap().len(),
        3
    );
}

#[tokio::test]
async fn assessment_runs_every_stage_to_completion() {
    let bus = Arc::new(EventBus::new());
    let agent = GuidedAssessmentAgent::new(bus.clone(), FixedClient::garbage());

    let (_sub, mut stage_rx) = bus.subscribe(EventKind::AssessmentStage, "observer");

    let created = agent
        .create_assessment(
            "repo-1",
            json!({"files_count": 3, "languages": ["Python"]}),
            json!({"depth": "standard"}),
        )
        .await;
    let assessment_id = created["assessment_id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "started");

    // Poll until the background stage machine finishes.
    let mut status = json!({});
    for _ in 0..200 {
        status = agent.get_assessment_status(&assessment_id).await.unwrap();
        if status["status"] == "completed" || status["status"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status["status"], "completed");
    assert_eq!(status["current_stage"], "completed");
    assert_eq!(status["findings_count"], 0);

    // Every stage broadcast an in-progress and a completed transition.
    let mut completed_stages = Vec::new();
    while let Ok(event) = stage_rx.try_recv() {
        let EventPayload::AssessmentStage { stage, status, .. } = &event.payload else {
            continue;
        };
        if *status == vulnscope::agents::assessment::StageStatus::Completed {
            completed_stages.push(*stage);
        }
    }
    assert_eq!(completed_stages.len(), AssessmentStage::order().len());
    assert_eq!(completed_stages.first(), Some(&AssessmentStage::Initialization));
    assert_eq!(
        completed_stages.last(),
        Some(&AssessmentStage::ReportGeneration)
    );

    // The garbage client produced no findings, so overall risk is low.
    let report = agent.get_report(&assessment_id).await.unwrap();
    assert_eq!(report["summary"]["risk_level"], "low");
    assert_eq!(report["summary"]["total_findings"], 0);
}

#[tokio::test]
async fn risk_level_follows_severity_counts() {
    let counts = |critical: usize, high: usize, medium: usize| {
        let mut map = HashMap::new();
        map.insert("critical".to_string(), critical);
        map.insert("high".to_string(), high);
        map.insert("medium".to_string(), medium);
        map
    };
    assert_eq!(
        GuidedAssessmentAgent::calculate_risk_level(&counts(1, 0, 0)),
        "critical"
    );
    assert_eq!(
        GuidedAssessmentAgent::calculate_risk_level(&counts(0, 2, 5)),
        "high"
    );
    assert_eq!(
        GuidedAssessmentAgent::calculate_risk_level(&counts(0, 0, 1)),
        "medium"
    );
    assert_eq!(
        GuidedAssessmentAgent::calculate_risk_level(&counts(0, 0, 0)),
        "low"
    );
}

#[tokio::test]
async fn runtime_answers_assignments_and_rejects_unknown_task_types() {
    let bus = Arc::new(EventBus::new());
    let agent: Arc<dyn Agent> = Arc::new(ExploitationVerificationAgent::new(
        bus.clone(),
        FixedClient::json(json!({"status": "not_exploitable", "confidence": 0.6})),
    ));
    let runtime = AgentRuntime::new(agent, bus.clone());
    runtime.start();

    let (_sub, mut result_rx) = bus.subscribe(EventKind::TaskResult, "requester");

    // A valid assignment comes back completed.
    bus.emit(Event::new(
        "requester",
        "exploitation_verification",
        EventPayload::TaskAssignment {
            task_id: "task-1".into(),
            task_type: "verify_exploitability".into(),
            description: "verify".into(),
            parameters: json!({"finding": {"finding_id": "f1"}}),
            priority: 3,
        },
    ));
    let event = result_rx.recv().await.unwrap();
    let EventPayload::TaskResult { task_id, status, result } = &event.payload else {
        panic!("unexpected payload");
    };
    assert_eq!(task_id, "task-1");
    assert_eq!(*status, TaskStatus::Completed);
    assert_eq!(result.as_ref().unwrap()["status"], "not_exploitable");

    // An unknown task type comes back failed, never raising.
    bus.emit(Event::new(
        "requester",
        "exploitation_verification",
        EventPayload::TaskAssignment {
            task_id: "task-2".into(),
            task_type: "paint_the_shed".into(),
            description: "".into(),
            parameters: json!({}),
            priority: 1,
        },
    ));
    let event = result_rx.recv().await.unwrap();
    let EventPayload::TaskResult { task_id, status, .. } = &event.payload else {
        panic!("unexpected payload");
    };
    assert_eq!(task_id, "task-2");
    assert_eq!(*status, TaskStatus::Failed);

    runtime.stop();
    assert_eq!(bus.subscription_count(EventKind::TaskAssignment), 0);
}

#[tokio::test]
async fn handle_task_validates_required_parameters() {
    let bus = Arc::new(EventBus::new());
    let agent = RemediationPlanningAgent::new(bus, FixedClient::garbage());

    let task = Task::new("t1", "create_remediation_plan", "", "x", "remediation_planning");
    let execution = agent.handle_task(&task).await;
    assert_eq!(execution.status, TaskStatus::Failed);
    assert!(execution.error.unwrap().contains("finding"));
}
