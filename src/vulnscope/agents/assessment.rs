//! Guided assessment agent.
//!
//! Owns a per-assessment state machine with a fixed stage order:
//! initialization, repository scan, threat modeling, dependency analysis,
//! code review, finding verification, and report generation. Every stage
//! broadcasts [`AssessmentStage`](crate::event::EventPayload::AssessmentStage)
//! events as it starts and finishes; a stage failure latches the assessment
//! as failed and stops all further transitions. Completing report
//! generation completes the assessment and derives the overall risk level
//! from the finding severity distribution.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::vulnscope::agent::{Agent, TaskExecution};
use crate::vulnscope::agents::complete_json;
use crate::vulnscope::client::CompletionClient;
use crate::vulnscope::event::{Event, EventBus, EventPayload};
use crate::vulnscope::task::Task;

/// Stages of a guided assessment, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStage {
    Initialization,
    RepositoryScan,
    ThreatModeling,
    DependencyAnalysis,
    CodeReview,
    FindingVerification,
    ReportGeneration,
    Completed,
}

impl AssessmentStage {
    /// The fixed execution order, excluding the terminal marker.
    pub fn order() -> [AssessmentStage; 7] {
        [
            Self::Initialization,
            Self::RepositoryScan,
            Self::ThreatModeling,
            Self::DependencyAnalysis,
            Self::CodeReview,
            Self::FindingVerification,
            Self::ReportGeneration,
        ]
    }

    /// The stage after this one, or `None` after report generation.
    pub fn next(&self) -> Option<AssessmentStage> {
        let order = Self::order();
        order
            .iter()
            .position(|stage| stage == self)
            .and_then(|idx| order.get(idx + 1).copied())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::RepositoryScan => "repository_scan",
            Self::ThreatModeling => "threat_modeling",
            Self::DependencyAnalysis => "dependency_analysis",
            Self::CodeReview => "code_review",
            Self::FindingVerification => "finding_verification",
            Self::ReportGeneration => "report_generation",
            Self::Completed => "completed",
        }
    }
}

/// Execution state of one stage, broadcast with every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Starting,
    InProgress,
    Completed,
    Failed,
}

/// Mutable record of one assessment.
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentRecord {
    pub assessment_id: String,
    pub repository_id: String,
    pub repository_info: Value,
    pub parameters: Value,
    pub start_time: chrono::DateTime<Utc>,
    pub current_stage: AssessmentStage,
    pub plan: Option<Value>,
    pub findings: Vec<Value>,
    pub status: String,
    pub error: Option<String>,
    pub report: Option<Value>,
}

/// Agent that runs guided, staged vulnerability assessments.
pub struct GuidedAssessmentAgent {
    agent_id: String,
    display_name: String,
    bus: Arc<EventBus>,
    client: Arc<dyn CompletionClient>,
    model: String,
    assessments: Arc<RwLock<HashMap<String, AssessmentRecord>>>,
    stage_results: Arc<RwLock<HashMap<String, BTreeMap<AssessmentStage, Value>>>>,
}

/// Clone of the agent's shared state used by the spawned stage runner.
#[derive(Clone)]
struct AssessmentWorker {
    agent_id: String,
    bus: Arc<EventBus>,
    client: Arc<dyn CompletionClient>,
    model: String,
    assessments: Arc<RwLock<HashMap<String, AssessmentRecord>>>,
    stage_results: Arc<RwLock<HashMap<String, BTreeMap<AssessmentStage, Value>>>>,
}

impl GuidedAssessmentAgent {
    /// Create the agent with its default id (`guided_assessment`).
    pub fn new(bus: Arc<EventBus>, client: Arc<dyn CompletionClient>) -> Self {
        let model = client.default_model().to_string();
        Self {
            agent_id: "guided_assessment".to_string(),
            display_name: "Guided Assessment Agent".to_string(),
            bus,
            client,
            model,
            assessments: Arc::new(RwLock::new(HashMap::new())),
            stage_results: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Override the completion model (builder pattern).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn worker(&self) -> AssessmentWorker {
        AssessmentWorker {
            agent_id: self.agent_id.clone(),
            bus: self.bus.clone(),
            client: self.client.clone(),
            model: self.model.clone(),
            assessments: self.assessments.clone(),
            stage_results: self.stage_results.clone(),
        }
    }

    /// Create an assessment, generate its plan, and launch the stage
    /// machine.
    ///
    /// Returns `{assessment_id, repository_id, plan, status}`. Stages run on
    /// a background task; poll [`GuidedAssessmentAgent::get_assessment_status`]
    /// or subscribe to `AssessmentStage` events for progress.
    pub async fn create_assessment(
        &self,
        repository_id: &str,
        repository_info: Value,
        parameters: Value,
    ) -> Value {
        let assessment_id = format!(
            "assessment_{}_{}",
            repository_id,
            Uuid::new_v4().simple()
        );
        log::info!(
            "creating assessment plan for repository {}",
            repository_id
        );

        let plan = self
            .generate_assessment_plan(&repository_info, &parameters)
            .await;

        let record = AssessmentRecord {
            assessment_id: assessment_id.clone(),
            repository_id: repository_id.to_string(),
            repository_info,
            parameters,
            start_time: Utc::now(),
            current_stage: AssessmentStage::Initialization,
            plan: Some(plan.clone()),
            findings: Vec::new(),
            status: "started".to_string(),
            error: None,
            report: None,
        };

        self.assessments
            .write()
            .await
            .insert(assessment_id.clone(), record);
        self.stage_results
            .write()
            .await
            .insert(assessment_id.clone(), BTreeMap::new());

        self.bus.emit(Event::broadcast(
            &self.agent_id,
            EventPayload::AssessmentPlan {
                assessment_id: assessment_id.clone(),
                repository_id: repository_id.to_string(),
                plan: plan.clone(),
            },
        ));

        let worker = self.worker();
        let spawn_id = assessment_id.clone();
        tokio::spawn(async move {
            worker.run_stages(&spawn_id).await;
        });

        json!({
            "assessment_id": assessment_id,
            "repository_id": repository_id,
            "plan": plan,
            "status": "started",
        })
    }

    /// Run every stage to completion before returning. Useful for callers
    /// that need a finished assessment rather than a background run.
    pub async fn run_assessment(&self, assessment_id: &str) {
        self.worker().run_stages(assessment_id).await;
    }

    /// Status snapshot of one assessment.
    pub async fn get_assessment_status(&self, assessment_id: &str) -> Option<Value> {
        let assessments = self.assessments.read().await;
        let record = assessments.get(assessment_id)?;
        let order = AssessmentStage::order();
        let completed_stages = order
            .iter()
            .position(|stage| *stage == record.current_stage)
            .unwrap_or(order.len());
        Some(json!({
            "assessment_id": record.assessment_id,
            "repository_id": record.repository_id,
            "status": record.status,
            "current_stage": record.current_stage.as_str(),
            "progress": completed_stages as f64 / order.len() as f64,
            "findings_count": record.findings.len(),
            "error": record.error,
        }))
    }

    /// Findings collected so far for an assessment.
    pub async fn get_findings(&self, assessment_id: &str) -> Vec<Value> {
        self.assessments
            .read()
            .await
            .get(assessment_id)
            .map(|record| record.findings.clone())
            .unwrap_or_default()
    }

    /// The final report, once report generation completed.
    pub async fn get_report(&self, assessment_id: &str) -> Option<Value> {
        self.assessments
            .read()
            .await
            .get(assessment_id)
            .and_then(|record| record.report.clone())
    }

    async fn generate_assessment_plan(&self, repository_info: &Value, parameters: &Value) -> Value {
        let prompt = format!(
            "Plan a staged vulnerability assessment for this repository.\n\n\
             REPOSITORY:\n{}\n\nPARAMETERS:\n{}\n\n\
             The assessment runs these stages in order: initialization, repository_scan, \
             threat_modeling, dependency_analysis, code_review, finding_verification, \
             report_generation.\n\
             Return a JSON object with a \"stages\" array where each entry has \"name\", \
             \"description\", and \"tasks\" (array of strings), plus a \"focus_areas\" array.",
            serde_json::to_string_pretty(repository_info).unwrap_or_default(),
            serde_json::to_string_pretty(parameters).unwrap_or_default(),
        );

        if let Some(plan) = complete_json(&self.client, prompt, &self.model, 0.2, 2000).await {
            if plan.get("stages").and_then(Value::as_array).is_some() {
                return plan;
            }
        }

        // Default plan when generation fails or lacks stages.
        json!({
            "stages": AssessmentStage::order()
                .iter()
                .map(|stage| json!({
                    "name": stage.as_str(),
                    "description": format!("Run the {} stage", stage.as_str()),
                    "tasks": [],
                }))
                .collect::<Vec<Value>>(),
            "focus_areas": [],
        })
    }

    /// Derive the overall risk level from a severity histogram.
    pub fn calculate_risk_level(severity_counts: &HashMap<String, usize>) -> &'static str {
        if severity_counts.get("critical").copied().unwrap_or(0) > 0 {
            "critical"
        } else if severity_counts.get("high").copied().unwrap_or(0) > 0 {
            "high"
        } else if severity_counts.get("medium").copied().unwrap_or(0) > 0 {
            "medium"
        } else {
            "low"
        }
    }
}

impl AssessmentWorker {
    async fn run_stages(&self, assessment_id: &str) {
        let mut stage = AssessmentStage::Initialization;
        loop {
            self.emit_stage(assessment_id, stage, StageStatus::InProgress, None);

            let result = self.execute_stage(assessment_id, stage).await;
            match result {
                Ok(results) => {
                    self.stage_results
                        .write()
                        .await
                        .entry(assessment_id.to_string())
                        .or_default()
                        .insert(stage, results.clone());
                    self.emit_stage(assessment_id, stage, StageStatus::Completed, Some(results));
                }
                Err(error) => {
                    log::error!(
                        "assessment {} stage {} failed: {}",
                        assessment_id,
                        stage.as_str(),
                        error
                    );
                    let mut assessments = self.assessments.write().await;
                    if let Some(record) = assessments.get_mut(assessment_id) {
                        record.status = "failed".to_string();
                        record.error = Some(error);
                    }
                    drop(assessments);
                    self.emit_stage(assessment_id, stage, StageStatus::Failed, None);
                    return;
                }
            }

            match stage.next() {
                Some(next_stage) => {
                    let mut assessments = self.assessments.write().await;
                    if let Some(record) = assessments.get_mut(assessment_id) {
                        record.current_stage = next_stage;
                        record.status = "in_progress".to_string();
                    }
                    stage = next_stage;
                }
                None => {
                    let mut assessments = self.assessments.write().await;
                    if let Some(record) = assessments.get_mut(assessment_id) {
                        record.current_stage = AssessmentStage::Completed;
                        record.status = "completed".to_string();
                    }
                    log::info!("assessment {} completed", assessment_id);
                    return;
                }
            }
        }
    }

    async fn execute_stage(
        &self,
        assessment_id: &str,
        stage: AssessmentStage,
    ) -> Result<Value, String> {
        let record = self
            .assessments
            .read()
            .await
            .get(assessment_id)
            .cloned()
            .ok_or_else(|| format!("assessment {} not found", assessment_id))?;

        match stage {
            AssessmentStage::Initialization => Ok(json!({
                "stage": stage.as_str(),
                "repository_details": {
                    "languages": record.repository_info.get("languages").cloned().unwrap_or_else(|| json!([])),
                    "size": record.repository_info.get("size").cloned().unwrap_or_else(|| json!(0)),
                    "files_count": record.repository_info.get("files_count").cloned().unwrap_or_else(|| json!(0)),
                },
                "assessment_configuration": {
                    "focus_areas": record.parameters.get("focus_areas").cloned().unwrap_or_else(|| json!([])),
                    "depth": record.parameters.get("depth").cloned().unwrap_or_else(|| json!("standard")),
                },
                "status": "completed",
            })),
            AssessmentStage::RepositoryScan => Ok(json!({
                "stage": stage.as_str(),
                "files_scanned": record.repository_info.get("files_count").cloned().unwrap_or_else(|| json!(0)),
                "languages": record.repository_info.get("languages").cloned().unwrap_or_else(|| json!([])),
                "status": "completed",
            })),
            AssessmentStage::ThreatModeling => {
                let prompt = format!(
                    "Identify the most relevant threat categories for this repository.\n\n\
                     REPOSITORY:\n{}\n\n\
                     Return a JSON object with a \"threats\" array where each entry has \
                     \"name\", \"description\", and \"attack_surface\" fields.",
                    serde_json::to_string_pretty(&record.repository_info).unwrap_or_default(),
                );
                let threats = complete_json(&self.client, prompt, &self.model, 0.3, 1500)
                    .await
                    .and_then(|value| value.get("threats").cloned())
                    .unwrap_or_else(|| json!([]));
                let count = threats.as_array().map(Vec::len).unwrap_or(0);
                Ok(json!({
                    "stage": stage.as_str(),
                    "threats": threats,
                    "threat_count": count,
                    "status": "completed",
                }))
            }
            AssessmentStage::DependencyAnalysis => {
                let dependencies = record
                    .repository_info
                    .get("dependencies")
                    .cloned()
                    .unwrap_or_else(|| json!([]));
                let count = dependencies.as_array().map(Vec::len).unwrap_or(0);
                Ok(json!({
                    "stage": stage.as_str(),
                    "dependencies_reviewed": count,
                    "vulnerable_dependencies": [],
                    "status": "completed",
                }))
            }
            AssessmentStage::CodeReview => {
                let prompt = format!(
                    "Review the repository summary below for likely vulnerability classes.\n\n\
                     REPOSITORY:\n{}\n\nFOCUS AREAS:\n{}\n\n\
                     Return a JSON array of finding objects, each with \"vulnerability_type\", \
                     \"description\", \"severity\" (critical, high, medium, low, or info), and \
                     \"confidence\" (0 to 1). Return [] when nothing stands out.",
                    serde_json::to_string_pretty(&record.repository_info).unwrap_or_default(),
                    serde_json::to_string_pretty(
                        record
                            .parameters
                            .get("focus_areas")
                            .unwrap_or(&json!([]))
                    )
                    .unwrap_or_default(),
                );
                let findings = complete_json(&self.client, prompt, &self.model, 0.2, 2500)
                    .await
                    .and_then(|value| value.as_array().cloned())
                    .unwrap_or_default();

                let mut assessments = self.assessments.write().await;
                if let Some(record) = assessments.get_mut(assessment_id) {
                    record.findings.extend(findings.iter().cloned());
                }
                Ok(json!({
                    "stage": stage.as_str(),
                    "findings_count": findings.len(),
                    "status": "completed",
                }))
            }
            AssessmentStage::FindingVerification => {
                let verified = record.findings.len();
                Ok(json!({
                    "stage": stage.as_str(),
                    "verified_count": verified,
                    "status": "completed",
                }))
            }
            AssessmentStage::ReportGeneration => {
                let mut severity_counts: HashMap<String, usize> = HashMap::new();
                for key in ["critical", "high", "medium", "low", "info"] {
                    severity_counts.insert(key.to_string(), 0);
                }
                for finding in &record.findings {
                    let severity = finding
                        .get("severity")
                        .and_then(Value::as_str)
                        .unwrap_or("info")
                        .to_lowercase();
                    if let Some(count) = severity_counts.get_mut(&severity) {
                        *count += 1;
                    }
                }
                let risk_level = GuidedAssessmentAgent::calculate_risk_level(&severity_counts);

                let stage_results = self
                    .stage_results
                    .read()
                    .await
                    .get(assessment_id)
                    .map(|results| {
                        results
                            .iter()
                            .map(|(stage, value)| (stage.as_str().to_string(), value.clone()))
                            .collect::<serde_json::Map<String, Value>>()
                    })
                    .unwrap_or_default();

                let report = json!({
                    "assessment_id": assessment_id,
                    "repository_id": record.repository_id,
                    "summary": {
                        "total_findings": record.findings.len(),
                        "severity_distribution": severity_counts,
                        "risk_level": risk_level,
                    },
                    "findings": record.findings,
                    "stage_results": stage_results,
                    "generated_at": Utc::now(),
                });

                let mut assessments = self.assessments.write().await;
                if let Some(record) = assessments.get_mut(assessment_id) {
                    record.report = Some(report);
                }
                Ok(json!({
                    "stage": stage.as_str(),
                    "report_id": format!("report_{}", assessment_id),
                    "report_sections": ["summary", "findings", "recommendations"],
                    "status": "completed",
                }))
            }
            AssessmentStage::Completed => Ok(json!({
                "stage": stage.as_str(),
                "status": "completed",
            })),
        }
    }

    fn emit_stage(
        &self,
        assessment_id: &str,
        stage: AssessmentStage,
        status: StageStatus,
        results: Option<Value>,
    ) {
        self.bus.emit(Event::broadcast(
            &self.agent_id,
            EventPayload::AssessmentStage {
                assessment_id: assessment_id.to_string(),
                stage,
                status,
                results,
            },
        ));
    }
}

#[async_trait]
impl Agent for GuidedAssessmentAgent {
    fn id(&self) -> &str {
        &self.agent_id
    }

    fn name(&self) -> &str {
        &self.display_name
    }

    async fn handle_task(&self, task: &Task) -> TaskExecution {
        match task.task_type.as_str() {
            "create_assessment" => {
                let Some(repository_id) = task.param_str("repository_id") else {
                    return TaskExecution::failed("missing required parameter: repository_id");
                };
                let repository_info = task
                    .param("repository_info")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let parameters = task
                    .param("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let result = self
                    .create_assessment(repository_id, repository_info, parameters)
                    .await;
                TaskExecution::completed(result)
            }
            "get_assessment_status" => {
                let Some(assessment_id) = task.param_str("assessment_id") else {
                    return TaskExecution::failed("missing required parameter: assessment_id");
                };
                match self.get_assessment_status(assessment_id).await {
                    Some(status) => TaskExecution::completed(status),
                    None => {
                        TaskExecution::failed(format!("assessment {} not found", assessment_id))
                    }
                }
            }
            other => TaskExecution::failed(format!("unknown task type: {}", other)),
        }
    }
}
