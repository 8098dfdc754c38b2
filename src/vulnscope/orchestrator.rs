//! Workflow orchestrator: the control plane and the DAG executor.
//!
//! The orchestrator generates [`WorkflowDefinition`]s from workflow types
//! (or accepts explicit stage graphs), validates them at creation time, and
//! executes them as DAGs: every scheduling round runs the whole eligible
//! frontier concurrently, records results, updates progress, and emits
//! [`WorkflowStatus`](crate::event::EventPayload::WorkflowStatus) events.
//!
//! # Failure and control semantics
//!
//! - A stage error is recorded in that stage's result and the run
//!   continues, so independent branches finish (partial completion).
//! - Pause, resume, and stop are observed between scheduling rounds;
//!   in-flight stages always run to completion.
//! - The executor derives its executed set from the recorded stage results,
//!   so a paused and resumed workflow never runs a stage twice.
//! - Once started, a workflow never raises from its executor; the
//!   completion path always emits a terminal status event.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::vulnscope::agent::{Agent, TaskExecution};
use crate::vulnscope::agents::{
    ExploitationVerificationAgent, GuidedAssessmentAgent, RemediationPlanningAgent,
    SecurityPolicyAgent,
};
use crate::vulnscope::agents::exploitation::ExploitabilityStatus;
use crate::vulnscope::agents::policy::PolicyRecommendationType;
use crate::vulnscope::agents::remediation::{RemediationComplexity, RemediationPriority};
use crate::vulnscope::client::CompletionClient;
use crate::vulnscope::event::{Event, EventBus, EventPayload};
use crate::vulnscope::patterns::chain::ChainOfThoughtConfig;
use crate::vulnscope::patterns::debate::DebateConfig;
use crate::vulnscope::patterns::feedback::FeedbackLoopConfig;
use crate::vulnscope::patterns::parallel::{Analyst, ParallelReasoningConfig};
use crate::vulnscope::patterns::{
    ChainOfThoughtPattern, DebatePattern, FeedbackLoopPattern, ParallelReasoningPattern,
};
use crate::vulnscope::task::{ReasoningPriority, Task};
use crate::vulnscope::workflow::{
    default_workflow_labels, definition_summary, validate_stage_graph, workflow_components, Stage,
    WorkflowDefinition, WorkflowError, WorkflowExecution, WorkflowStatus, WorkflowType,
};

/// The four specialized agents the orchestrator schedules.
#[derive(Clone)]
pub struct SpecializedAgents {
    pub guided_assessment: Arc<GuidedAssessmentAgent>,
    pub exploitation_verification: Arc<ExploitationVerificationAgent>,
    pub remediation_planning: Arc<RemediationPlanningAgent>,
    pub security_policy: Arc<SecurityPolicyAgent>,
}

impl SpecializedAgents {
    /// Construct all four agents over one bus and one completion client.
    pub fn new(bus: Arc<EventBus>, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            guided_assessment: Arc::new(GuidedAssessmentAgent::new(bus.clone(), client.clone())),
            exploitation_verification: Arc::new(ExploitationVerificationAgent::new(
                bus.clone(),
                client.clone(),
            )),
            remediation_planning: Arc::new(RemediationPlanningAgent::new(
                bus.clone(),
                client.clone(),
            )),
            security_policy: Arc::new(SecurityPolicyAgent::new(bus, client)),
        }
    }

    /// Resolve an agent by its registered name.
    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Agent>> {
        match name {
            "guided_assessment" => Some(self.guided_assessment.clone()),
            "exploitation_verification" => Some(self.exploitation_verification.clone()),
            "remediation_planning" => Some(self.remediation_planning.clone()),
            "security_policy" => Some(self.security_policy.clone()),
            _ => None,
        }
    }
}

/// Timeout and limit settings for the communication patterns the
/// orchestrator instantiates for collaborative stages.
#[derive(Clone, Default)]
pub struct PatternSettings {
    pub chain: ChainOfThoughtConfig,
    pub debate: DebateConfig,
    pub feedback: FeedbackLoopConfig,
    pub parallel: ParallelReasoningConfig,
}

/// Coordinates multi-agent vulnerability assessment workflows.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use vulnscope::event::EventBus;
/// use vulnscope::orchestrator::{SpecializedAgents, WorkflowOrchestrator};
/// use vulnscope::workflow::WorkflowType;
/// # use vulnscope::clients::HttpCompletionClient;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = Arc::new(EventBus::new());
/// let client = Arc::new(HttpCompletionClient::new("https://api.openai.com/v1", "key"));
/// let agents = SpecializedAgents::new(bus.clone(), client);
/// let orchestrator = WorkflowOrchestrator::new(bus, agents);
///
/// let created = orchestrator
///     .create_workflow(WorkflowType::Comprehensive, "repo-1", "repository", serde_json::json!({}), None, None)
///     .await?;
/// let workflow_id = created["workflow_id"].as_str().unwrap().to_string();
/// orchestrator.start_workflow(&workflow_id).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    agent_id: String,
    bus: Arc<EventBus>,
    agents: SpecializedAgents,
    definitions: Arc<RwLock<std::collections::HashMap<String, Arc<WorkflowDefinition>>>>,
    executions: Arc<RwLock<std::collections::HashMap<String, Arc<RwLock<WorkflowExecution>>>>>,
    active: Arc<RwLock<HashSet<String>>>,
    pattern_settings: PatternSettings,
}

impl WorkflowOrchestrator {
    /// Create an orchestrator over the given bus and agents.
    pub fn new(bus: Arc<EventBus>, agents: SpecializedAgents) -> Self {
        Self {
            agent_id: "workflow_orchestrator".to_string(),
            bus,
            agents,
            definitions: Arc::new(RwLock::new(std::collections::HashMap::new())),
            executions: Arc::new(RwLock::new(std::collections::HashMap::new())),
            active: Arc::new(RwLock::new(HashSet::new())),
            pattern_settings: PatternSettings::default(),
        }
    }

    /// Override the pattern timeouts and limits (builder pattern).
    pub fn with_pattern_settings(mut self, settings: PatternSettings) -> Self {
        self.pattern_settings = settings;
        self
    }

    /// Create a workflow from the built-in template for its type.
    pub async fn create_workflow(
        &self,
        workflow_type: WorkflowType,
        target_id: &str,
        target_type: &str,
        parameters: Value,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Value, WorkflowError> {
        let components = workflow_components(workflow_type, &parameters);
        self.register_definition(
            workflow_type,
            target_id,
            target_type,
            parameters,
            name,
            description,
            components.agents,
            components.stages,
            components.communication_patterns,
        )
        .await
    }

    /// Create a workflow from an explicit stage graph.
    ///
    /// The graph is validated the same way template graphs are; invalid
    /// graphs never reach the executor.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_custom_workflow(
        &self,
        workflow_type: WorkflowType,
        target_id: &str,
        target_type: &str,
        parameters: Value,
        name: Option<String>,
        description: Option<String>,
        stages: Vec<Stage>,
    ) -> Result<Value, WorkflowError> {
        let mut agents: Vec<String> = Vec::new();
        for stage in &stages {
            for agent in stage.agent.iter().chain(stage.agents.iter()) {
                if !agents.contains(agent) {
                    agents.push(agent.clone());
                }
            }
        }
        let patterns = stages
            .iter()
            .filter_map(|s| s.communication_pattern.clone())
            .collect();
        self.register_definition(
            workflow_type,
            target_id,
            target_type,
            parameters,
            name,
            description,
            agents,
            stages,
            patterns,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn register_definition(
        &self,
        workflow_type: WorkflowType,
        target_id: &str,
        target_type: &str,
        parameters: Value,
        name: Option<String>,
        description: Option<String>,
        agents: Vec<String>,
        stages: Vec<Stage>,
        communication_patterns: Vec<String>,
    ) -> Result<Value, WorkflowError> {
        validate_stage_graph(&stages)?;
        for stage in &stages {
            for agent in stage.agent.iter().chain(stage.agents.iter()) {
                if self.agents.by_name(agent).is_none() {
                    return Err(WorkflowError::AgentNotFound(agent.clone()));
                }
            }
        }

        let workflow_id = format!(
            "workflow_{}_{}",
            workflow_type.as_str(),
            Uuid::new_v4().simple()
        );
        let (default_name, default_description) =
            default_workflow_labels(workflow_type, target_id, target_type);

        let definition = Arc::new(WorkflowDefinition {
            workflow_id: workflow_id.clone(),
            workflow_type,
            name: name.unwrap_or(default_name),
            description: description.unwrap_or(default_description),
            target_id: target_id.to_string(),
            target_type: target_type.to_string(),
            parameters,
            agents,
            stages,
            communication_patterns,
            created_at: Utc::now(),
        });

        log::info!(
            "created workflow {} ({}) with {} stages",
            workflow_id,
            workflow_type,
            definition.stages.len()
        );

        self.definitions
            .write()
            .await
            .insert(workflow_id.clone(), definition.clone());
        self.executions.write().await.insert(
            workflow_id.clone(),
            Arc::new(RwLock::new(WorkflowExecution::new(workflow_id))),
        );

        Ok(definition_summary(&definition))
    }

    /// Start a created workflow. Idempotent: a second call returns the
    /// current status without relaunching the executor.
    pub async fn start_workflow(&self, workflow_id: &str) -> Result<Value, WorkflowError> {
        let definition = self.definition(workflow_id).await?;
        let execution = self.execution(workflow_id).await?;

        if self.active.read().await.contains(workflow_id) {
            log::warn!("workflow {} is already running", workflow_id);
            return self.get_workflow_status(workflow_id).await;
        }
        {
            let mut exec = execution.write().await;
            if exec.status != WorkflowStatus::Initializing {
                return self.get_workflow_status(workflow_id).await;
            }
            exec.status = WorkflowStatus::Running;
            exec.start_time = Some(Utc::now());
        }
        self.active.write().await.insert(workflow_id.to_string());

        log::info!("starting workflow execution: {}", workflow_id);
        self.emit_workflow_event(&definition, WorkflowStatus::Running, 0.0, None);

        let orchestrator = self.clone();
        let spawn_id = workflow_id.to_string();
        tokio::spawn(async move {
            orchestrator.run_workflow(&spawn_id).await;
        });

        Ok(json!({
            "workflow_id": workflow_id,
            "name": definition.name,
            "status": "running",
            "current_stage": 0,
            "total_stages": definition.stages.len(),
        }))
    }

    /// Read-only status snapshot.
    pub async fn get_workflow_status(&self, workflow_id: &str) -> Result<Value, WorkflowError> {
        let definition = self.definition(workflow_id).await?;
        let execution = self.execution(workflow_id).await?;
        let exec = execution.read().await;
        let current_stage_name = definition
            .stages
            .get(exec.current_stage)
            .map(|stage| stage.name.clone());
        Ok(json!({
            "workflow_id": workflow_id,
            "name": definition.name,
            "description": definition.description,
            "workflow_type": definition.workflow_type,
            "target_id": definition.target_id,
            "target_type": definition.target_type,
            "status": exec.status.as_str(),
            "progress": exec.progress,
            "current_stage": exec.current_stage,
            "current_stage_name": current_stage_name,
            "total_stages": definition.stages.len(),
            "start_time": exec.start_time,
            "completion_time": exec.completion_time,
            "error": exec.error,
        }))
    }

    /// Current results. Completed workflows get the compiled view; anything
    /// else gets a partial snapshot of stage results and artifacts.
    pub async fn get_workflow_results(&self, workflow_id: &str) -> Result<Value, WorkflowError> {
        let definition = self.definition(workflow_id).await?;
        let execution = self.execution(workflow_id).await?;
        let exec = execution.read().await;
        if exec.status == WorkflowStatus::Completed {
            return Ok(Self::compile_results(&definition, &exec));
        }

        let mut stage_results = Map::new();
        for (idx, result) in &exec.stage_results {
            if let Some(stage) = definition.stages.get(*idx) {
                stage_results.insert(stage.name.clone(), result.clone());
            }
        }
        Ok(json!({
            "workflow_id": workflow_id,
            "workflow_type": definition.workflow_type,
            "target_id": definition.target_id,
            "target_type": definition.target_type,
            "status": exec.status.as_str(),
            "progress": exec.progress,
            "start_time": exec.start_time,
            "stage_results": stage_results,
            "artifacts": exec.artifacts.clone().into_iter().collect::<Map<String, Value>>(),
        }))
    }

    /// Pause a running workflow. In-flight stages are not interrupted; the
    /// executor honors the flag at its next scheduling decision.
    pub async fn pause_workflow(&self, workflow_id: &str) -> Result<Value, WorkflowError> {
        let definition = self.definition(workflow_id).await?;
        let execution = self.execution(workflow_id).await?;
        let progress = {
            let mut exec = execution.write().await;
            if exec.status != WorkflowStatus::Running {
                return Err(WorkflowError::InvalidState {
                    workflow_id: workflow_id.to_string(),
                    status: exec.status,
                });
            }
            exec.status = WorkflowStatus::Paused;
            exec.progress
        };
        log::info!("pausing workflow: {}", workflow_id);
        self.emit_workflow_event(&definition, WorkflowStatus::Paused, progress, None);
        self.get_workflow_status(workflow_id).await
    }

    /// Resume a paused workflow.
    pub async fn resume_workflow(&self, workflow_id: &str) -> Result<Value, WorkflowError> {
        let definition = self.definition(workflow_id).await?;
        let execution = self.execution(workflow_id).await?;
        let progress = {
            let mut exec = execution.write().await;
            if exec.status != WorkflowStatus::Paused {
                return Err(WorkflowError::InvalidState {
                    workflow_id: workflow_id.to_string(),
                    status: exec.status,
                });
            }
            exec.status = WorkflowStatus::Running;
            exec.progress
        };
        self.active.write().await.insert(workflow_id.to_string());
        log::info!("resuming workflow: {}", workflow_id);
        self.emit_workflow_event(&definition, WorkflowStatus::Running, progress, None);

        let orchestrator = self.clone();
        let spawn_id = workflow_id.to_string();
        tokio::spawn(async move {
            orchestrator.run_workflow(&spawn_id).await;
        });
        self.get_workflow_status(workflow_id).await
    }

    /// Stop a running or paused workflow. The execution is forced to
    /// completed with a stop marker; the executor exits at its next
    /// scheduling decision.
    pub async fn stop_workflow(&self, workflow_id: &str) -> Result<Value, WorkflowError> {
        let definition = self.definition(workflow_id).await?;
        let execution = self.execution(workflow_id).await?;
        let progress = {
            let mut exec = execution.write().await;
            if !matches!(exec.status, WorkflowStatus::Running | WorkflowStatus::Paused) {
                log::warn!(
                    "workflow {} is not running or paused (status {})",
                    workflow_id,
                    exec.status.as_str()
                );
                return self.get_workflow_status(workflow_id).await;
            }
            exec.status = WorkflowStatus::Completed;
            exec.completion_time = Some(Utc::now());
            exec.progress
        };
        self.active.write().await.remove(workflow_id);
        log::info!("stopping workflow: {}", workflow_id);
        self.emit_workflow_event(
            &definition,
            WorkflowStatus::Completed,
            progress,
            Some(json!({"message": "stopped by user"})),
        );
        self.get_workflow_status(workflow_id).await
    }

    async fn definition(&self, workflow_id: &str) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        self.definitions
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))
    }

    async fn execution(
        &self,
        workflow_id: &str,
    ) -> Result<Arc<RwLock<WorkflowExecution>>, WorkflowError> {
        self.executions
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))
    }

    /// The executor. Runs until every stage executed or the status leaves
    /// `Running`. Never raises.
    async fn run_workflow(&self, workflow_id: &str) {
        let Ok(definition) = self.definition(workflow_id).await else {
            return;
        };
        let Ok(execution) = self.execution(workflow_id).await else {
            return;
        };
        let total = definition.stages.len();
        log::info!("executing workflow {} with {} stages", workflow_id, total);

        // Executed is derived from recorded results so a resumed run never
        // repeats a stage.
        let mut executed_idx: HashSet<usize> = {
            let exec = execution.read().await;
            exec.stage_results.keys().copied().collect()
        };
        let mut executed_names: HashSet<String> = executed_idx
            .iter()
            .filter_map(|idx| definition.stages.get(*idx).map(|s| s.name.clone()))
            .collect();
        let mut pending: BTreeSet<usize> =
            (0..total).filter(|idx| !executed_idx.contains(idx)).collect();

        while !pending.is_empty() {
            if execution.read().await.status != WorkflowStatus::Running {
                break;
            }

            let eligible: Vec<usize> = pending
                .iter()
                .copied()
                .filter(|idx| {
                    definition.stages[*idx]
                        .dependencies
                        .iter()
                        .all(|dep| executed_names.contains(dep))
                })
                .collect();

            if eligible.is_empty() {
                log::error!(
                    "workflow {} has unsatisfiable stage dependencies, stopping",
                    workflow_id
                );
                let progress = {
                    let mut exec = execution.write().await;
                    exec.status = WorkflowStatus::Failed;
                    exec.error = Some("stage dependency cycle".to_string());
                    exec.progress
                };
                self.active.write().await.remove(workflow_id);
                self.emit_workflow_event(
                    &definition,
                    WorkflowStatus::Failed,
                    progress,
                    Some(json!({"error": "stage dependency cycle"})),
                );
                return;
            }

            // The whole eligible frontier runs concurrently.
            let batch = eligible.iter().map(|idx| {
                self.execute_workflow_stage(definition.clone(), execution.clone(), *idx)
            });
            join_all(batch).await;

            for idx in &eligible {
                executed_idx.insert(*idx);
                executed_names.insert(definition.stages[*idx].name.clone());
                pending.remove(idx);
            }

            let progress = executed_idx.len() as f64 / total as f64;
            {
                let mut exec = execution.write().await;
                exec.progress = progress;
            }
            if !pending.is_empty() {
                self.emit_workflow_event(&definition, WorkflowStatus::Running, progress, None);
            }
        }

        if executed_idx.len() == total {
            let compiled = {
                let mut exec = execution.write().await;
                exec.status = WorkflowStatus::Completed;
                exec.completion_time = Some(Utc::now());
                exec.progress = 1.0;
                Self::compile_results(&definition, &exec)
            };
            self.active.write().await.remove(workflow_id);
            self.emit_workflow_event(&definition, WorkflowStatus::Completed, 1.0, Some(compiled));
            log::info!("workflow {} completed successfully", workflow_id);
        } else {
            // Paused, stopped, or failed: the executor just steps aside.
            self.active.write().await.remove(workflow_id);
        }
    }

    async fn execute_workflow_stage(
        &self,
        definition: Arc<WorkflowDefinition>,
        execution: Arc<RwLock<WorkflowExecution>>,
        stage_idx: usize,
    ) {
        let stage = &definition.stages[stage_idx];
        log::info!(
            "executing workflow {} stage {}: {}",
            definition.workflow_id,
            stage_idx,
            stage.name
        );
        {
            let mut exec = execution.write().await;
            exec.current_stage = stage_idx;
        }

        let result = if stage.is_collaborative() {
            self.run_pattern_stage(&definition, &execution, stage).await
        } else {
            self.dispatch_single_agent_stage(&definition, &execution, stage)
                .await
        };

        let value = match result {
            Ok(value) => value,
            Err(error) => {
                log::error!(
                    "error executing workflow {} stage {}: {}",
                    definition.workflow_id,
                    stage.name,
                    error
                );
                json!({"error": error, "status": "failed"})
            }
        };

        let mut exec = execution.write().await;
        exec.stage_results.insert(stage_idx, value);
    }

    async fn dispatch_single_agent_stage(
        &self,
        definition: &WorkflowDefinition,
        execution: &Arc<RwLock<WorkflowExecution>>,
        stage: &Stage,
    ) -> Result<Value, String> {
        let agent_name = stage
            .agent
            .as_deref()
            .ok_or_else(|| format!("no agent specified for stage {}", stage.name))?;

        match agent_name {
            "guided_assessment" => {
                self.guided_assessment_stage(definition, execution, stage)
                    .await
            }
            "exploitation_verification" => {
                self.exploitation_stage(definition, execution, stage).await
            }
            "remediation_planning" => self.remediation_stage(definition, execution, stage).await,
            "security_policy" => self.policy_stage(definition, execution, stage).await,
            other => match self.agents.by_name(other) {
                Some(agent) => {
                    let input = self.stage_input(definition, execution, stage).await;
                    Ok(agent.execute_stage(&stage.name, &input).await)
                }
                None => Err(format!("agent {} not found", other)),
            },
        }
    }

    async fn guided_assessment_stage(
        &self,
        definition: &WorkflowDefinition,
        execution: &Arc<RwLock<WorkflowExecution>>,
        stage: &Stage,
    ) -> Result<Value, String> {
        let agent = &self.agents.guided_assessment;
        match stage.name.as_str() {
            "initialization" => {
                let repository_info = definition
                    .parameters
                    .get("repository_info")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let assessment_parameters = definition
                    .parameters
                    .get("assessment_parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let created = agent
                    .create_assessment(&definition.target_id, repository_info, assessment_parameters)
                    .await;
                let assessment_id = created
                    .get("assessment_id")
                    .cloned()
                    .unwrap_or(Value::Null);
                execution
                    .write()
                    .await
                    .artifacts
                    .insert("assessment_id".to_string(), assessment_id.clone());
                Ok(json!({
                    "stage": stage.name,
                    "status": "completed",
                    "assessment_id": assessment_id,
                    "plan": created.get("plan").cloned(),
                }))
            }
            "assessment" | "reporting" => {
                let assessment_id = execution
                    .read()
                    .await
                    .artifacts
                    .get("assessment_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| "assessment id not found in workflow artifacts".to_string())?;

                let status = agent
                    .get_assessment_status(&assessment_id)
                    .await
                    .ok_or_else(|| format!("assessment {} not found", assessment_id))?;

                // Promote whatever the assessment has found so far.
                let findings = agent.get_findings(&assessment_id).await;
                execution
                    .write()
                    .await
                    .artifacts
                    .insert("findings".to_string(), Value::Array(findings));

                Ok(json!({
                    "stage": stage.name,
                    "status": "completed",
                    "assessment_id": assessment_id,
                    "assessment_status": status.get("status").cloned(),
                    "current_stage": status.get("current_stage").cloned(),
                    "progress": status.get("progress").cloned(),
                    "findings_count": status.get("findings_count").cloned(),
                }))
            }
            _ => {
                let input = self.stage_input(definition, execution, stage).await;
                Ok(agent.execute_stage(&stage.name, &input).await)
            }
        }
    }

    async fn exploitation_stage(
        &self,
        definition: &WorkflowDefinition,
        execution: &Arc<RwLock<WorkflowExecution>>,
        stage: &Stage,
    ) -> Result<Value, String> {
        let agent = &self.agents.exploitation_verification;
        match stage.name.as_str() {
            "initialization" => Ok(json!({"stage": stage.name, "status": "completed"})),
            "analysis" | "exploitation" => {
                let findings = self.findings_for(definition, execution).await;
                if findings.is_empty() {
                    return Ok(json!({
                        "stage": stage.name,
                        "status": "completed",
                        "message": "No findings to verify",
                        "verifications": [],
                    }));
                }
                let context = definition
                    .parameters
                    .get("context")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let mut verifications = Vec::with_capacity(findings.len());
                for finding in &findings {
                    verifications.push(agent.verify_exploitability(finding, &context).await);
                }
                execution
                    .write()
                    .await
                    .artifacts
                    .insert("verifications".to_string(), Value::Array(verifications.clone()));
                Ok(json!({
                    "stage": stage.name,
                    "status": "completed",
                    "verifications_count": verifications.len(),
                    "verification_summary": summarize_verifications(&verifications),
                }))
            }
            "reporting" => {
                let verifications = execution
                    .read()
                    .await
                    .artifacts
                    .get("verifications")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                Ok(json!({
                    "stage": stage.name,
                    "status": "completed",
                    "verifications_count": verifications.len(),
                    "verification_summary": summarize_verifications(&verifications),
                    "report_id": format!("exploit_report_{}", definition.workflow_id),
                }))
            }
            _ => {
                let input = self.stage_input(definition, execution, stage).await;
                Ok(agent.execute_stage(&stage.name, &input).await)
            }
        }
    }

    async fn remediation_stage(
        &self,
        definition: &WorkflowDefinition,
        execution: &Arc<RwLock<WorkflowExecution>>,
        stage: &Stage,
    ) -> Result<Value, String> {
        let agent = &self.agents.remediation_planning;
        match stage.name.as_str() {
            "initialization" => Ok(json!({"stage": stage.name, "status": "completed"})),
            "analysis" | "planning" | "remediation" => {
                let findings = self.findings_for(definition, execution).await;
                if findings.is_empty() {
                    return Ok(json!({
                        "stage": stage.name,
                        "status": "completed",
                        "message": "No findings for remediation planning",
                        "plans": [],
                    }));
                }
                let context = definition
                    .parameters
                    .get("context")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let code_context = definition
                    .parameters
                    .get("code_context")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let mut plans = Vec::with_capacity(findings.len());
                for finding in &findings {
                    plans.push(
                        agent
                            .create_remediation_plan(finding, &context, &code_context)
                            .await,
                    );
                }
                execution
                    .write()
                    .await
                    .artifacts
                    .insert("remediation_plans".to_string(), Value::Array(plans.clone()));
                Ok(json!({
                    "stage": stage.name,
                    "status": "completed",
                    "plans_count": plans.len(),
                    "plan_summary": summarize_remediation_plans(&plans),
                }))
            }
            _ => {
                let input = self.stage_input(definition, execution, stage).await;
                Ok(agent.execute_stage(&stage.name, &input).await)
            }
        }
    }

    async fn policy_stage(
        &self,
        definition: &WorkflowDefinition,
        execution: &Arc<RwLock<WorkflowExecution>>,
        stage: &Stage,
    ) -> Result<Value, String> {
        let agent = &self.agents.security_policy;
        match stage.name.as_str() {
            "initialization" => Ok(json!({"stage": stage.name, "status": "completed"})),
            "evaluation" | "policy" => {
                let target_data = definition
                    .parameters
                    .get("target_data")
                    .cloned()
                    .unwrap_or_else(|| json!({"id": definition.target_id}));
                let policy_context = definition
                    .parameters
                    .get("policy_context")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let evaluation = agent
                    .evaluate_policy_compliance(&target_data, &definition.target_type, &policy_context)
                    .await;
                execution
                    .write()
                    .await
                    .artifacts
                    .insert("policy_evaluation".to_string(), evaluation.clone());
                Ok(json!({
                    "stage": stage.name,
                    "status": "completed",
                    "evaluation_id": evaluation.get("evaluation_id").cloned(),
                    "compliance_status": evaluation.get("compliance_status").cloned(),
                    "gaps_count": evaluation
                        .get("compliance_gaps")
                        .and_then(Value::as_array)
                        .map(Vec::len)
                        .unwrap_or(0),
                    "recommendations_count": evaluation
                        .get("recommendations")
                        .and_then(Value::as_array)
                        .map(Vec::len)
                        .unwrap_or(0),
                }))
            }
            "recommendations" => {
                let evaluation = execution
                    .read()
                    .await
                    .artifacts
                    .get("policy_evaluation")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let policy_context = definition
                    .parameters
                    .get("policy_context")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let mut recommendations = Vec::new();
                for rec_type in PolicyRecommendationType::all() {
                    recommendations.push(
                        agent
                            .generate_policy_recommendation(&evaluation, Some(rec_type), &policy_context)
                            .await,
                    );
                }
                execution.write().await.artifacts.insert(
                    "policy_recommendations".to_string(),
                    Value::Array(recommendations.clone()),
                );
                Ok(json!({
                    "stage": stage.name,
                    "status": "completed",
                    "recommendations_count": recommendations.len(),
                    "recommendation_types": recommendations
                        .iter()
                        .filter_map(|r| r.get("recommendation_type").cloned())
                        .collect::<Vec<Value>>(),
                }))
            }
            _ => {
                let input = self.stage_input(definition, execution, stage).await;
                Ok(agent.execute_stage(&stage.name, &input).await)
            }
        }
    }

    async fn run_pattern_stage(
        &self,
        definition: &WorkflowDefinition,
        execution: &Arc<RwLock<WorkflowExecution>>,
        stage: &Stage,
    ) -> Result<Value, String> {
        let pattern_name = stage
            .communication_pattern
            .as_deref()
            .ok_or_else(|| format!("collaborative stage {} names no pattern", stage.name))?;
        let stage_input = self.stage_input(definition, execution, stage).await;
        let task = Task::new(
            format!("{}_{}", definition.workflow_id, stage.name),
            "collaborative_stage",
            stage.description.clone(),
            self.agent_id.clone(),
            stage.agents.first().cloned().unwrap_or_default(),
        )
        .with_parameters(stage_input.clone());

        match pattern_name {
            "chain_of_thought" => {
                let pattern = ChainOfThoughtPattern::new(self.bus.clone())
                    .with_config(self.pattern_settings.chain.clone());
                let outcome = pattern
                    .execute(&stage.agents[0], &stage.agents[1], &task, stage_input)
                    .await;
                serde_json::to_value(outcome).map_err(|e| e.to_string())
            }
            "debate" => {
                let pattern = DebatePattern::new(self.bus.clone())
                    .with_config(self.pattern_settings.debate.clone());
                let outcome = pattern
                    .execute(
                        &stage.agents[0],
                        &stage.agents[1],
                        stage.agents.get(2).map(String::as_str),
                        &stage.description,
                        Some(&task),
                    )
                    .await;
                serde_json::to_value(outcome).map_err(|e| e.to_string())
            }
            "feedback_loop" => {
                let pattern = FeedbackLoopPattern::new(self.bus.clone())
                    .with_config(self.pattern_settings.feedback.clone());
                let outcome = pattern
                    .execute(
                        &stage.agents[0],
                        &stage.agents[1],
                        &stage.description,
                        &stage.name,
                        Some(&task),
                    )
                    .await;
                serde_json::to_value(outcome).map_err(|e| e.to_string())
            }
            "parallel_reasoning" => {
                // The last listed agent coordinates; the rest analyze.
                let (coordinator, analysts) = stage
                    .agents
                    .split_last()
                    .ok_or_else(|| "parallel reasoning stage has no agents".to_string())?;
                let analysts: Vec<Analyst> =
                    analysts.iter().map(Analyst::new).collect();
                let pattern = ParallelReasoningPattern::new(self.bus.clone())
                    .with_config(self.pattern_settings.parallel.clone());
                let outcome = pattern
                    .execute(
                        &analysts,
                        coordinator,
                        &stage.description,
                        stage_input,
                        Some(&task),
                        ReasoningPriority::Medium,
                    )
                    .await
                    .map_err(|e| e.to_string())?;
                serde_json::to_value(outcome).map_err(|e| e.to_string())
            }
            other => Err(format!("communication pattern {} not found", other)),
        }
    }

    /// Findings for downstream stages: artifacts first, parameters second.
    async fn findings_for(
        &self,
        definition: &WorkflowDefinition,
        execution: &Arc<RwLock<WorkflowExecution>>,
    ) -> Vec<Value> {
        let from_artifacts = execution
            .read()
            .await
            .artifacts
            .get("findings")
            .and_then(Value::as_array)
            .cloned();
        match from_artifacts {
            Some(findings) if !findings.is_empty() => findings,
            _ => definition
                .parameters
                .get("findings")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        }
    }

    async fn stage_input(
        &self,
        definition: &WorkflowDefinition,
        execution: &Arc<RwLock<WorkflowExecution>>,
        stage: &Stage,
    ) -> Value {
        let exec = execution.read().await;
        let mut previous_results = Map::new();
        for (idx, result) in &exec.stage_results {
            if let Some(previous) = definition.stages.get(*idx) {
                previous_results.insert(previous.name.clone(), result.clone());
            }
        }
        json!({
            "workflow_id": definition.workflow_id,
            "stage_name": stage.name,
            "stage_description": stage.description,
            "target_id": definition.target_id,
            "target_type": definition.target_type,
            "parameters": definition.parameters,
            "previous_results": previous_results,
            "artifacts": exec.artifacts.clone().into_iter().collect::<Map<String, Value>>(),
        })
    }

    fn compile_results(definition: &WorkflowDefinition, exec: &WorkflowExecution) -> Value {
        let mut stage_results = Map::new();
        for (idx, result) in &exec.stage_results {
            if let Some(stage) = definition.stages.get(*idx) {
                stage_results.insert(stage.name.clone(), result.clone());
            }
        }

        let execution_time = match (exec.start_time, exec.completion_time) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        };

        let mut artifacts = Map::new();
        match definition.workflow_type {
            WorkflowType::GuidedAssessment | WorkflowType::TargetedAnalysis => {
                artifacts.insert(
                    "assessment_id".to_string(),
                    exec.artifacts.get("assessment_id").cloned().unwrap_or(Value::Null),
                );
            }
            WorkflowType::ExploitationVerification => {
                artifacts.insert(
                    "verifications".to_string(),
                    exec.artifacts
                        .get("verifications")
                        .cloned()
                        .unwrap_or_else(|| json!([])),
                );
            }
            WorkflowType::RemediationPlanning => {
                artifacts.insert(
                    "remediation_plans".to_string(),
                    exec.artifacts
                        .get("remediation_plans")
                        .cloned()
                        .unwrap_or_else(|| json!([])),
                );
            }
            WorkflowType::PolicyCompliance => {
                artifacts.insert(
                    "policy_evaluation".to_string(),
                    exec.artifacts
                        .get("policy_evaluation")
                        .cloned()
                        .unwrap_or_else(|| json!({})),
                );
                artifacts.insert(
                    "policy_recommendations".to_string(),
                    exec.artifacts
                        .get("policy_recommendations")
                        .cloned()
                        .unwrap_or_else(|| json!([])),
                );
            }
            WorkflowType::Comprehensive => {
                for (key, value) in &exec.artifacts {
                    artifacts.insert(key.clone(), value.clone());
                }
                artifacts
                    .entry("findings".to_string())
                    .or_insert_with(|| json!([]));
            }
        }

        json!({
            "workflow_id": definition.workflow_id,
            "workflow_type": definition.workflow_type,
            "target_id": definition.target_id,
            "target_type": definition.target_type,
            "status": exec.status.as_str(),
            "start_time": exec.start_time,
            "completion_time": exec.completion_time,
            "execution_time": execution_time,
            "stage_results": stage_results,
            "findings": exec.artifacts.get("findings").cloned().unwrap_or_else(|| json!([])),
            "artifacts": artifacts,
        })
    }

    fn emit_workflow_event(
        &self,
        definition: &WorkflowDefinition,
        status: WorkflowStatus,
        progress: f64,
        results: Option<Value>,
    ) {
        self.bus.emit(Event::broadcast(
            &self.agent_id,
            EventPayload::WorkflowStatus {
                workflow_id: definition.workflow_id.clone(),
                workflow_type: definition.workflow_type,
                status,
                progress,
                results,
            },
        ));
    }
}

/// Histogram of verification statuses plus the mean confidence.
pub fn summarize_verifications(verifications: &[Value]) -> Value {
    let mut by_status = Map::new();
    for status in [
        ExploitabilityStatus::Exploitable,
        ExploitabilityStatus::PotentiallyExploitable,
        ExploitabilityStatus::NotExploitable,
        ExploitabilityStatus::Undetermined,
    ] {
        by_status.insert(status.as_str().to_string(), json!(0));
    }
    let mut confidence_sum = 0.0;
    for verification in verifications {
        if let Some(status) = verification.get("status").and_then(Value::as_str) {
            if let Some(count) = by_status.get(status).and_then(Value::as_u64) {
                by_status.insert(status.to_string(), json!(count + 1));
            }
        }
        confidence_sum += verification
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
    }
    let average_confidence = if verifications.is_empty() {
        0.0
    } else {
        confidence_sum / verifications.len() as f64
    };
    json!({
        "total": verifications.len(),
        "by_status": by_status,
        "average_confidence": average_confidence,
    })
}

/// Histograms of remediation plan priorities and complexities.
pub fn summarize_remediation_plans(plans: &[Value]) -> Value {
    let mut by_priority = Map::new();
    for priority in [
        RemediationPriority::Critical,
        RemediationPriority::High,
        RemediationPriority::Medium,
        RemediationPriority::Low,
        RemediationPriority::Informational,
    ] {
        by_priority.insert(priority.as_str().to_string(), json!(0));
    }
    let mut by_complexity = Map::new();
    for complexity in [
        RemediationComplexity::Simple,
        RemediationComplexity::Moderate,
        RemediationComplexity::Complex,
        RemediationComplexity::Architectural,
    ] {
        by_complexity.insert(complexity.as_str().to_string(), json!(0));
    }
    for plan in plans {
        if let Some(priority) = plan.get("priority").and_then(Value::as_str) {
            if let Some(count) = by_priority.get(priority).and_then(Value::as_u64) {
                by_priority.insert(priority.to_string(), json!(count + 1));
            }
        }
        if let Some(complexity) = plan.get("complexity").and_then(Value::as_str) {
            if let Some(count) = by_complexity.get(complexity).and_then(Value::as_u64) {
                by_complexity.insert(complexity.to_string(), json!(count + 1));
            }
        }
    }
    json!({
        "total": plans.len(),
        "by_priority": by_priority,
        "by_complexity": by_complexity,
    })
}

#[async_trait]
impl Agent for WorkflowOrchestrator {
    fn id(&self) -> &str {
        &self.agent_id
    }

    fn name(&self) -> &str {
        "Workflow Orchestrator"
    }

    async fn handle_task(&self, task: &Task) -> TaskExecution {
        let outcome = match task.task_type.as_str() {
            "create_workflow" => {
                let Some(type_str) = task.param_str("workflow_type") else {
                    return TaskExecution::failed("missing required parameter: workflow_type");
                };
                let Ok(workflow_type) =
                    serde_json::from_value::<WorkflowType>(Value::String(type_str.to_string()))
                else {
                    return TaskExecution::failed(format!("unknown workflow type: {}", type_str));
                };
                let (Some(target_id), Some(target_type)) =
                    (task.param_str("target_id"), task.param_str("target_type"))
                else {
                    return TaskExecution::failed("missing required parameters: target_id, target_type");
                };
                self.create_workflow(
                    workflow_type,
                    target_id,
                    target_type,
                    task.param("parameters").cloned().unwrap_or_else(|| json!({})),
                    task.param_str("name").map(str::to_string),
                    task.param_str("description").map(str::to_string),
                )
                .await
            }
            "start_workflow" => match task.param_str("workflow_id") {
                Some(workflow_id) => self.start_workflow(workflow_id).await,
                None => return TaskExecution::failed("missing required parameter: workflow_id"),
            },
            "get_workflow_status" => match task.param_str("workflow_id") {
                Some(workflow_id) => self.get_workflow_status(workflow_id).await,
                None => return TaskExecution::failed("missing required parameter: workflow_id"),
            },
            "get_workflow_results" => match task.param_str("workflow_id") {
                Some(workflow_id) => self.get_workflow_results(workflow_id).await,
                None => return TaskExecution::failed("missing required parameter: workflow_id"),
            },
            other => return TaskExecution::failed(format!("unknown task type: {}", other)),
        };

        match outcome {
            Ok(value) => TaskExecution::completed(value),
            Err(err) => TaskExecution::failed(err.to_string()),
        }
    }
}
