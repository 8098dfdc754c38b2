//! Workflow definitions: types, stage graphs, validation, and the built-in
//! per-type stage templates.
//!
//! A workflow is a DAG of [`Stage`]s. A stage names either one agent or a
//! list of agents plus a communication pattern, and may depend on other
//! stages by name. Validation happens at creation time: stage names must be
//! unique, every dependency must resolve, a topological order must exist,
//! and multi-agent stages must carry a known pattern name. The executor
//! never sees an invalid graph.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Types of vulnerability assessment workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    GuidedAssessment,
    TargetedAnalysis,
    ExploitationVerification,
    RemediationPlanning,
    PolicyCompliance,
    Comprehensive,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GuidedAssessment => "guided_assessment",
            Self::TargetedAnalysis => "targeted_analysis",
            Self::ExploitationVerification => "exploitation_verification",
            Self::RemediationPlanning => "remediation_planning",
            Self::PolicyCompliance => "policy_compliance",
            Self::Comprehensive => "comprehensive",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Initializing,
    Running,
    Paused,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One node of a workflow's stage DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Unique name within the workflow.
    pub name: String,
    /// Single executing agent; absent for multi-agent stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Participating agents for collaborative stages (two or more).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<String>,
    /// What the stage does.
    #[serde(default)]
    pub description: String,
    /// Communication pattern name; required when `agents` has two or more
    /// entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communication_pattern: Option<String>,
    /// Names of stages that must complete before this one runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl Stage {
    /// A single-agent stage.
    pub fn single(
        name: impl Into<String>,
        agent: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            agent: Some(agent.into()),
            agents: Vec::new(),
            description: description.into(),
            communication_pattern: None,
            dependencies: Vec::new(),
        }
    }

    /// A collaborative stage over several agents and a pattern.
    pub fn collaborative(
        name: impl Into<String>,
        agents: Vec<String>,
        pattern: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            agent: None,
            agents,
            description: description.into(),
            communication_pattern: Some(pattern.into()),
            dependencies: Vec::new(),
        }
    }

    /// Add dependencies by stage name (builder pattern).
    pub fn depends_on(mut self, dependencies: &[&str]) -> Self {
        self.dependencies
            .extend(dependencies.iter().map(|d| d.to_string()));
        self
    }

    /// True when the stage runs a communication pattern over several agents.
    pub fn is_collaborative(&self) -> bool {
        self.agents.len() >= 2
    }
}

/// Immutable workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_id: String,
    pub workflow_type: WorkflowType,
    pub name: String,
    pub description: String,
    pub target_id: String,
    pub target_type: String,
    pub parameters: Value,
    pub agents: Vec<String>,
    pub stages: Vec<Stage>,
    pub communication_patterns: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Mutable per-run state of a workflow.
#[derive(Debug, Clone)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub current_stage: usize,
    /// Stage results keyed by stage index. Each index appears at most once
    /// per run.
    pub stage_results: BTreeMap<usize, Value>,
    pub progress: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Named values produced by stages for downstream consumption.
    pub artifacts: BTreeMap<String, Value>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Initializing,
            current_stage: 0,
            stage_results: BTreeMap::new(),
            progress: 0.0,
            start_time: None,
            completion_time: None,
            error: None,
            artifacts: BTreeMap::new(),
        }
    }
}

/// Errors raised by workflow creation and control-plane calls.
#[derive(Debug)]
pub enum WorkflowError {
    /// No workflow with the given id.
    NotFound(String),
    /// The workflow is not in a state that permits the operation.
    InvalidState { workflow_id: String, status: WorkflowStatus },
    /// The stage graph is structurally invalid.
    InvalidDefinition(String),
    /// A stage references an unregistered agent.
    AgentNotFound(String),
    /// A collaborative stage references an unknown pattern.
    PatternNotFound(String),
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::NotFound(id) => write!(f, "workflow not found: {}", id),
            WorkflowError::InvalidState { workflow_id, status } => write!(
                f,
                "workflow {} is in state {} which does not permit this operation",
                workflow_id,
                status.as_str()
            ),
            WorkflowError::InvalidDefinition(msg) => write!(f, "invalid workflow: {}", msg),
            WorkflowError::AgentNotFound(name) => write!(f, "agent not found: {}", name),
            WorkflowError::PatternNotFound(name) => {
                write!(f, "communication pattern not found: {}", name)
            }
        }
    }
}

impl Error for WorkflowError {}

/// The communication pattern names the engine ships.
pub const KNOWN_PATTERNS: [&str; 4] = [
    "chain_of_thought",
    "debate",
    "feedback_loop",
    "parallel_reasoning",
];

/// Validate a stage graph: unique names, resolvable dependencies, no
/// cycles, and a pattern on every collaborative stage.
pub fn validate_stage_graph(stages: &[Stage]) -> Result<(), WorkflowError> {
    if stages.is_empty() {
        return Err(WorkflowError::InvalidDefinition(
            "workflow has no stages".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for stage in stages {
        if !names.insert(stage.name.as_str()) {
            return Err(WorkflowError::InvalidDefinition(format!(
                "duplicate stage name: {}",
                stage.name
            )));
        }
        if stage.agent.is_none() && stage.agents.len() < 2 {
            return Err(WorkflowError::InvalidDefinition(format!(
                "stage {} names no agent",
                stage.name
            )));
        }
        if stage.is_collaborative() {
            match &stage.communication_pattern {
                Some(pattern) if KNOWN_PATTERNS.contains(&pattern.as_str()) => {}
                Some(pattern) => return Err(WorkflowError::PatternNotFound(pattern.clone())),
                None => {
                    return Err(WorkflowError::InvalidDefinition(format!(
                        "collaborative stage {} names no communication pattern",
                        stage.name
                    )))
                }
            }
        }
    }

    for stage in stages {
        for dependency in &stage.dependencies {
            if !names.contains(dependency.as_str()) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "stage {} depends on unknown stage {}",
                    stage.name, dependency
                )));
            }
        }
    }

    // Kahn's algorithm; leftovers mean a cycle.
    let index_of: HashMap<&str, usize> = stages
        .iter()
        .enumerate()
        .map(|(idx, stage)| (stage.name.as_str(), idx))
        .collect();
    let mut in_degree = vec![0usize; stages.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
    for (idx, stage) in stages.iter().enumerate() {
        for dependency in &stage.dependencies {
            let dep_idx = index_of[dependency.as_str()];
            in_degree[idx] += 1;
            dependents[dep_idx].push(idx);
        }
    }
    let mut frontier: Vec<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(idx, _)| idx)
        .collect();
    let mut visited = 0usize;
    while let Some(idx) = frontier.pop() {
        visited += 1;
        for &dependent in &dependents[idx] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                frontier.push(dependent);
            }
        }
    }
    if visited != stages.len() {
        return Err(WorkflowError::InvalidDefinition(
            "stage dependency cycle detected".to_string(),
        ));
    }

    Ok(())
}

/// Components generated for one workflow type: the required agents, the
/// stage graph, and the communication patterns it may use.
pub struct WorkflowComponents {
    pub agents: Vec<String>,
    pub stages: Vec<Stage>,
    pub communication_patterns: Vec<String>,
}

/// Built-in stage templates per workflow type.
pub fn workflow_components(workflow_type: WorkflowType, _parameters: &Value) -> WorkflowComponents {
    match workflow_type {
        WorkflowType::GuidedAssessment | WorkflowType::TargetedAnalysis => WorkflowComponents {
            agents: vec!["guided_assessment".into()],
            stages: vec![
                Stage::single(
                    "initialization",
                    "guided_assessment",
                    "Initialize the guided assessment",
                ),
                Stage::single(
                    "assessment",
                    "guided_assessment",
                    "Perform the guided vulnerability assessment",
                )
                .depends_on(&["initialization"]),
                Stage::single(
                    "reporting",
                    "guided_assessment",
                    "Generate the assessment report",
                )
                .depends_on(&["assessment"]),
            ],
            communication_patterns: vec!["chain_of_thought".into()],
        },
        WorkflowType::ExploitationVerification => WorkflowComponents {
            agents: vec!["exploitation_verification".into()],
            stages: vec![
                Stage::single(
                    "initialization",
                    "exploitation_verification",
                    "Initialize exploitation verification",
                ),
                Stage::single(
                    "analysis",
                    "exploitation_verification",
                    "Analyze vulnerability exploitability",
                )
                .depends_on(&["initialization"]),
                Stage::single(
                    "reporting",
                    "exploitation_verification",
                    "Generate the exploitation report",
                )
                .depends_on(&["analysis"]),
            ],
            communication_patterns: vec!["chain_of_thought".into()],
        },
        WorkflowType::RemediationPlanning => WorkflowComponents {
            agents: vec!["remediation_planning".into()],
            stages: vec![
                Stage::single(
                    "initialization",
                    "remediation_planning",
                    "Initialize remediation planning",
                ),
                Stage::single(
                    "analysis",
                    "remediation_planning",
                    "Develop the remediation strategy",
                )
                .depends_on(&["initialization"]),
                Stage::single(
                    "planning",
                    "remediation_planning",
                    "Create detailed remediation plans",
                )
                .depends_on(&["analysis"]),
            ],
            communication_patterns: vec!["chain_of_thought".into()],
        },
        WorkflowType::PolicyCompliance => WorkflowComponents {
            agents: vec!["security_policy".into()],
            stages: vec![
                Stage::single(
                    "initialization",
                    "security_policy",
                    "Initialize the policy evaluation",
                ),
                Stage::single(
                    "evaluation",
                    "security_policy",
                    "Evaluate policy compliance",
                )
                .depends_on(&["initialization"]),
                Stage::single(
                    "recommendations",
                    "security_policy",
                    "Generate policy recommendations",
                )
                .depends_on(&["evaluation"]),
            ],
            communication_patterns: vec!["chain_of_thought".into()],
        },
        WorkflowType::Comprehensive => WorkflowComponents {
            agents: vec![
                "guided_assessment".into(),
                "exploitation_verification".into(),
                "remediation_planning".into(),
                "security_policy".into(),
            ],
            stages: vec![
                Stage::single(
                    "initialization",
                    "guided_assessment",
                    "Initialize the comprehensive assessment",
                ),
                Stage::single(
                    "assessment",
                    "guided_assessment",
                    "Perform the guided vulnerability assessment",
                )
                .depends_on(&["initialization"]),
                Stage::single(
                    "exploitation",
                    "exploitation_verification",
                    "Verify exploitability of findings",
                )
                .depends_on(&["assessment"]),
                Stage::single(
                    "remediation",
                    "remediation_planning",
                    "Develop remediation plans",
                )
                .depends_on(&["assessment", "exploitation"]),
                Stage::single("policy", "security_policy", "Evaluate policy compliance")
                    .depends_on(&["assessment"]),
                Stage::collaborative(
                    "collaborative_analysis",
                    vec![
                        "exploitation_verification".into(),
                        "remediation_planning".into(),
                        "security_policy".into(),
                    ],
                    "debate",
                    "Collaborative analysis of findings",
                )
                .depends_on(&["exploitation", "remediation", "policy"]),
                Stage::single(
                    "reporting",
                    "guided_assessment",
                    "Generate the comprehensive report",
                )
                .depends_on(&["collaborative_analysis"]),
            ],
            communication_patterns: KNOWN_PATTERNS.iter().map(|p| p.to_string()).collect(),
        },
    }
}

/// Default name and description for a generated workflow.
pub fn default_workflow_labels(
    workflow_type: WorkflowType,
    target_id: &str,
    target_type: &str,
) -> (String, String) {
    let pretty = workflow_type.as_str().replace('_', " ");
    (
        format!("{} workflow", pretty),
        format!(
            "Automated {} workflow for {} {}",
            pretty, target_type, target_id
        ),
    )
}

/// Serialize a definition summary for control-plane responses.
pub fn definition_summary(definition: &WorkflowDefinition) -> Value {
    json!({
        "workflow_id": definition.workflow_id,
        "name": definition.name,
        "description": definition.description,
        "workflow_type": definition.workflow_type,
        "target_id": definition.target_id,
        "target_type": definition.target_type,
        "stages": definition.stages.len(),
        "agents": definition.agents,
        "status": "created",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_stage_names() {
        let stages = vec![
            Stage::single("a", "guided_assessment", ""),
            Stage::single("a", "guided_assessment", ""),
        ];
        assert!(matches!(
            validate_stage_graph(&stages),
            Err(WorkflowError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let stages = vec![Stage::single("a", "guided_assessment", "").depends_on(&["missing"])];
        assert!(validate_stage_graph(&stages).is_err());
    }

    #[test]
    fn rejects_cycles() {
        let stages = vec![
            Stage::single("a", "guided_assessment", "").depends_on(&["b"]),
            Stage::single("b", "guided_assessment", "").depends_on(&["a"]),
        ];
        assert!(validate_stage_graph(&stages).is_err());
    }

    #[test]
    fn accepts_diamond() {
        let stages = vec![
            Stage::single("a", "guided_assessment", ""),
            Stage::single("b", "guided_assessment", "").depends_on(&["a"]),
            Stage::single("c", "guided_assessment", "").depends_on(&["a"]),
            Stage::single("d", "guided_assessment", "").depends_on(&["b", "c"]),
        ];
        assert!(validate_stage_graph(&stages).is_ok());
    }

    #[test]
    fn every_template_validates() {
        for workflow_type in [
            WorkflowType::GuidedAssessment,
            WorkflowType::TargetedAnalysis,
            WorkflowType::ExploitationVerification,
            WorkflowType::RemediationPlanning,
            WorkflowType::PolicyCompliance,
            WorkflowType::Comprehensive,
        ] {
            let components = workflow_components(workflow_type, &json!({}));
            validate_stage_graph(&components.stages).unwrap();
        }
    }
}
