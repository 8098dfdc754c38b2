//! Remediation planning agent.
//!
//! Produces a remediation plan for a finding: priority, implementation
//! complexity, concrete steps, before/after code changes, an effort
//! estimate, expected challenges, and preventive best practices. When the
//! LLM's JSON cannot be decoded the agent substitutes a generic plan with
//! `medium` priority and `moderate` complexity rather than failing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::vulnscope::agent::{Agent, TaskExecution};
use crate::vulnscope::agents::{complete_json, string_list};
use crate::vulnscope::client::CompletionClient;
use crate::vulnscope::event::{Event, EventBus, EventPayload};
use crate::vulnscope::task::Task;

/// Urgency of applying a remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationPriority {
    Critical,
    High,
    Medium,
    Low,
    Informational,
}

impl RemediationPriority {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "informational" => Some(Self::Informational),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Informational => "informational",
        }
    }
}

/// Implementation complexity of a remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationComplexity {
    Simple,
    Moderate,
    Complex,
    Architectural,
}

impl RemediationComplexity {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "simple" => Some(Self::Simple),
            "moderate" => Some(Self::Moderate),
            "complex" => Some(Self::Complex),
            "architectural" => Some(Self::Architectural),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::Architectural => "architectural",
        }
    }
}

/// Agent that plans remediations for findings.
pub struct RemediationPlanningAgent {
    agent_id: String,
    display_name: String,
    bus: Arc<EventBus>,
    client: Arc<dyn CompletionClient>,
    model: String,
    plans: Arc<RwLock<HashMap<String, Value>>>,
}

impl RemediationPlanningAgent {
    /// Create the agent with its default id (`remediation_planning`).
    pub fn new(bus: Arc<EventBus>, client: Arc<dyn CompletionClient>) -> Self {
        let model = client.default_model().to_string();
        Self {
            agent_id: "remediation_planning".to_string(),
            display_name: "Remediation Planning Agent".to_string(),
            bus,
            client,
            model,
            plans: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Override the completion model (builder pattern).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Create a remediation plan for one finding.
    pub async fn create_remediation_plan(
        &self,
        finding: &Value,
        context: &Value,
        code_context: &Value,
    ) -> Value {
        let plan_id = format!("remediation_{}", Uuid::new_v4().simple());
        let finding_id = finding
            .get("finding_id")
            .or_else(|| finding.get("file_id"))
            .map(|v| v.to_string().trim_matches('"').to_string())
            .unwrap_or_else(|| "unknown".to_string());

        log::info!("creating remediation plan for finding {}", finding_id);

        let prompt = format!(
            "Create a detailed remediation plan for the following vulnerability finding.\n\n\
             FINDING:\n{}\n\nCONTEXT:\n{}\n\nCODE CONTEXT:\n{}\n\n\
             Return a JSON object with these fields:\n\
             - priority: one of critical, high, medium, low, informational\n\
             - complexity: one of simple, moderate, complex, architectural\n\
             - steps: array of objects with description and explanation fields\n\
             - code_changes: object with before and after code examples\n\
             - estimated_effort: estimated implementation time\n\
             - challenges: array of potential challenges or side effects\n\
             - best_practices: array of practices that prevent similar issues\n",
            serde_json::to_string_pretty(finding).unwrap_or_default(),
            serde_json::to_string_pretty(context).unwrap_or_default(),
            serde_json::to_string_pretty(code_context).unwrap_or_default(),
        );

        let parsed = complete_json(&self.client, prompt, &self.model, 0.2, 2500).await;

        let plan_body = match parsed {
            Some(value) => {
                let priority = value
                    .get("priority")
                    .and_then(Value::as_str)
                    .and_then(RemediationPriority::parse)
                    .unwrap_or(RemediationPriority::Medium);
                let complexity = value
                    .get("complexity")
                    .and_then(Value::as_str)
                    .and_then(RemediationComplexity::parse)
                    .unwrap_or(RemediationComplexity::Moderate);
                json!({
                    "priority": priority.as_str(),
                    "complexity": complexity.as_str(),
                    "steps": value.get("steps").cloned().unwrap_or_else(|| json!([])),
                    "code_changes": value.get("code_changes").cloned().unwrap_or_else(|| json!({})),
                    "estimated_effort": value.get("estimated_effort").cloned().unwrap_or_else(|| json!("Unknown")),
                    "challenges": string_list(&value, "challenges"),
                    "best_practices": string_list(&value, "best_practices"),
                })
            }
            None => json!({
                "priority": RemediationPriority::Medium.as_str(),
                "complexity": RemediationComplexity::Moderate.as_str(),
                "steps": [
                    {
                        "description": "Review vulnerability details",
                        "explanation": "Analyze the finding to understand the underlying issue",
                    },
                    {
                        "description": "Apply fixes following secure coding practices",
                        "explanation": "Plan generation failed; generic guidance provided",
                    },
                ],
                "code_changes": {},
                "estimated_effort": "Unknown (plan generation failed)",
                "challenges": ["Plan generation error"],
                "best_practices": ["Follow secure coding guidelines"],
            }),
        };

        let mut plan = json!({
            "plan_id": plan_id,
            "finding_id": finding_id,
            "finding": finding,
            "context": context,
            "code_context": code_context,
            "timestamp": Utc::now(),
        });
        if let (Some(target), Some(body)) = (plan.as_object_mut(), plan_body.as_object()) {
            for (key, value) in body {
                target.insert(key.clone(), value.clone());
            }
        }

        self.plans.write().await.insert(plan_id.clone(), plan.clone());

        let priority = plan
            .get("priority")
            .and_then(Value::as_str)
            .and_then(RemediationPriority::parse)
            .unwrap_or(RemediationPriority::Medium);
        let complexity = plan
            .get("complexity")
            .and_then(Value::as_str)
            .and_then(RemediationComplexity::parse)
            .unwrap_or(RemediationComplexity::Moderate);

        self.bus.emit(Event::broadcast(
            &self.agent_id,
            EventPayload::RemediationPlan {
                plan_id,
                finding_id,
                priority,
                complexity,
            },
        ));

        plan
    }

    /// Look up a stored plan by id.
    pub async fn get_remediation_plan(&self, plan_id: &str) -> Option<Value> {
        self.plans.read().await.get(plan_id).cloned()
    }

    /// All stored plans for a given finding id.
    pub async fn get_remediation_plans_by_finding(&self, finding_id: &str) -> Vec<Value> {
        self.plans
            .read()
            .await
            .values()
            .filter(|plan| {
                plan.get("finding_id").and_then(Value::as_str) == Some(finding_id)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Agent for RemediationPlanningAgent {
    fn id(&self) -> &str {
        &self.agent_id
    }

    fn name(&self) -> &str {
        &self.display_name
    }

    async fn handle_task(&self, task: &Task) -> TaskExecution {
        match task.task_type.as_str() {
            "create_remediation_plan" | "remediation_planning" => {
                let Some(finding) = task.param("finding") else {
                    return TaskExecution::failed("missing required parameter: finding");
                };
                let context = task.param("context").cloned().unwrap_or_else(|| json!({}));
                let code_context = task
                    .param("code_context")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let plan = self
                    .create_remediation_plan(finding, &context, &code_context)
                    .await;
                TaskExecution::completed(plan)
            }
            other => TaskExecution::failed(format!("unknown task type: {}", other)),
        }
    }
}
