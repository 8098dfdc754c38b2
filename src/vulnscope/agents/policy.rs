//! Security policy agent.
//!
//! Evaluates a finding or repository against applicable security policies
//! and generates policy recommendations. Compliance verdicts that cannot be
//! decoded from the LLM degrade to
//! [`ComplianceStatus::RequiresInvestigation`].

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

/// Compliance verdict for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
    PartiallyCompliant,
    RequiresInvestigation,
    NotApplicable,
}

impl ComplianceStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "compliant" => Some(Self::Compliant),
            "non_compliant" => Some(Self::NonCompliant),
            "partially_compliant" => Some(Self::PartiallyCompliant),
            "requires_investigation" => Some(Self::RequiresInvestigation),
            "not_applicable" => Some(Self::NotApplicable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::NonCompliant => "non_compliant",
            Self::PartiallyCompliant => "partially_compliant",
            Self::RequiresInvestigation => "requires_investigation",
            Self::NotApplicable => "not_applicable",
        }
    }
}

/// Kinds of policy recommendations the agent can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRecommendationType {
    NewPolicy,
    PolicyUpdate,
    ProcessImprovement,
    ControlImplementation,
    Training,
}

impl PolicyRecommendationType {
    /// Every recommendation type, in generation order.
    pub fn all() -> [PolicyRecommendationType; 5] {
        [
            Self::NewPolicy,
            Self::PolicyUpdate,
            Self::ProcessImprovement,
            Self::ControlImplementation,
            Self::Training,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewPolicy => "new_policy",
            Self::PolicyUpdate => "policy_update",
            Self::ProcessImprovement => "process_improvement",
            Self::ControlImplementation => "control_implementation",
            Self::Training => "training",
        }
    }
}

/// Agent that evaluates policy compliance and recommends policy changes.
pub struct SecurityPolicyAgent {
    agent_id: String,
    display_name: String,
    bus: Arc<EventBus>,
    client: Arc<dyn CompletionClient>,
    model: String,
    evaluations: Arc<RwLock<HashMap<String, Value>>>,
    recommendations: Arc<RwLock<HashMap<String, Value>>>,
}

impl SecurityPolicyAgent {
    /// Create the agent with its default id (`security_policy`).
    pub fn new(bus: Arc<EventBus>, client: Arc<dyn CompletionClient>) -> Self {
        let model = client.default_model().to_string();
        Self {
            agent_id: "security_policy".to_string(),
            display_name: "Security Policy Agent".to_string(),
            bus,
            client,
            model,
            evaluations: Arc::new(RwLock::new(HashMap::new())),
            recommendations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Override the completion model (builder pattern).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Evaluate policy compliance for a finding or repository.
    pub async fn evaluate_policy_compliance(
        &self,
        target: &Value,
        target_type: &str,
        policy_context: &Value,
    ) -> Value {
        let evaluation_id = format!("policy_eval_{}", Uuid::new_v4().simple());
        let target_id = target
            .get("file_id")
            .or_else(|| target.get("finding_id"))
            .or_else(|| target.get("id"))
            .map(|v| v.to_string().trim_matches('"').to_string())
            .unwrap_or_else(|| "unknown".to_string());

        log::info!(
            "evaluating policy compliance for {} {}",
            target_type,
            target_id
        );

        let prompt = format!(
            "Evaluate the following {} against applicable security policies.\n\n\
             TARGET:\n{}\n\nPOLICY CONTEXT:\n{}\n\n\
             Return a JSON object with these fields:\n\
             - compliance_status: one of compliant, non_compliant, partially_compliant, requires_investigation, not_applicable\n\
             - compliance_gaps: array of objects with description and policy fields\n\
             - recommendations: array of strings\n\
             - policy_references: array of strings naming the policies considered\n",
            target_type,
            serde_json::to_string_pretty(target).unwrap_or_default(),
            serde_json::to_string_pretty(policy_context).unwrap_or_default(),
        );

        let parsed = complete_json(&self.client, prompt, &self.model, 0.2, 2000).await;

        let (compliance_status, gaps, recommendations, policy_references) = match parsed {
            Some(value) => {
                let status = value
                    .get("compliance_status")
                    .and_then(Value::as_str)
                    .and_then(ComplianceStatus::parse)
                    .unwrap_or(ComplianceStatus::RequiresInvestigation);
                let gaps = value
                    .get("compliance_gaps")
                    .cloned()
                    .unwrap_or_else(|| json!([]));
                (
                    status,
                    gaps,
                    string_list(&value, "recommendations"),
                    string_list(&value, "policy_references"),
                )
            }
            None => (
                ComplianceStatus::RequiresInvestigation,
                json!([]),
                Vec::new(),
                Vec::new(),
            ),
        };

        let evaluation = json!({
            "evaluation_id": evaluation_id,
            "target_id": target_id,
            "target_type": target_type,
            "target": target,
            "policy_context": policy_context,
            "compliance_status": compliance_status.as_str(),
            "compliance_gaps": gaps,
            "recommendations": recommendations,
            "policy_references": policy_references,
            "timestamp": Utc::now(),
        });

        self.evaluations
            .write()
            .await
            .insert(evaluation_id.clone(), evaluation.clone());

        self.bus.emit(Event::broadcast(
            &self.agent_id,
            EventPayload::PolicyEvaluation {
                evaluation_id,
                target_type: target_type.to_string(),
                compliance_status,
            },
        ));

        evaluation
    }

    /// Generate one policy recommendation from an evaluation or other input.
    ///
    /// When no type is given it is inferred from the language of the
    /// evaluation's gaps, defaulting to a policy update.
    pub async fn generate_policy_recommendation(
        &self,
        input_data: &Value,
        recommendation_type: Option<PolicyRecommendationType>,
        policy_context: &Value,
    ) -> Value {
        let recommendation_id = format!("policy_rec_{}", Uuid::new_v4().simple());
        let recommendation_type =
            recommendation_type.unwrap_or_else(|| Self::infer_recommendation_type(input_data));

        log::info!(
            "generating {} policy recommendation",
            recommendation_type.as_str()
        );

        let prompt = format!(
            "Generate a {} security policy recommendation from the following input.\n\n\
             INPUT:\n{}\n\nPOLICY CONTEXT:\n{}\n\n\
             Return a JSON object with these fields:\n\
             - title: short recommendation title\n\
             - description: what should change\n\
             - justification: why the change matters\n\
             - implementation_steps: array of strings\n\
             - policy_references: array of strings\n",
            recommendation_type.as_str(),
            serde_json::to_string_pretty(input_data).unwrap_or_default(),
            serde_json::to_string_pretty(policy_context).unwrap_or_default(),
        );

        let parsed = complete_json(&self.client, prompt, &self.model, 0.3, 2000).await;

        let body = match parsed {
            Some(value) => json!({
                "title": value.get("title").cloned().unwrap_or_else(|| json!("Policy recommendation")),
                "description": value.get("description").cloned().unwrap_or_else(|| json!("")),
                "justification": value.get("justification").cloned().unwrap_or_else(|| json!("")),
                "implementation_steps": string_list(&value, "implementation_steps"),
                "policy_references": string_list(&value, "policy_references"),
            }),
            None => json!({
                "title": "Policy recommendation",
                "description": "Recommendation generation failed; manual review required",
                "justification": "",
                "implementation_steps": [],
                "policy_references": [],
            }),
        };

        let mut recommendation = json!({
            "recommendation_id": recommendation_id,
            "recommendation_type": recommendation_type.as_str(),
            "input_data": input_data,
            "policy_context": policy_context,
            "timestamp": Utc::now(),
        });
        if let (Some(target), Some(fields)) = (recommendation.as_object_mut(), body.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }

        self.recommendations
            .write()
            .await
            .insert(recommendation_id.clone(), recommendation.clone());

        self.bus.emit(Event::broadcast(
            &self.agent_id,
            EventPayload::PolicyRecommendation {
                recommendation_id,
                recommendation_type,
            },
        ));

        recommendation
    }

    /// Look up a stored evaluation by id.
    pub async fn get_policy_evaluation(&self, evaluation_id: &str) -> Option<Value> {
        self.evaluations.read().await.get(evaluation_id).cloned()
    }

    /// Look up a stored recommendation by id.
    pub async fn get_policy_recommendation(&self, recommendation_id: &str) -> Option<Value> {
        self.recommendations
            .read()
            .await
            .get(recommendation_id)
            .cloned()
    }

    fn infer_recommendation_type(input_data: &Value) -> PolicyRecommendationType {
        let gaps = input_data
            .get("compliance_gaps")
            .or_else(|| input_data.get("gaps"))
            .and_then(Value::as_array);
        let Some(gaps) = gaps else {
            return PolicyRecommendationType::PolicyUpdate;
        };
        let gap_mentions = |needle: &str| {
            gaps.iter().any(|gap| {
                gap.get("description")
                    .and_then(Value::as_str)
                    .map(|d| d.to_lowercase().contains(needle))
                    .unwrap_or(false)
            })
        };
        if gap_mentions("missing policy") {
            PolicyRecommendationType::NewPolicy
        } else if gap_mentions("implementation") {
            PolicyRecommendationType::ControlImplementation
        } else if gap_mentions("process") {
            PolicyRecommendationType::ProcessImprovement
        } else if gap_mentions("training") {
            PolicyRecommendationType::Training
        } else {
            PolicyRecommendationType::PolicyUpdate
        }
    }
}

#[async_trait]
impl Agent for SecurityPolicyAgent {
    fn id(&self) -> &str {
        &self.agent_id
    }

    fn name(&self) -> &str {
        &self.display_name
    }

    async fn handle_task(&self, task: &Task) -> TaskExecution {
        match task.task_type.as_str() {
            "evaluate_policy_compliance" | "policy_evaluation" => {
                let Some(target) = task.param("target") else {
                    return TaskExecution::failed("missing required parameter: target");
                };
                let target_type = task.param_str("target_type").unwrap_or("finding").to_string();
                let policy_context = task
                    .param("policy_context")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let evaluation = self
                    .evaluate_policy_compliance(target, &target_type, &policy_context)
                    .await;
                TaskExecution::completed(evaluation)
            }
            "generate_policy_recommendation" => {
                let input = task.param("input").cloned().unwrap_or_else(|| json!({}));
                let policy_context = task
                    .param("policy_context")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let recommendation = self
                    .generate_policy_recommendation(&input, None, &policy_context)
                    .await;
                TaskExecution::completed(recommendation)
            }
            other => TaskExecution::failed(format!("unknown task type: {}", other)),
        }
    }
}
