//! Exploitation verification agent.
//!
//! Takes a finding and judges whether it is actually exploitable, producing
//! a verification record with an [`ExploitabilityStatus`], a confidence
//! score, a sketched exploitation path, and risk factors. Undecodable LLM
//! output degrades to [`ExploitabilityStatus::Undetermined`].

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

/// Verdict on whether a finding can actually be exploited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExploitabilityStatus {
    Exploitable,
    PotentiallyExploitable,
    NotExploitable,
    Undetermined,
}

impl ExploitabilityStatus {
    /// Parse the wire form; anything unrecognized is `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exploitable" => Some(Self::Exploitable),
            "potentially_exploitable" => Some(Self::PotentiallyExploitable),
            "not_exploitable" => Some(Self::NotExploitable),
            "undetermined" => Some(Self::Undetermined),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exploitable => "exploitable",
            Self::PotentiallyExploitable => "potentially_exploitable",
            Self::NotExploitable => "not_exploitable",
            Self::Undetermined => "undetermined",
        }
    }
}

/// Agent that verifies the exploitability of findings.
pub struct ExploitationVerificationAgent {
    agent_id: String,
    display_name: String,
    bus: Arc<EventBus>,
    client: Arc<dyn CompletionClient>,
    model: String,
    verifications: Arc<RwLock<HashMap<String, Value>>>,
}

impl ExploitationVerificationAgent {
    /// Create the agent with its default id (`exploitation_verification`).
    pub fn new(bus: Arc<EventBus>, client: Arc<dyn CompletionClient>) -> Self {
        let model = client.default_model().to_string();
        Self {
            agent_id: "exploitation_verification".to_string(),
            display_name: "Exploitation Verification Agent".to_string(),
            bus,
            client,
            model,
        verifications: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Override the completion model (builder pattern).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Verify whether a finding is exploitable in its context.
    ///
    /// Returns the stored verification record. The record always carries a
    /// valid status; parse failures yield `undetermined` with zeroed
    /// confidence.
    pub async fn verify_exploitability(&self, finding: &Value, context: &Value) -> Value {
        let verification_id = format!("verification_{}", Uuid::new_v4().simple());
        let finding_id = finding
            .get("finding_id")
            .or_else(|| finding.get("file_id"))
            .map(|v| v.to_string().trim_matches('"').to_string())
            .unwrap_or_else(|| "unknown".to_string());

        log::info!("verifying exploitability of finding {}", finding_id);

        let prompt = format!(
            "Assess whether the following vulnerability finding is exploitable in practice.\n\n\
             FINDING:\n{}\n\nCONTEXT:\n{}\n\n\
             Consider reachability, required privileges, input control, and existing mitigations.\n\
             Return a JSON object with these fields:\n\
             - status: one of exploitable, potentially_exploitable, not_exploitable, undetermined\n\
             - confidence: number between 0 and 1\n\
             - exploitation_path: array of strings describing the steps an attacker would take\n\
             - risk_factors: array of strings naming conditions that raise or lower the risk\n",
            serde_json::to_string_pretty(finding).unwrap_or_default(),
            serde_json::to_string_pretty(context).unwrap_or_default(),
        );

        let parsed = complete_json(&self.client, prompt, &self.model, 0.2, 1500).await;

        let (status, confidence, exploitation_path, risk_factors) = match parsed {
            Some(value) => {
                let status = value
                    .get("status")
                    .and_then(Value::as_str)
                    .and_then(ExploitabilityStatus::parse)
                    .unwrap_or(ExploitabilityStatus::Undetermined);
                let confidence = value
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
                    .clamp(0.0, 1.0);
                (
                    status,
                    confidence,
                    string_list(&value, "exploitation_path"),
                    string_list(&value, "risk_factors"),
                )
            }
            None => (ExploitabilityStatus::Undetermined, 0.0, Vec::new(), Vec::new()),
        };

        let verification = json!({
            "verification_id": verification_id,
            "finding_id": finding_id,
            "finding": finding,
            "status": status.as_str(),
            "confidence": confidence,
            "exploitation_path": exploitation_path,
            "risk_factors": risk_factors,
            "timestamp": Utc::now(),
        });

        self.verifications
            .write()
            .await
            .insert(verification_id.clone(), verification.clone());

        self.bus.emit(Event::broadcast(
            &self.agent_id,
            EventPayload::ExploitVerification {
                verification_id,
                finding_id,
                status,
                confidence,
            },
        ));

        verification
    }

    /// Look up a stored verification by id.
    pub async fn get_verification(&self, verification_id: &str) -> Option<Value> {
        self.verifications.read().await.get(verification_id).cloned()
    }
}

#[async_trait]
impl Agent for ExploitationVerificationAgent {
    fn id(&self) -> &str {
        &self.agent_id
    }

    fn name(&self) -> &str {
        &self.display_name
    }

    async fn handle_task(&self, task: &Task) -> TaskExecution {
        match task.task_type.as_str() {
            "verify_exploitability" => {
                let Some(finding) = task.param("finding") else {
                    return TaskExecution::failed("missing required parameter: finding");
                };
                let context = task
                    .param("context")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let verification = self.verify_exploitability(finding, &context).await;
                TaskExecution::completed(verification)
            }
            other => TaskExecution::failed(format!("unknown task type: {}", other)),
        }
    }
}
