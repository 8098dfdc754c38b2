//! Specialized domain agents.
//!
//! Four stateful agents share one shape: build a structured prompt from the
//! inputs and the known taxonomy, demand a JSON completion, parse it into a
//! typed record substituting documented defaults on any parse failure, store
//! the record under a generated id, emit the matching domain event, and
//! return the record. Parse failures never escape as errors.

use serde_json::Value;
use std::sync::Arc;

use crate::vulnscope::client::{CompletionClient, CompletionRequest};

pub mod assessment;
pub mod exploitation;
pub mod policy;
pub mod remediation;

pub use assessment::GuidedAssessmentAgent;
pub use exploitation::ExploitationVerificationAgent;
pub use policy::SecurityPolicyAgent;
pub use remediation::RemediationPlanningAgent;

/// Run a JSON completion and parse the first choice.
///
/// Returns `None` on transport failure or undecodable output; callers fall
/// back to their documented defaults.
pub(crate) async fn complete_json(
    client: &Arc<dyn CompletionClient>,
    prompt: String,
    model: &str,
    temperature: f32,
    max_tokens: u32,
) -> Option<Value> {
    let request = CompletionRequest::new(prompt, model)
        .with_temperature(temperature)
        .with_max_tokens(max_tokens)
        .expecting_json();

    let response = match client.create_completion(request).await {
        Ok(response) => response,
        Err(err) => {
            log::error!("completion call failed: {}", err);
            return None;
        }
    };

    match serde_json::from_str::<Value>(response.text().trim()) {
        Ok(value) => Some(value),
        Err(err) => {
            log::error!("failed to parse completion as JSON: {}", err);
            None
        }
    }
}

/// Pull a string array out of a parsed JSON object, tolerating absence.
pub(crate) fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
