//! Chain-of-thought coordination.
//!
//! One agent reasons in numbered steps; another observes. The pattern seeds
//! the chain with step 1, then collects every further
//! [`CognitiveStep`](crate::event::EventPayload::CognitiveStep) carrying the
//! same chain id until a conclusion arrives, the step limit is reached, or
//! the aggregate deadline (`max_steps * step_timeout`) elapses.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use uuid::Uuid;

use crate::vulnscope::event::{Event, EventBus, EventKind, EventPayload, SubscriptionGuard};
use crate::vulnscope::task::Task;

/// Tuning knobs for [`ChainOfThoughtPattern`].
#[derive(Debug, Clone)]
pub struct ChainOfThoughtConfig {
    /// Maximum number of reasoning steps.
    pub max_steps: u32,
    /// Per-step time budget; the aggregate deadline is
    /// `max_steps * step_timeout`.
    pub step_timeout: Duration,
}

impl Default for ChainOfThoughtConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            step_timeout: Duration::from_secs(30),
        }
    }
}

/// One recorded reasoning step.
#[derive(Debug, Clone, Serialize)]
pub struct ChainStep {
    pub step_number: u32,
    pub reasoning: String,
    pub sender_id: String,
    pub is_conclusion: bool,
    pub timestamp: DateTime<Utc>,
}

/// Result of one chain-of-thought run.
#[derive(Debug, Clone, Serialize)]
pub struct ChainOutcome {
    pub chain_id: String,
    pub task_id: String,
    /// Steps ordered by step number.
    pub steps: Vec<ChainStep>,
    /// Reasoning text of the concluding step, or of the highest-numbered
    /// step when the chain ended on the step limit.
    pub result: Option<String>,
    /// Step number of the most recently received step.
    pub completed_steps: u32,
    /// True when the aggregate deadline elapsed first.
    pub timed_out: bool,
}

/// Coordinates a single agent's visible step-by-step reasoning.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use vulnscope::event::EventBus;
/// use vulnscope::patterns::ChainOfThoughtPattern;
/// use vulnscope::task::Task;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = Arc::new(EventBus::new());
/// let pattern = ChainOfThoughtPattern::new(bus.clone());
/// let task = Task::new("t1", "analyze", "Analyze the login flow", "orc", "analyst");
///
/// let outcome = pattern
///     .execute("orchestrator", "analyst", &task, serde_json::json!({}))
///     .await;
/// println!("{} steps, result: {:?}", outcome.completed_steps, outcome.result);
/// # }
/// ```
pub struct ChainOfThoughtPattern {
    bus: Arc<EventBus>,
    config: ChainOfThoughtConfig,
}

impl ChainOfThoughtPattern {
    /// Create a pattern with default limits (5 steps, 30 s each).
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            config: ChainOfThoughtConfig::default(),
        }
    }

    /// Override the limits (builder pattern).
    pub fn with_config(mut self, config: ChainOfThoughtConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one reasoning chain from `initial_agent` toward `target_agent`.
    ///
    /// Handlers are scoped to the generated chain id and removed on every
    /// exit path. Out-of-order steps are stored by step number; the first
    /// conclusion-flagged step wins as the result.
    pub async fn execute(
        &self,
        initial_agent: &str,
        target_agent: &str,
        task: &Task,
        context: Value,
    ) -> ChainOutcome {
        let chain_id = format!("{}_{}", task.id, Uuid::new_v4().simple());

        let reasoning_context = json!({
            "task": serde_json::to_value(task).unwrap_or(Value::Null),
            "initial_context": context,
            "chain_id": chain_id,
        });

        // Further steps flow back toward the initiator, so observe there.
        let (sub_id, mut rx) = self.bus.subscribe(EventKind::CognitiveStep, initial_agent);
        let _guard = SubscriptionGuard::new(self.bus.clone(), vec![sub_id]);

        let seed_reasoning = "Working through the task step by step before concluding.";
        self.bus.emit(Event::new(
            initial_agent,
            target_agent,
            EventPayload::CognitiveStep {
                chain_id: chain_id.clone(),
                step_number: 1,
                reasoning: seed_reasoning.to_string(),
                context: reasoning_context,
                is_conclusion: false,
            },
        ));

        let mut steps: BTreeMap<u32, ChainStep> = BTreeMap::new();
        steps.insert(
            1,
            ChainStep {
                step_number: 1,
                reasoning: seed_reasoning.to_string(),
                sender_id: initial_agent.to_string(),
                is_conclusion: false,
                timestamp: Utc::now(),
            },
        );

        let deadline =
            Instant::now() + self.config.step_timeout * self.config.max_steps.max(1);
        let mut completed_steps: u32 = 1;
        let mut result: Option<String> = None;
        let mut timed_out = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                timed_out = true;
                break;
            }

            let event = match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "chain of thought {} timed out after {:?}",
                        chain_id,
                        self.config.step_timeout * self.config.max_steps.max(1)
                    );
                    timed_out = true;
                    break;
                }
            };

            let EventPayload::CognitiveStep {
                chain_id: event_chain,
                step_number,
                reasoning,
                is_conclusion,
                ..
            } = &event.payload
            else {
                continue;
            };
            if *event_chain != chain_id {
                continue;
            }

            let conclusion = *is_conclusion || event.metadata_flag("is_conclusion");
            steps.insert(
                *step_number,
                ChainStep {
                    step_number: *step_number,
                    reasoning: reasoning.clone(),
                    sender_id: event.sender_id.clone(),
                    is_conclusion: conclusion,
                    timestamp: event.timestamp,
                },
            );
            completed_steps = *step_number;

            if conclusion {
                // First conclusion wins; later ones only join the transcript.
                if result.is_none() {
                    result = Some(reasoning.clone());
                }
                break;
            }
            if *step_number >= self.config.max_steps {
                break;
            }
        }

        if result.is_none() && !steps.is_empty() && !timed_out {
            result = steps.values().next_back().map(|s| s.reasoning.clone());
        }

        log::info!(
            "chain of thought {} finished with {} recorded steps",
            chain_id,
            steps.len()
        );

        ChainOutcome {
            chain_id,
            task_id: task.id.clone(),
            steps: steps.into_values().collect(),
            result,
            completed_steps,
            timed_out,
        }
    }
}
