//! Parallel analyze-and-synthesize coordination.
//!
//! A coordinator fans an analysis task out to independent analyst agents,
//! collects [`Analysis`](crate::event::EventPayload::Analysis) events, and
//! then assigns itself a synthesis task expected to produce a
//! [`Synthesis`](crate::event::EventPayload::Synthesis) event. Completion of
//! the analysis phase follows two rules: everyone answered, or at least
//! `min_analyses` answered and every elevated-priority analyst is among
//! them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::vulnscope::event::{Event, EventBus, EventKind, EventPayload, SubscriptionGuard};
use crate::vulnscope::patterns::PatternError;
use crate::vulnscope::task::{ReasoningPriority, Task};

/// One analyst participating in a parallel reasoning run.
#[derive(Debug, Clone)]
pub struct Analyst {
    pub agent_id: String,
    /// Elevated priorities gate early completion of the analysis phase.
    pub priority: ReasoningPriority,
}

impl Analyst {
    /// An analyst with default (medium) priority.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            priority: ReasoningPriority::Medium,
        }
    }

    /// Override the priority (builder pattern).
    pub fn with_priority(mut self, priority: ReasoningPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Tuning knobs for [`ParallelReasoningPattern`].
#[derive(Debug, Clone)]
pub struct ParallelReasoningConfig {
    /// Time budget for the analysis phase.
    pub analysis_timeout: Duration,
    /// Time budget for the synthesis phase.
    pub synthesis_timeout: Duration,
    /// Minimum number of analyses required to synthesize at all.
    pub min_analyses: usize,
}

impl Default for ParallelReasoningConfig {
    fn default() -> Self {
        Self {
            analysis_timeout: Duration::from_secs(180),
            synthesis_timeout: Duration::from_secs(120),
            min_analyses: 2,
        }
    }
}

/// One analyst's recorded analysis.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRecord {
    pub agent_id: String,
    pub reasoning: String,
    pub conclusion: String,
    pub evidence: Vec<String>,
    pub confidence: f64,
    pub priority: ReasoningPriority,
}

/// The coordinator's synthesis.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisRecord {
    pub text: String,
    pub conclusion: String,
    pub confidence: f64,
    pub supporting_analyses: Vec<Value>,
}

/// Full record of one parallel reasoning run.
#[derive(Debug, Clone, Serialize)]
pub struct ParallelReasoningOutcome {
    pub reasoning_id: String,
    pub problem: String,
    pub task_id: Option<String>,
    pub analysts: Vec<String>,
    pub coordinator: String,
    pub analyses: Vec<AnalysisRecord>,
    pub synthesis: Option<SynthesisRecord>,
    /// `"analysis_insufficient"` or `"synthesis"` when a phase timed out.
    pub timeout: Option<String>,
    pub completed: bool,
}

/// Coordinates independent analysis by several agents plus one synthesis.
pub struct ParallelReasoningPattern {
    bus: Arc<EventBus>,
    config: ParallelReasoningConfig,
}

impl ParallelReasoningPattern {
    /// Create a pattern with default limits (180 s analysis, 120 s
    /// synthesis, 2 minimum analyses).
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            config: ParallelReasoningConfig::default(),
        }
    }

    /// Override the limits (builder pattern).
    pub fn with_config(mut self, config: ParallelReasoningConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one parallel reasoning round.
    ///
    /// Returns an error when fewer analysts than `min_analyses` are
    /// supplied; every runtime shortfall is reported through the outcome's
    /// `timeout` marker instead.
    pub async fn execute(
        &self,
        analysts: &[Analyst],
        coordinator: &str,
        problem: &str,
        context: Value,
        task: Option<&Task>,
        priority: ReasoningPriority,
    ) -> Result<ParallelReasoningOutcome, PatternError> {
        if analysts.len() < self.config.min_analyses {
            return Err(PatternError::new(format!(
                "at least {} analyst agents are required, got {}",
                self.config.min_analyses,
                analysts.len()
            )));
        }

        let reasoning_id = format!("reasoning_{}", Uuid::new_v4().simple());

        let (analysis_id, mut analysis_rx) = self.bus.subscribe(EventKind::Analysis, coordinator);
        let (synthesis_id, mut synthesis_rx) = self.bus.subscribe(EventKind::Synthesis, coordinator);
        let _guard = SubscriptionGuard::new(self.bus.clone(), vec![analysis_id, synthesis_id]);

        // Fan the analysis task out to every analyst.
        for analyst in analysts {
            self.bus.emit(Event::new(
                coordinator,
                &analyst.agent_id,
                EventPayload::TaskAssignment {
                    task_id: format!("{}_{}", reasoning_id, analyst.agent_id),
                    task_type: "parallel_analysis".to_string(),
                    description: format!("Analyze the following problem: {}", problem),
                    parameters: json!({
                        "problem": problem,
                        "context": context,
                        "reasoning_id": reasoning_id,
                        "priority": priority.as_int(),
                    }),
                    priority: priority.as_int(),
                },
            ));
        }

        let elevated: Vec<&str> = analysts
            .iter()
            .filter(|a| a.priority.is_elevated())
            .map(|a| a.agent_id.as_str())
            .collect();

        let mut analyses: HashMap<String, AnalysisRecord> = HashMap::new();
        let deadline = tokio::time::Instant::now() + self.config.analysis_timeout;
        let mut phase_timed_out = false;

        loop {
            if analyses.len() >= analysts.len() {
                break;
            }
            if analyses.len() >= self.config.min_analyses
                && elevated.iter().all(|id| analyses.contains_key(*id))
            {
                break;
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, analysis_rx.recv()).await {
                Ok(Some(event)) => {
                    let EventPayload::Analysis {
                        reasoning_id: event_reasoning,
                        reasoning,
                        conclusion,
                        evidence,
                        confidence,
                        priority,
                    } = &event.payload
                    else {
                        continue;
                    };
                    if *event_reasoning != reasoning_id {
                        continue;
                    }
                    analyses.insert(
                        event.sender_id.clone(),
                        AnalysisRecord {
                            agent_id: event.sender_id.clone(),
                            reasoning: reasoning.clone(),
                            conclusion: conclusion.clone(),
                            evidence: evidence.clone(),
                            confidence: *confidence,
                            priority: *priority,
                        },
                    );
                }
                Ok(None) | Err(_) => {
                    phase_timed_out = true;
                    break;
                }
            }
        }

        if phase_timed_out {
            log::warn!(
                "parallel reasoning {} analysis phase timed out with {}/{} analyses",
                reasoning_id,
                analyses.len(),
                analysts.len()
            );
        }
        if phase_timed_out && analyses.len() < self.config.min_analyses {
            return Ok(ParallelReasoningOutcome {
                reasoning_id,
                problem: problem.to_string(),
                task_id: task.map(|t| t.id.clone()),
                analysts: analysts.iter().map(|a| a.agent_id.clone()).collect(),
                coordinator: coordinator.to_string(),
                analyses: analyses.into_values().collect(),
                synthesis: None,
                timeout: Some("analysis_insufficient".to_string()),
                completed: false,
            });
        }

        let collected: Vec<AnalysisRecord> = analyses.into_values().collect();
        let analyses_value = serde_json::to_value(&collected).unwrap_or(Value::Null);

        // Self-assigned synthesis task on the coordinator.
        self.bus.emit(Event::new(
            coordinator,
            coordinator,
            EventPayload::TaskAssignment {
                task_id: format!("{}_synthesis", reasoning_id),
                task_type: "reasoning_synthesis".to_string(),
                description: format!("Synthesize analyses for problem: {}", problem),
                parameters: json!({
                    "problem": problem,
                    "context": context,
                    "reasoning_id": reasoning_id,
                    "analyses": analyses_value,
                }),
                priority: 5,
            },
        ));

        let mut synthesis = None;
        let mut timeout_marker = None;
        let synth_deadline = tokio::time::Instant::now() + self.config.synthesis_timeout;
        loop {
            let remaining = synth_deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, synthesis_rx.recv()).await {
                Ok(Some(event)) => {
                    let EventPayload::Synthesis {
                        reasoning_id: event_reasoning,
                        synthesis: text,
                        final_conclusion,
                        supporting_analyses,
                        confidence,
                    } = &event.payload
                    else {
                        continue;
                    };
                    if *event_reasoning != reasoning_id {
                        continue;
                    }
                    synthesis = Some(SynthesisRecord {
                        text: text.clone(),
                        conclusion: final_conclusion.clone(),
                        confidence: *confidence,
                        supporting_analyses: supporting_analyses.clone(),
                    });
                    break;
                }
                Ok(None) | Err(_) => {
                    log::warn!("parallel reasoning {} synthesis phase timed out", reasoning_id);
                    timeout_marker = Some("synthesis".to_string());
                    break;
                }
            }
        }

        Ok(ParallelReasoningOutcome {
            reasoning_id,
            problem: problem.to_string(),
            task_id: task.map(|t| t.id.clone()),
            analysts: analysts.iter().map(|a| a.agent_id.clone()).collect(),
            coordinator: coordinator.to_string(),
            analyses: collected,
            synthesis,
            timeout: timeout_marker,
            completed: true,
        })
    }
}
