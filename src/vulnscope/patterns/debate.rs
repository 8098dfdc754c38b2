//! Structured debate coordination.
//!
//! A proponent and an opponent argue over up to `max_rounds` rounds,
//! optionally guided by a mediator that frames every round after the first
//! and produces the final conclusion. Arguments are
//! [`DebateArgument`](crate::event::EventPayload::DebateArgument) events
//! scoped by debate id; traffic for other debates is ignored.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::vulnscope::event::{Event, EventBus, EventKind, EventPayload, SubscriptionGuard};
use crate::vulnscope::task::Task;

/// Roles agents can take in a debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateRole {
    Proponent,
    Opponent,
    Mediator,
    Summarizer,
}

impl DebateRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebateRole::Proponent => "proponent",
            DebateRole::Opponent => "opponent",
            DebateRole::Mediator => "mediator",
            DebateRole::Summarizer => "summarizer",
        }
    }
}

/// Tuning knobs for [`DebatePattern`].
#[derive(Debug, Clone)]
pub struct DebateConfig {
    /// Maximum number of debate rounds.
    pub max_rounds: u32,
    /// Time budget per round.
    pub round_timeout: Duration,
    /// How long to wait for the mediator's conclusion after the rounds.
    pub conclusion_timeout: Duration,
    /// When set, arguments without evidence are rejected and the round
    /// keeps waiting for a replacement from that role.
    pub require_evidence: bool,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            round_timeout: Duration::from_secs(60),
            conclusion_timeout: Duration::from_secs(10),
            require_evidence: true,
        }
    }
}

/// One argument recorded inside a round.
#[derive(Debug, Clone, Serialize)]
pub struct ArgumentRecord {
    pub role: DebateRole,
    pub agent_id: String,
    pub argument: String,
    pub evidence: Vec<String>,
}

/// One completed (or partially completed) round.
#[derive(Debug, Clone, Serialize)]
pub struct DebateRound {
    pub round_number: u32,
    /// Arguments keyed by role; partial on timeout.
    pub arguments: Vec<ArgumentRecord>,
}

/// Full record of one debate run.
#[derive(Debug, Clone, Serialize)]
pub struct DebateOutcome {
    pub debate_id: String,
    pub topic: String,
    pub task_id: Option<String>,
    pub proponent: String,
    pub opponent: String,
    pub mediator: Option<String>,
    pub rounds: Vec<DebateRound>,
    pub current_round: u32,
    /// The mediator's conclusion, when one was produced.
    pub conclusion: Option<Value>,
    pub completed: bool,
    /// True when a round deadline elapsed and round progression stopped.
    pub timed_out: bool,
}

/// Coordinates an N-round debate between two agents and an optional
/// mediator.
pub struct DebatePattern {
    bus: Arc<EventBus>,
    config: DebateConfig,
}

impl DebatePattern {
    /// Create a pattern with default limits (3 rounds, 60 s each).
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            config: DebateConfig::default(),
        }
    }

    /// Override the limits (builder pattern).
    pub fn with_config(mut self, config: DebateConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one debate.
    ///
    /// Round 1 expects arguments from the proponent and the opponent; later
    /// rounds also expect the mediator when one is present. A round deadline
    /// stops round progression and marks the record timed out; the partial
    /// round is kept.
    pub async fn execute(
        &self,
        proponent: &str,
        opponent: &str,
        mediator: Option<&str>,
        topic: &str,
        task: Option<&Task>,
    ) -> DebateOutcome {
        let debate_id = format!("debate_{}", Uuid::new_v4().simple());
        let observer = format!("debate:{}", debate_id);

        // Observe argument traffic addressed to any participant, plus
        // broadcasts, through one shared queue.
        let mut entries: Vec<(EventKind, &str)> = vec![
            (EventKind::DebateArgument, proponent),
            (EventKind::DebateArgument, opponent),
        ];
        if let Some(mediator_id) = mediator {
            entries.push((EventKind::DebateArgument, mediator_id));
        }
        let (ids, mut rx) = self.bus.subscribe_group(&entries);
        let (result_id, mut result_rx) = self.bus.subscribe(EventKind::TaskResult, &observer);
        let mut guard_ids = ids;
        guard_ids.push(result_id);
        let _guard = SubscriptionGuard::new(self.bus.clone(), guard_ids);

        let mut rounds: Vec<DebateRound> = Vec::new();
        let mut current_round = 0u32;
        let mut timed_out = false;

        'rounds: for round_number in 1..=self.config.max_rounds {
            self.initiate_round(proponent, opponent, mediator, round_number, &debate_id, topic);

            let expected = if round_number > 1 && mediator.is_some() {
                3
            } else {
                2
            };

            // Dedup by role: a broadcast argument arrives once per matching
            // subscription.
            let mut arguments: BTreeMap<DebateRole, ArgumentRecord> = BTreeMap::new();
            let deadline = tokio::time::Instant::now() + self.config.round_timeout;

            loop {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                let event = match tokio::time::timeout(remaining, rx.recv()).await {
                    Ok(Some(event)) => event,
                    Ok(None) => break 'rounds,
                    Err(_) => {
                        log::warn!("debate {} round {} timed out", debate_id, round_number);
                        timed_out = true;
                        if !arguments.is_empty() {
                            rounds.push(DebateRound {
                                round_number,
                                arguments: arguments.into_values().collect(),
                            });
                            current_round = round_number;
                        }
                        break 'rounds;
                    }
                };

                let EventPayload::DebateArgument {
                    debate_id: event_debate,
                    round_number: event_round,
                    role,
                    argument,
                    evidence,
                } = &event.payload
                else {
                    continue;
                };
                if *event_debate != debate_id || *event_round != round_number {
                    continue;
                }
                if self.config.require_evidence
                    && evidence.is_empty()
                    && *role != DebateRole::Mediator
                {
                    log::warn!(
                        "debate {} rejected {} argument without evidence",
                        debate_id,
                        role.as_str()
                    );
                    continue;
                }

                arguments.insert(
                    *role,
                    ArgumentRecord {
                        role: *role,
                        agent_id: event.sender_id.clone(),
                        argument: argument.clone(),
                        evidence: evidence.clone(),
                    },
                );

                if arguments.len() >= expected {
                    rounds.push(DebateRound {
                        round_number,
                        arguments: arguments.into_values().collect(),
                    });
                    current_round = round_number;
                    log::info!("debate {} round {} completed", debate_id, round_number);
                    break;
                }
            }
        }

        // The mediator wraps up even after an early timeout.
        let conclusion = if let Some(mediator_id) = mediator {
            self.generate_conclusion(
                mediator_id,
                &observer,
                &debate_id,
                topic,
                &rounds,
                current_round,
                &mut result_rx,
            )
            .await
        } else {
            None
        };

        DebateOutcome {
            debate_id,
            topic: topic.to_string(),
            task_id: task.map(|t| t.id.clone()),
            proponent: proponent.to_string(),
            opponent: opponent.to_string(),
            mediator: mediator.map(str::to_string),
            completed: !timed_out,
            current_round,
            rounds,
            conclusion,
            timed_out,
        }
    }

    fn initiate_round(
        &self,
        proponent: &str,
        opponent: &str,
        mediator: Option<&str>,
        round_number: u32,
        debate_id: &str,
        topic: &str,
    ) {
        if round_number == 1 {
            // The proponent opens; the opponent answers through its own
            // handlers.
            self.bus.emit(Event::new(
                proponent,
                opponent,
                EventPayload::DebateArgument {
                    debate_id: debate_id.to_string(),
                    round_number,
                    role: DebateRole::Proponent,
                    argument: format!("Opening argument on the topic: {}", topic),
                    evidence: vec![format!("topic:{}", topic)],
                },
            ));
        } else if let Some(mediator_id) = mediator {
            self.bus.emit(Event::broadcast(
                mediator_id,
                EventPayload::DebateArgument {
                    debate_id: debate_id.to_string(),
                    round_number,
                    role: DebateRole::Mediator,
                    argument: format!(
                        "Round {}: address the points raised in the previous round.",
                        round_number
                    ),
                    evidence: Vec::new(),
                },
            ));
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate_conclusion(
        &self,
        mediator_id: &str,
        observer: &str,
        debate_id: &str,
        topic: &str,
        rounds: &[DebateRound],
        current_round: u32,
        result_rx: &mut tokio::sync::mpsc::UnboundedReceiver<Event>,
    ) -> Option<Value> {
        let conclusion_task_id = format!("{}_conclusion", debate_id);
        self.bus.emit(Event::new(
            observer,
            mediator_id,
            EventPayload::TaskAssignment {
                task_id: conclusion_task_id.clone(),
                task_type: "generate_debate_conclusion".to_string(),
                description: format!("Generate a conclusion for the debate on: {}", topic),
                parameters: json!({
                    "debate_id": debate_id,
                    "topic": topic,
                    "rounds": serde_json::to_value(rounds).unwrap_or(Value::Null),
                }),
                priority: 4,
            },
        ));

        let deadline = tokio::time::Instant::now() + self.config.conclusion_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, result_rx.recv()).await {
                Ok(Some(event)) => {
                    if let EventPayload::TaskResult {
                        task_id, result, ..
                    } = &event.payload
                    {
                        if *task_id == conclusion_task_id {
                            return result.clone();
                        }
                    }
                }
                Ok(None) | Err(_) => {
                    log::warn!("debate {} conclusion timed out", debate_id);
                    // Minimal record so callers still see who was asked.
                    return Some(json!({
                        "mediator_id": mediator_id,
                        "topic": topic,
                        "rounds_considered": current_round,
                    }));
                }
            }
        }
    }
}
