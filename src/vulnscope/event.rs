//! Typed event system shared by every agent in the engine.
//!
//! All inter-agent communication is an [`Event`]: a small envelope (sender,
//! receiver, timestamp, metadata) wrapping one [`EventPayload`] variant. The
//! [`EventBus`] delivers events to handlers subscribed by variant
//! ([`EventKind`]) and agent id, with `"all"` ([`BROADCAST`]) addressing every
//! subscriber of that variant.
//!
//! # Delivery model
//!
//! Every subscription owns its own queue and a dispatch task that drains it.
//! That gives three properties the coordination patterns rely on:
//!
//! - **Per-subscriber FIFO**: a subscriber observes events in emit order.
//! - **Snapshot semantics**: [`EventBus::emit`] captures the subscription
//!   table once; registrations or removals that happen during dispatch do not
//!   affect the in-flight event.
//! - **Queue-based re-entrancy**: a handler that emits an event handled by
//!   itself enqueues it rather than recursing, so cyclic handler
//!   registrations cannot blow the stack.
//!
//! [`EventBus::emit`] never fails and never blocks past enqueuing. Errors
//! returned by handlers are logged by the dispatch task and stop nothing.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vulnscope::event::{Event, EventBus, EventKind, EventPayload};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = Arc::new(EventBus::new());
//! let (_id, mut rx) = bus.subscribe(EventKind::TaskResult, "observer");
//!
//! bus.emit(Event::broadcast(
//!     "worker",
//!     EventPayload::TaskResult {
//!         task_id: "t1".into(),
//!         status: vulnscope::task::TaskStatus::Completed,
//!         result: None,
//!     },
//! ));
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.sender_id, "worker");
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::vulnscope::agents::assessment::{AssessmentStage, StageStatus};
use crate::vulnscope::agents::exploitation::ExploitabilityStatus;
use crate::vulnscope::agents::policy::{ComplianceStatus, PolicyRecommendationType};
use crate::vulnscope::agents::remediation::{RemediationComplexity, RemediationPriority};
use crate::vulnscope::patterns::debate::DebateRole;
use crate::vulnscope::patterns::feedback::FeedbackType;
use crate::vulnscope::task::{ReasoningPriority, TaskStatus};
use crate::vulnscope::workflow::{WorkflowStatus, WorkflowType};

/// Receiver id that addresses every subscriber of a variant.
pub const BROADCAST: &str = "all";

/// The per-variant payload of an [`Event`].
///
/// Modeled as a tagged sum type: subscribers filter by the variant's
/// [`EventKind`], and each variant carries only its own fields. The shared
/// envelope (sender, receiver, metadata, timestamp) lives on [`Event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Work handed to a specific agent.
    TaskAssignment {
        task_id: String,
        task_type: String,
        description: String,
        parameters: Value,
        priority: i64,
    },
    /// Outcome of a previously assigned task.
    TaskResult {
        task_id: String,
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    /// One step of a chain-of-thought reasoning sequence.
    CognitiveStep {
        chain_id: String,
        step_number: u32,
        reasoning: String,
        context: Value,
        #[serde(default)]
        is_conclusion: bool,
    },
    /// One argument inside a structured debate.
    DebateArgument {
        debate_id: String,
        round_number: u32,
        role: DebateRole,
        argument: String,
        #[serde(default)]
        evidence: Vec<String>,
    },
    /// Reviewer feedback inside a feedback loop.
    Feedback {
        loop_id: String,
        iteration: u32,
        feedback_type: FeedbackType,
        content_reference: String,
        content: String,
    },
    /// Creator revision inside a feedback loop.
    Revision {
        loop_id: String,
        iteration: u32,
        revised_content: String,
        #[serde(default)]
        changes_made: Vec<String>,
    },
    /// One analyst's independent result inside a parallel reasoning round.
    Analysis {
        reasoning_id: String,
        reasoning: String,
        conclusion: String,
        #[serde(default)]
        evidence: Vec<String>,
        confidence: f64,
        priority: ReasoningPriority,
    },
    /// The coordinator's synthesis of collected analyses.
    Synthesis {
        reasoning_id: String,
        synthesis: String,
        final_conclusion: String,
        #[serde(default)]
        supporting_analyses: Vec<Value>,
        confidence: f64,
    },
    /// Workflow lifecycle and progress updates.
    WorkflowStatus {
        workflow_id: String,
        workflow_type: WorkflowType,
        status: WorkflowStatus,
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        results: Option<Value>,
    },
    /// A guided assessment produced its plan.
    AssessmentPlan {
        assessment_id: String,
        repository_id: String,
        plan: Value,
    },
    /// A guided assessment stage changed state.
    AssessmentStage {
        assessment_id: String,
        stage: AssessmentStage,
        status: StageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        results: Option<Value>,
    },
    /// An exploitability verification finished.
    ExploitVerification {
        verification_id: String,
        finding_id: String,
        status: ExploitabilityStatus,
        confidence: f64,
    },
    /// A remediation plan was produced for a finding.
    RemediationPlan {
        plan_id: String,
        finding_id: String,
        priority: RemediationPriority,
        complexity: RemediationComplexity,
    },
    /// A policy compliance evaluation finished.
    PolicyEvaluation {
        evaluation_id: String,
        target_type: String,
        compliance_status: ComplianceStatus,
    },
    /// A policy recommendation was generated.
    PolicyRecommendation {
        recommendation_id: String,
        recommendation_type: PolicyRecommendationType,
    },
}

/// Field-less discriminant of [`EventPayload`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TaskAssignment,
    TaskResult,
    CognitiveStep,
    DebateArgument,
    Feedback,
    Revision,
    Analysis,
    Synthesis,
    WorkflowStatus,
    AssessmentPlan,
    AssessmentStage,
    ExploitVerification,
    RemediationPlan,
    PolicyEvaluation,
    PolicyRecommendation,
}

impl EventPayload {
    /// The discriminant of this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::TaskAssignment { .. } => EventKind::TaskAssignment,
            EventPayload::TaskResult { .. } => EventKind::TaskResult,
            EventPayload::CognitiveStep { .. } => EventKind::CognitiveStep,
            EventPayload::DebateArgument { .. } => EventKind::DebateArgument,
            EventPayload::Feedback { .. } => EventKind::Feedback,
            EventPayload::Revision { .. } => EventKind::Revision,
            EventPayload::Analysis { .. } => EventKind::Analysis,
            EventPayload::Synthesis { .. } => EventKind::Synthesis,
            EventPayload::WorkflowStatus { .. } => EventKind::WorkflowStatus,
            EventPayload::AssessmentPlan { .. } => EventKind::AssessmentPlan,
            EventPayload::AssessmentStage { .. } => EventKind::AssessmentStage,
            EventPayload::ExploitVerification { .. } => EventKind::ExploitVerification,
            EventPayload::RemediationPlan { .. } => EventKind::RemediationPlan,
            EventPayload::PolicyEvaluation { .. } => EventKind::PolicyEvaluation,
            EventPayload::PolicyRecommendation { .. } => EventKind::PolicyRecommendation,
        }
    }
}

/// Envelope carried by every inter-agent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Id of the emitting agent.
    pub sender_id: String,
    /// Id of the addressed agent, or [`BROADCAST`].
    pub receiver_id: String,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata attached by the emitter.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// The variant-specific payload.
    pub payload: EventPayload,
}

impl Event {
    /// Create an event addressed to a single agent.
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            payload,
        }
    }

    /// Create an event addressed to every subscriber of the variant.
    pub fn broadcast(sender_id: impl Into<String>, payload: EventPayload) -> Self {
        Self::new(sender_id, BROADCAST, payload)
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The payload's discriminant.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// True when a boolean metadata flag is present and set.
    pub fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Result type handlers return; `Err` is logged and never propagates.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Boxed future produced by an event handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// An event handler callable: takes the event, returns a boxed future.
pub type EventHandlerFn = std::sync::Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// Identifier returned by registration, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId {
    kind: EventKind,
    seq: u64,
}

struct Subscription {
    agent_id: String,
    queue: mpsc::UnboundedSender<Event>,
}

/// In-process typed publish/subscribe bus.
///
/// Holds no ownership of agents, only weak subscriptions indexed by
/// [`EventKind`]. Safe for concurrent emit and register/deregister.
pub struct EventBus {
    subscriptions: RwLock<HashMap<EventKind, HashMap<u64, Subscription>>>,
    next_seq: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Register a closure handler for one variant on behalf of an agent.
    ///
    /// The handler runs on a dedicated dispatch task, one event at a time,
    /// in emit order. Must be called within a tokio runtime.
    pub fn register_handler(
        &self,
        kind: EventKind,
        agent_id: impl Into<String>,
        handler: EventHandlerFn,
    ) -> SubscriptionId {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = handler(event).await {
                    log::error!("event handler error: {}", err);
                }
            }
        });
        self.install(kind, agent_id.into(), tx)
    }

    /// Subscribe as a channel: matching events arrive on the returned
    /// receiver in emit order. Dropping the receiver alone does not remove
    /// the subscription; call [`EventBus::deregister_handler`].
    pub fn subscribe(
        &self,
        kind: EventKind,
        agent_id: impl Into<String>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        let id = self.install(kind, agent_id.into(), tx);
        (id, rx)
    }

    /// Subscribe several (variant, agent) pairs onto one shared channel.
    ///
    /// Used by coordination patterns that observe traffic addressed to
    /// several participants. An event matching more than one entry is
    /// delivered once per matching entry; consumers dedup by their own keys.
    pub fn subscribe_group(
        &self,
        entries: &[(EventKind, &str)],
    ) -> (Vec<SubscriptionId>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        let ids = entries
            .iter()
            .map(|(kind, agent_id)| self.install(*kind, (*agent_id).to_string(), tx.clone()))
            .collect();
        (ids, rx)
    }

    /// Remove a subscription. The dispatch queue drains and its task exits.
    pub fn deregister_handler(&self, id: SubscriptionId) {
        let mut table = self
            .subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(subs) = table.get_mut(&id.kind) {
            subs.remove(&id.seq);
        }
    }

    /// Deliver an event to every matching subscription.
    ///
    /// Matching = subscribed to the payload's variant, and the subscription's
    /// agent id equals the event's receiver id or the receiver is
    /// [`BROADCAST`]. Returns once the event is enqueued everywhere; never
    /// fails.
    pub fn emit(&self, event: Event) {
        let kind = event.kind();
        let targets: Vec<mpsc::UnboundedSender<Event>> = {
            let table = self
                .subscriptions
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match table.get(&kind) {
                Some(subs) => subs
                    .values()
                    .filter(|sub| {
                        event.receiver_id == BROADCAST || sub.agent_id == event.receiver_id
                    })
                    .map(|sub| sub.queue.clone())
                    .collect(),
                None => Vec::new(),
            }
        };

        for queue in targets {
            if queue.send(event.clone()).is_err() {
                log::debug!("dropping event for closed subscription");
            }
        }
    }

    /// Number of live subscriptions for a variant. Test and debug aid.
    pub fn subscription_count(&self, kind: EventKind) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    fn install(
        &self,
        kind: EventKind,
        agent_id: String,
        queue: mpsc::UnboundedSender<Event>,
    ) -> SubscriptionId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut table = self
            .subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        table
            .entry(kind)
            .or_default()
            .insert(seq, Subscription { agent_id, queue });
        SubscriptionId { kind, seq }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that removes a set of subscriptions when dropped.
///
/// Coordination patterns hold one of these for the duration of an `execute`
/// call so handlers are removed on every exit path.
pub struct SubscriptionGuard {
    bus: std::sync::Arc<EventBus>,
    ids: Vec<SubscriptionId>,
}

impl SubscriptionGuard {
    /// Wrap subscription ids for scoped removal.
    pub fn new(bus: std::sync::Arc<EventBus>, ids: Vec<SubscriptionId>) -> Self {
        Self { bus, ids }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.bus.deregister_handler(id);
        }
    }
}
