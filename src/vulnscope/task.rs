//! Task primitives shared by agents, communication patterns, and the
//! workflow orchestrator.
//!
//! A [`Task`] is a unit of addressed work: it names a receiver, carries a
//! free-form parameter map, and tracks its own lifecycle through
//! [`TaskStatus`]. Tasks travel between agents as
//! [`EventPayload::TaskAssignment`](crate::event::EventPayload::TaskAssignment)
//! events and come back as
//! [`EventPayload::TaskResult`](crate::event::EventPayload::TaskResult)s.
//!
//! Only the receiving agent transitions a task's status; every other field is
//! fixed at creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle states of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet picked up by the receiver.
    Pending,
    /// The receiver is currently working on the task.
    InProgress,
    /// The receiver finished and [`Task::result`] holds the outcome.
    Completed,
    /// The receiver gave up and [`Task::error`] explains why.
    Failed,
}

impl TaskStatus {
    /// Stable string form used inside event payloads and stage results.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Priority levels attached to analyst agents and reasoning tasks.
///
/// The integer mapping (`Low = 1`, `Medium = 3`, `High = 4`, `Critical = 5`)
/// is what travels inside task parameters; the enum itself is what the
/// parallel reasoning pattern uses for its "high priority analysts must
/// respond" completion rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl ReasoningPriority {
    /// Convert to the integer priority carried in task parameters.
    pub fn as_int(&self) -> i64 {
        match self {
            ReasoningPriority::Low => 1,
            ReasoningPriority::Medium => 3,
            ReasoningPriority::High => 4,
            ReasoningPriority::Critical => 5,
        }
    }

    /// True for the priorities that gate early completion of a parallel
    /// reasoning round.
    pub fn is_elevated(&self) -> bool {
        matches!(self, ReasoningPriority::High | ReasoningPriority::Critical)
    }
}

impl Default for ReasoningPriority {
    fn default() -> Self {
        ReasoningPriority::Medium
    }
}

/// A unit of addressed work exchanged between agents.
///
/// # Example
///
/// ```rust
/// use vulnscope::task::{Task, TaskStatus};
///
/// let task = Task::new(
///     "task-1",
///     "verify_exploitability",
///     "Verify whether the finding is exploitable",
///     "orchestrator",
///     "exploitation_verification",
/// )
/// .with_parameters(serde_json::json!({"finding_id": 42}))
/// .with_priority(4);
///
/// assert_eq!(task.status, TaskStatus::Pending);
/// assert_eq!(task.priority, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier of the task.
    pub id: String,
    /// Type tag the receiver dispatches on (e.g. `"create_workflow"`).
    pub task_type: String,
    /// Human-readable description of the work.
    pub description: String,
    /// Free-form parameter map.
    pub parameters: Value,
    /// Integer priority, higher is more urgent.
    pub priority: i64,
    /// Id of the agent that issued the task.
    pub sender_id: String,
    /// Id of the agent expected to perform the task.
    pub receiver_id: String,
    /// Current lifecycle state. Mutated only by the receiver.
    pub status: TaskStatus,
    /// Outcome value, present once the task completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure reason, present once the task failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task with empty parameters and default priority.
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        description: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            description: description.into(),
            parameters: Value::Object(serde_json::Map::new()),
            priority: ReasoningPriority::Medium.as_int(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Attach a parameter map (builder pattern).
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Override the integer priority (builder pattern).
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Fetch a string parameter by name.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(Value::as_str)
    }

    /// Fetch an arbitrary parameter by name.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Transition to `InProgress`. Receiver-side only.
    pub fn begin(&mut self) {
        self.status = TaskStatus::InProgress;
    }

    /// Transition to `Completed` with the given outcome. Receiver-side only.
    pub fn complete(&mut self, result: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
    }

    /// Transition to `Failed` with the given reason. Receiver-side only.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_integer_mapping() {
        assert_eq!(ReasoningPriority::Low.as_int(), 1);
        assert_eq!(ReasoningPriority::Medium.as_int(), 3);
        assert_eq!(ReasoningPriority::High.as_int(), 4);
        assert_eq!(ReasoningPriority::Critical.as_int(), 5);
        assert!(ReasoningPriority::High.is_elevated());
        assert!(!ReasoningPriority::Medium.is_elevated());
    }

    #[test]
    fn task_transitions() {
        let mut task = Task::new("t1", "noop", "do nothing", "a", "b");
        assert_eq!(task.status, TaskStatus::Pending);
        task.begin();
        assert_eq!(task.status, TaskStatus::InProgress);
        task.complete(serde_json::json!({"ok": true}));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.result.is_some());
        assert!(task.error.is_none());
    }
}
