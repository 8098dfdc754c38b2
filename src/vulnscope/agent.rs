//! Agent abstraction and runtime.
//!
//! An [`Agent`] is an addressable actor with a stable id that executes
//! [`Task`]s. The [`AgentRuntime`] wires an agent onto the
//! [`EventBus`](crate::event::EventBus): `start()` installs the task
//! assignment handler, `stop()` removes it, and every assignment flows
//! through [`Agent::handle_task`] with the outcome emitted back to the
//! sender as a `TaskResult` event.
//!
//! # Failure model
//!
//! `handle_task` never raises. Unknown task types and internal failures both
//! come back as a failed [`TaskExecution`]; the runtime translates that into
//! a `TaskResult` with [`TaskStatus::Failed`] so the sender always hears
//! back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::vulnscope::event::{Event, EventBus, EventKind, EventPayload, SubscriptionId};
use crate::vulnscope::task::{Task, TaskStatus};

/// Outcome of handling one task.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    /// Terminal status, `Completed` or `Failed`.
    pub status: TaskStatus,
    /// Result value on success.
    pub result: Option<Value>,
    /// Failure reason on failure.
    pub error: Option<String>,
}

impl TaskExecution {
    /// A completed execution carrying a result value.
    pub fn completed(result: Value) -> Self {
        Self {
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    /// A failed execution carrying an error description.
    ///
    /// The error also appears as the result value under an `"error"` key so
    /// that senders reading only `TaskResult::result` still see the reason.
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status: TaskStatus::Failed,
            result: Some(serde_json::json!({ "error": error })),
            error: Some(error),
        }
    }
}

/// An addressable actor that executes tasks.
///
/// Implementations are the specialized domain agents
/// (see [`crate::agents`]) and the workflow orchestrator itself.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier used for event addressing.
    fn id(&self) -> &str;

    /// Human-readable display name.
    fn name(&self) -> &str {
        self.id()
    }

    /// Execute one task. Must not panic; failures come back as a failed
    /// [`TaskExecution`].
    async fn handle_task(&self, task: &Task) -> TaskExecution;

    /// Generic stage execution used by the workflow orchestrator for stage
    /// names outside the agent's dispatch table.
    async fn execute_stage(&self, stage_name: &str, _stage_input: &Value) -> Value {
        serde_json::json!({
            "stage": stage_name,
            "status": "completed",
        })
    }
}

/// Connects an [`Agent`] to the event bus.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use vulnscope::agent::AgentRuntime;
/// use vulnscope::event::EventBus;
/// # use vulnscope::agent::{Agent, TaskExecution};
/// # use vulnscope::task::Task;
/// # struct Echo;
/// # #[async_trait::async_trait]
/// # impl Agent for Echo {
/// #     fn id(&self) -> &str { "echo" }
/// #     async fn handle_task(&self, task: &Task) -> TaskExecution {
/// #         TaskExecution::completed(task.parameters.clone())
/// #     }
/// # }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = Arc::new(EventBus::new());
/// let runtime = AgentRuntime::new(Arc::new(Echo), bus.clone());
/// runtime.start();
/// // assignments addressed to "echo" are now executed and answered
/// runtime.stop();
/// # }
/// ```
pub struct AgentRuntime {
    agent: Arc<dyn Agent>,
    bus: Arc<EventBus>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    in_flight: Arc<tokio::sync::RwLock<HashMap<String, Task>>>,
}

impl AgentRuntime {
    /// Wrap an agent for bus-driven task execution.
    pub fn new(agent: Arc<dyn Agent>, bus: Arc<EventBus>) -> Self {
        Self {
            agent,
            bus,
            subscriptions: Mutex::new(Vec::new()),
            in_flight: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    /// The wrapped agent.
    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    /// Install the task assignment handler. Idempotent per call pairing with
    /// [`AgentRuntime::stop`]; calling twice installs two handlers.
    pub fn start(&self) {
        let agent = self.agent.clone();
        let bus = self.bus.clone();
        let in_flight = self.in_flight.clone();
        let agent_id = self.agent.id().to_string();

        let handler: crate::vulnscope::event::EventHandlerFn = Arc::new(move |event: Event| {
            let agent = agent.clone();
            let bus = bus.clone();
            let in_flight = in_flight.clone();
            Box::pin(async move {
                let EventPayload::TaskAssignment {
                    task_id,
                    task_type,
                    description,
                    parameters,
                    priority,
                } = event.payload.clone()
                else {
                    return Ok(());
                };

                let mut task = Task::new(
                    task_id.clone(),
                    task_type,
                    description,
                    event.sender_id.clone(),
                    agent.id(),
                )
                .with_parameters(parameters)
                .with_priority(priority);
                task.begin();
                in_flight.write().await.insert(task_id.clone(), task.clone());

                let execution = agent.handle_task(&task).await;
                match execution.status {
                    TaskStatus::Failed => {
                        task.fail(execution.error.clone().unwrap_or_else(|| "task failed".into()))
                    }
                    _ => task.complete(execution.result.clone().unwrap_or(Value::Null)),
                }
                in_flight.write().await.remove(&task_id);

                bus.emit(Event::new(
                    agent.id(),
                    event.sender_id,
                    EventPayload::TaskResult {
                        task_id,
                        status: task.status,
                        result: execution.result,
                    },
                ));
                Ok(())
            })
        });

        let id = self
            .bus
            .register_handler(EventKind::TaskAssignment, agent_id, handler);
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(id);
    }

    /// Remove every handler installed by [`AgentRuntime::start`].
    pub fn stop(&self) {
        let ids: Vec<SubscriptionId> = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for id in ids {
            self.bus.deregister_handler(id);
        }
    }

    /// Snapshot of tasks currently being executed.
    pub async fn in_flight_tasks(&self) -> Vec<Task> {
        self.in_flight.read().await.values().cloned().collect()
    }

    /// Emit an event on behalf of the wrapped agent.
    pub fn emit(&self, event: Event) {
        self.bus.emit(event);
    }
}
