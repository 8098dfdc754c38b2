// src/lib.rs

//! vulnscope: a multi-agent vulnerability assessment engine.
//!
//! Two cooperating planes share one event bus:
//!
//! - **Workflow and agent orchestration**: a DAG scheduler
//!   ([`WorkflowOrchestrator`]) that runs stages across four specialized
//!   LLM agents, plus four reusable communication patterns (chain of
//!   thought, debate, feedback loop, parallel reasoning) built on the typed
//!   [`EventBus`].
//! - **Code analysis**: a per-file pipeline
//!   ([`analysis::CodeAnalyzer`]) that fans pattern, semantic, and AST
//!   strategies out under a bounded-concurrency orchestrator, merges tool
//!   and metric output, and persists findings to a graph store.

// Import the top-level `vulnscope` module.
pub mod vulnscope;

// Re-exporting key items for easier external access.
pub use crate::vulnscope::agent::{self, Agent, AgentRuntime, TaskExecution};
pub use crate::vulnscope::agents;
pub use crate::vulnscope::analysis;
pub use crate::vulnscope::client::{self, CompletionClient, EmbeddingClient};
pub use crate::vulnscope::clients;
pub use crate::vulnscope::config;
pub use crate::vulnscope::event::{self, Event, EventBus, EventKind, EventPayload};
pub use crate::vulnscope::graph::{self, GraphStore};
pub use crate::vulnscope::orchestrator::{self, SpecializedAgents, WorkflowOrchestrator};
pub use crate::vulnscope::patterns;
pub use crate::vulnscope::task::{self, Task, TaskStatus};
pub use crate::vulnscope::workflow::{self, WorkflowStatus, WorkflowType};
