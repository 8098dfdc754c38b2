//! Graph store contract and the schema the engine writes.
//!
//! The engine persists everything through three driver operations: a
//! parameterized read query, node creation, and relationship creation. The
//! concrete driver (Neo4j, Memgraph, an in-process fake) is supplied by the
//! host; the engine owns no locking for it and treats it as task-safe.
//!
//! # Schema
//!
//! Node labels: `Repository`, `File`, `CodeContent`, `VulnerabilityPattern`,
//! `Finding`, `CodeStructure`, `Function`, `Class`, `CodeMetrics`.
//!
//! Edges: `HAS_FILE`, `HAS_CONTENT`, `HAS_STRUCTURE`, `HAS_FUNCTION`,
//! `HAS_CLASS`, `HAS_METRICS`, `HAS_FINDING`, `MATCHES_PATTERN`.

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

/// Node labels written or read by the engine.
pub mod labels {
    pub const REPOSITORY: &str = "Repository";
    pub const FILE: &str = "File";
    pub const CODE_CONTENT: &str = "CodeContent";
    pub const VULNERABILITY_PATTERN: &str = "VulnerabilityPattern";
    pub const FINDING: &str = "Finding";
    pub const CODE_STRUCTURE: &str = "CodeStructure";
    pub const FUNCTION: &str = "Function";
    pub const CLASS: &str = "Class";
    pub const CODE_METRICS: &str = "CodeMetrics";
}

/// Relationship types written or read by the engine.
pub mod edges {
    pub const HAS_FILE: &str = "HAS_FILE";
    pub const HAS_CONTENT: &str = "HAS_CONTENT";
    pub const HAS_STRUCTURE: &str = "HAS_STRUCTURE";
    pub const HAS_FUNCTION: &str = "HAS_FUNCTION";
    pub const HAS_CLASS: &str = "HAS_CLASS";
    pub const HAS_METRICS: &str = "HAS_METRICS";
    pub const HAS_FINDING: &str = "HAS_FINDING";
    pub const MATCHES_PATTERN: &str = "MATCHES_PATTERN";
}

/// Error raised by graph driver operations.
#[derive(Debug)]
pub struct GraphError {
    message: String,
}

impl GraphError {
    /// Wrap an error description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl Error for GraphError {}

/// Driver surface the engine requires.
///
/// `run_query` rows are JSON objects keyed by the query's return aliases.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Run a parameterized read query and return its rows.
    async fn run_query(&self, query: &str, params: Value) -> Result<Vec<Value>, GraphError>;

    /// Create a node with the given labels and properties; returns its id.
    async fn create_node(&self, labels: &[&str], properties: Value) -> Result<i64, GraphError>;

    /// Create a relationship between two existing nodes.
    async fn create_relationship(
        &self,
        start_id: i64,
        end_id: i64,
        rel_type: &str,
        properties: Option<Value>,
    ) -> Result<(), GraphError>;
}
