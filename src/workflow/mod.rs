/// Workflow definition layer
///
/// Type definitions for units, edges and execution contexts, plus the
/// petgraph-backed graph view used for validation and traversal.

// Core workflow type definitions
pub mod types;

// Graph construction, validation and adjacency queries
pub mod graph;

// Re-export commonly used types
pub use graph::WorkflowGraph;
pub use types::{Edge, ExecutionContext, WorkUnit, Workflow};
