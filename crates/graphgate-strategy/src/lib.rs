//! Execution strategy selection for the graphgate query gateway.
//!
//! Three pure components decide how each query runs:
//! - [`analyzer`]: static Cypher heuristics (size estimate, flags, surface
//!   guards). Intentionally a string pattern matcher, never a parser; the
//!   keyword sets and thresholds drive strategy behavior.
//! - [`client`]: request-header capability and preference detection.
//! - [`selector`]: the deterministic `(analysis, client, system, mode)` to
//!   strategy mapping.

pub mod analyzer;
pub mod client;
pub mod selector;

pub use analyzer::{
    is_admin_operation, is_bulk_operation, is_schema_ddl, is_write_operation, QueryAnalysis,
    QueryAnalyzer, ResultSize,
};
pub use client::{ClientCapabilities, ClientDetector, ClientHeaders};
pub use selector::{
    ExecutionStrategy, ResponseMode, StrategyDecision, StrategySelector, SystemState,
};
