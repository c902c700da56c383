//! Core contracts shared across the graphgate workspace.
//!
//! This crate defines the pieces every other gateway crate builds on:
//! - Graph identifiers and tenant tiers ([`graph`])
//! - The graph engine collaborator contract ([`repository`])
//! - The key/value store collaborator contract ([`kv`])
//! - The event listener system used for observability ([`events`])
//! - Environment-driven configuration ([`config`])

pub mod config;
pub mod events;
pub mod graph;
pub mod kv;
pub mod repository;

pub use config::GatewayConfig;
pub use events::{EventSink, GatewayEvent};
pub use graph::{GraphId, GraphIdError, GraphTier};
pub use kv::{KvError, KvInfo, KvStore, MemoryKvStore};
pub use repository::{
    translate_catalog_calls, ChunkStream, MemoryRepository, PropertyInfo, QueryChunk, Repository,
    RepositoryError, Row, SchemaInfo,
};
