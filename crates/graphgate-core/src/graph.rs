//! Graph identifiers and tenant tiers.
//!
//! A graph id is an opaque string that can name a parent graph (`kg` prefix),
//! a subgraph (`<parent>_<suffix>`, sharing the parent's credit pool), or one
//! of the fixed shared repositories (`sec`, `industry`, ...).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Closed set of multi-tenant shared repositories.
pub const SHARED_REPOSITORIES: &[&str] =
    &["sec", "industry", "economic", "market", "esg", "regulatory"];

/// Pattern accepted for graph ids in request paths.
pub static GRAPH_ID_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]{1,63}$").expect("valid pattern"));

/// Errors from graph id parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphIdError {
    /// The id does not match the accepted pattern.
    #[error("invalid graph id: {0:?}")]
    Invalid(String),
}

/// A parsed graph identifier.
///
/// Subgraphs route every credit and cache operation to their parent, so the
/// parsed form carries the parent id alongside the raw id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphId {
    raw: String,
    parent: String,
    subgraph: Option<String>,
}

impl GraphId {
    /// Parses a raw graph id into `(parent, subgraph suffix?)`.
    ///
    /// Shared repositories and plain parent graphs parse to themselves;
    /// `kg<id>_<suffix>` parses to the `kg<id>` parent with the suffix kept.
    pub fn parse(raw: &str) -> Result<Self, GraphIdError> {
        if !GRAPH_ID_PATTERN.is_match(raw) {
            return Err(GraphIdError::Invalid(raw.to_string()));
        }

        if SHARED_REPOSITORIES.contains(&raw.to_ascii_lowercase().as_str()) {
            return Ok(Self {
                raw: raw.to_string(),
                parent: raw.to_ascii_lowercase(),
                subgraph: None,
            });
        }

        // Subgraph ids are `<parent>_<suffix>` where the parent carries the
        // `kg` prefix. Ids without the prefix are treated as opaque parents.
        if let Some((head, tail)) = raw.split_once('_') {
            if head.starts_with("kg") && !tail.is_empty() {
                return Ok(Self {
                    raw: raw.to_string(),
                    parent: head.to_string(),
                    subgraph: Some(tail.to_string()),
                });
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            parent: raw.to_string(),
            subgraph: None,
        })
    }

    /// The id exactly as the caller supplied it.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parent graph id. Credit pools and cache entries key on this.
    pub fn parent(&self) -> &str {
        &self.parent
    }

    /// The subgraph suffix, when this id names a subgraph.
    pub fn subgraph_suffix(&self) -> Option<&str> {
        self.subgraph.as_deref()
    }

    /// True when this id names a namespaced child of a parent graph.
    pub fn is_subgraph(&self) -> bool {
        self.subgraph.is_some()
    }

    /// True when this id names one of the fixed shared repositories.
    pub fn is_shared_repository(&self) -> bool {
        SHARED_REPOSITORIES.contains(&self.parent.as_str())
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Tenant tier of a graph database. Drives streaming chunk sizes and queue
/// priority boosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphTier {
    Standard,
    Enterprise,
    Premium,
    Shared,
}

impl GraphTier {
    /// Parses a tier name, defaulting to `Standard` for unknown values.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "enterprise" => GraphTier::Enterprise,
            "premium" => GraphTier::Premium,
            "shared" => GraphTier::Shared,
            _ => GraphTier::Standard,
        }
    }

    /// True for tiers that receive the premium queue priority boost.
    pub fn is_premium(&self) -> bool {
        matches!(self, GraphTier::Enterprise | GraphTier::Premium)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GraphTier::Standard => "standard",
            GraphTier::Enterprise => "enterprise",
            GraphTier::Premium => "premium",
            GraphTier::Shared => "shared",
        }
    }
}
