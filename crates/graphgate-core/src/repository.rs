//! Graph engine collaborator contract.
//!
//! The gateway treats the storage engine as an abstract repository speaking
//! Cypher with the catalog extensions `CALL SHOW_TABLES()` and
//! `CALL TABLE_INFO(name)`. Repositories may optionally support native
//! streaming; the streaming emitters fall back to execute-then-paginate when
//! they do not.

use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// A single result row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// A chunk of streamed results. Columns accompany the first chunk only.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryChunk {
    pub rows: Vec<Row>,
    pub columns: Option<Vec<String>>,
}

/// Stream of result chunks from a natively streaming repository.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<QueryChunk, RepositoryError>> + Send>>;

/// Errors surfaced by the graph engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// The engine rejected or failed the query.
    #[error("query failed: {0}")]
    Query(String),
    /// The caller has no access to the requested graph or repository.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// The requested graph does not exist.
    #[error("graph not found: {0}")]
    NotFound(String),
    /// The engine did not answer within the execution timeout.
    #[error("query timeout after {seconds} seconds")]
    Timeout { seconds: u64 },
}

/// Runtime schema description assembled from catalog queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchemaInfo {
    pub node_labels: Vec<String>,
    pub relationship_types: Vec<String>,
    pub node_properties: BTreeMap<String, Vec<PropertyInfo>>,
}

/// A sampled property of a node label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: String,
}

/// Graph engine contract consumed by the gateway.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Executes a query and returns the complete result set.
    async fn execute_query(
        &self,
        cypher: &str,
        parameters: Option<&Row>,
    ) -> Result<Vec<Row>, RepositoryError>;

    /// Whether [`Repository::execute_query_streaming`] yields incremental
    /// chunks rather than a single buffered result.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Executes a query as a stream of chunks. The default implementation
    /// buffers [`Repository::execute_query`] and re-chunks it.
    async fn execute_query_streaming(
        &self,
        cypher: &str,
        parameters: Option<&Row>,
        chunk_size: usize,
    ) -> Result<ChunkStream, RepositoryError> {
        let rows = self.execute_query(cypher, parameters).await?;
        let columns = columns_of(&rows);
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<Result<QueryChunk, RepositoryError>> = rows
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| {
                Ok(QueryChunk {
                    rows: chunk.to_vec(),
                    columns: if i == 0 { Some(columns.clone()) } else { None },
                })
            })
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    /// Inspects the live database structure via catalog queries.
    async fn schema_info(&self) -> Result<SchemaInfo, RepositoryError>;
}

/// Extracts column names from the first row of a result set.
pub fn columns_of(rows: &[Row]) -> Vec<String> {
    rows.first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

static CATALOG_CALL: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"(?i)CALL\s+db\.(schema|labels|relationships|relationshipTypes|propertyKeys|indexes|constraints)\s*\(\s*\)",
    )
    .expect("valid pattern")
});

static HAS_RETURN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i)\bRETURN\b").expect("valid pattern"));

/// Rewrites Neo4j-style `CALL db.*()` introspection calls into the engine's
/// catalog dialect, ensuring a `RETURN *` follows the rewritten call.
///
/// Queries without catalog calls pass through unchanged. The rewrite is a
/// textual transform; callers never observe the original call.
pub fn translate_catalog_calls(query: &str) -> String {
    if !CATALOG_CALL.is_match(query) {
        return query.to_string();
    }

    let translated = CATALOG_CALL.replace_all(query, "CALL SHOW_TABLES()");
    if HAS_RETURN.is_match(&translated) {
        return translated.into_owned();
    }

    let trimmed = translated.trim_end();
    if trimmed.ends_with("SHOW_TABLES()") {
        format!("{trimmed} RETURN *")
    } else {
        regex::Regex::new(r"(?i)(CALL\s+SHOW_TABLES\(\s*\))")
            .expect("valid pattern")
            .replace(&translated, "$1 RETURN *")
            .into_owned()
    }
}

/// In-memory repository used by tests and single-node development.
///
/// Returns a fixed result set for any query, with optional latency and
/// failure injection.
pub struct MemoryRepository {
    rows: Vec<Row>,
    schema: SchemaInfo,
    streaming: bool,
    delay: Option<Duration>,
    fail: Arc<AtomicBool>,
}

impl MemoryRepository {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            schema: SchemaInfo::default(),
            streaming: false,
            delay: None,
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds `count` rows of the shape `{"n": <index>}`.
    pub fn with_numbered_rows(count: usize) -> Self {
        let rows = (0..count)
            .map(|i| {
                let mut row = Row::new();
                row.insert("n".to_string(), Value::from(i as u64));
                row
            })
            .collect();
        Self::new(rows)
    }

    pub fn with_schema(mut self, schema: SchemaInfo) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Every query sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Handle that flips the repository into a failing state.
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn execute_query(
        &self,
        cypher: &str,
        _parameters: Option<&Row>,
    ) -> Result<Vec<Row>, RepositoryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::Relaxed) {
            return Err(RepositoryError::Query("injected engine failure".into()));
        }

        let mut rows = self.rows.clone();
        if let Some(limit) = extract_limit(cypher) {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn schema_info(&self) -> Result<SchemaInfo, RepositoryError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(RepositoryError::Query("injected engine failure".into()));
        }
        Ok(self.schema.clone())
    }
}

static LIMIT_LITERAL: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i)LIMIT\s+(\d+)").expect("valid pattern"));

fn extract_limit(cypher: &str) -> Option<usize> {
    LIMIT_LITERAL
        .captures(cypher)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
