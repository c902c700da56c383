//! Static Cypher analysis.
//!
//! Case-insensitive pattern matching over the raw query string. The size
//! thresholds and keyword sets are load-bearing: they decide between
//! immediate JSON, streaming, and queueing, so they stay exactly as tuned.

use serde::Serialize;
use std::sync::LazyLock;

/// Estimated result size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSize {
    /// At most 100 rows.
    Small,
    /// At most 1000 rows.
    Medium,
    /// Unbounded or above 1000 rows.
    Large,
}

impl ResultSize {
    pub const SMALL_LIMIT: u64 = 100;
    pub const MEDIUM_LIMIT: u64 = 1000;

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSize::Small => "small",
            ResultSize::Medium => "medium",
            ResultSize::Large => "large",
        }
    }
}

/// Result of analyzing one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnalysis {
    pub estimated_size: ResultSize,
    pub has_limit: bool,
    pub limit_value: Option<u64>,
    pub has_aggregation: bool,
    pub has_match: bool,
    pub has_where: bool,
    pub has_order_by: bool,
    pub has_shortest_path: bool,
    pub has_all_paths: bool,
    pub has_cartesian_risk: bool,
    pub potentially_expensive: bool,
    pub is_count_only: bool,
    pub requires_streaming: bool,
    pub supports_progress: bool,
}

static LIMIT_LITERAL: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"LIMIT\s+(\d+)").expect("valid pattern"));

const AGGREGATIONS: &[&str] = &["COUNT(", "SUM(", "AVG(", "MAX(", "MIN(", "COLLECT("];

/// Static query analyzer. Deterministic: output depends only on the query
/// string.
pub struct QueryAnalyzer;

impl QueryAnalyzer {
    pub fn analyze(query: &str) -> QueryAnalysis {
        let upper = query.to_uppercase();

        let has_limit = upper.contains("LIMIT");
        let limit_value = LIMIT_LITERAL
            .captures(&upper)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok());

        let has_aggregation = AGGREGATIONS.iter().any(|agg| upper.contains(agg));
        let has_match = upper.contains("MATCH");
        let has_shortest_path = upper.contains("SHORTEST") && upper.contains("PATH");
        let has_all_paths = upper.contains("ALL") && upper.contains("PATH");
        let has_cartesian_risk = upper.matches("MATCH").count() > 1 && upper.contains(',');
        let is_count_only =
            has_aggregation && upper.contains("COUNT(") && !upper.contains("GROUP BY");

        let estimated_size = Self::estimate_size(&upper, has_limit, limit_value);

        QueryAnalysis {
            estimated_size,
            has_limit,
            limit_value,
            has_aggregation,
            has_match,
            has_where: upper.contains("WHERE"),
            has_order_by: upper.contains("ORDER BY"),
            has_shortest_path,
            has_all_paths,
            has_cartesian_risk,
            potentially_expensive: has_shortest_path || has_all_paths || has_cartesian_risk,
            is_count_only,
            requires_streaming: estimated_size == ResultSize::Large && !has_aggregation,
            supports_progress: has_match && !has_aggregation,
        }
    }

    fn estimate_size(upper: &str, has_limit: bool, limit_value: Option<u64>) -> ResultSize {
        if let Some(limit) = limit_value {
            return if limit <= ResultSize::SMALL_LIMIT {
                ResultSize::Small
            } else if limit <= ResultSize::MEDIUM_LIMIT {
                ResultSize::Medium
            } else {
                ResultSize::Large
            };
        }

        // LIMIT present but parameterized ($limit): assume a reasonable size.
        if has_limit {
            return ResultSize::Medium;
        }

        // A single aggregation without grouping returns one row.
        if upper.contains("COUNT(") && !upper.contains("GROUP BY") {
            return ResultSize::Small;
        }

        ResultSize::Large
    }
}

static WRITE_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)\b(CREATE|MERGE|SET|DELETE)\b").expect("valid pattern")
});
static BULK_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i)\b(COPY|LOAD|IMPORT)\b").expect("valid pattern"));
static ADMIN_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)\b(EXPORT|INSTALL|ATTACH|DETACH\s+DATABASE)\b|\bCALL\s+DBMS\b")
        .expect("valid pattern")
});
static DDL_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)\b(CREATE|DROP|ALTER)\s+((NODE|REL)\s+)?TABLE\b")
        .expect("valid pattern")
});

/// Writes are not allowed through the read-only query endpoint.
pub fn is_write_operation(query: &str) -> bool {
    // DDL is classified separately so it gets its own guidance.
    !is_schema_ddl(query) && WRITE_PATTERN.is_match(query)
}

/// Bulk ingestion must go through the staging pipeline.
pub fn is_bulk_operation(query: &str) -> bool {
    BULK_PATTERN.is_match(query)
}

/// Administrative operations require operator privileges.
pub fn is_admin_operation(query: &str) -> bool {
    ADMIN_PATTERN.is_match(query)
}

/// Schema DDL is immutable after graph creation.
pub fn is_schema_ddl(query: &str) -> bool {
    DDL_PATTERN.is_match(query)
}
