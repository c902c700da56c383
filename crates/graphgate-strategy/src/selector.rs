//! Deterministic execution strategy selection.

use crate::analyzer::{QueryAnalysis, ResultSize};
use crate::client::ClientCapabilities;
use serde::Serialize;

/// The closed set of execution shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    JsonImmediate,
    JsonComplete,
    SseStreaming,
    NdjsonStreaming,
    SseProgress,
    SseQueueStream,
    TraditionalQueue,
    QueueSimple,
    Cached,
    SyncTesting,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStrategy::JsonImmediate => "json_immediate",
            ExecutionStrategy::JsonComplete => "json_complete",
            ExecutionStrategy::SseStreaming => "sse_streaming",
            ExecutionStrategy::NdjsonStreaming => "ndjson_streaming",
            ExecutionStrategy::SseProgress => "sse_progress",
            ExecutionStrategy::SseQueueStream => "sse_queue_stream",
            ExecutionStrategy::TraditionalQueue => "traditional_queue",
            ExecutionStrategy::QueueSimple => "queue_simple",
            ExecutionStrategy::Cached => "cached",
            ExecutionStrategy::SyncTesting => "sync_testing",
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            ExecutionStrategy::SseStreaming
                | ExecutionStrategy::NdjsonStreaming
                | ExecutionStrategy::SseProgress
                | ExecutionStrategy::SseQueueStream
        )
    }
}

/// Caller-requested response mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Auto,
    Sync,
    Async,
    Stream,
}

impl ResponseMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "auto" => Some(ResponseMode::Auto),
            "sync" => Some(ResponseMode::Sync),
            "async" => Some(ResponseMode::Async),
            "stream" => Some(ResponseMode::Stream),
            _ => None,
        }
    }
}

/// Queue pressure snapshot consulted during selection.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemState {
    pub queue_size: usize,
    pub running_queries: usize,
    pub max_concurrent: usize,
}

impl SystemState {
    /// True when new work should queue rather than execute inline.
    pub fn needs_queue(&self) -> bool {
        self.queue_size > 0 || self.running_queries >= self.max_concurrent
    }
}

/// Why a strategy was chosen; logged and attached to decisions.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyDecision {
    pub strategy: ExecutionStrategy,
    pub reason: &'static str,
    pub estimated_size: ResultSize,
    pub needs_queue: bool,
    pub is_write: bool,
    pub mode: ResponseMode,
}

/// Deterministic strategy selection. First matching rule wins.
pub struct StrategySelector;

impl StrategySelector {
    pub fn select(
        analysis: &QueryAnalysis,
        client: &ClientCapabilities,
        system: &SystemState,
        mode: ResponseMode,
        is_write: bool,
    ) -> StrategyDecision {
        let decide = |strategy, reason| StrategyDecision {
            strategy,
            reason,
            estimated_size: analysis.estimated_size,
            needs_queue: system.needs_queue(),
            is_write,
            mode,
        };

        match mode {
            ResponseMode::Sync => return decide(ExecutionStrategy::SyncTesting, "mode=sync"),
            ResponseMode::Async => {
                return decide(ExecutionStrategy::TraditionalQueue, "mode=async")
            }
            ResponseMode::Stream => {
                return if client.supports_sse {
                    decide(ExecutionStrategy::SseStreaming, "mode=stream, sse capable")
                } else if client.supports_ndjson {
                    decide(
                        ExecutionStrategy::NdjsonStreaming,
                        "mode=stream, ndjson capable",
                    )
                } else {
                    tracing::warn!(
                        "client requested streaming but supports neither SSE nor NDJSON"
                    );
                    decide(
                        ExecutionStrategy::NdjsonStreaming,
                        "mode=stream without capability",
                    )
                };
            }
            ResponseMode::Auto => {}
        }

        // Interactive tools get synchronous answers regardless of size;
        // oversized results are truncated with advice at response time.
        if client.is_interactive {
            return decide(ExecutionStrategy::SyncTesting, "interactive client");
        }

        if system.needs_queue() {
            if is_write {
                return decide(ExecutionStrategy::TraditionalQueue, "pressure, write");
            }
            if client.supports_sse && !client.prefer_async {
                return decide(
                    ExecutionStrategy::SseQueueStream,
                    "pressure, sse queue+stream",
                );
            }
            return decide(ExecutionStrategy::TraditionalQueue, "pressure");
        }

        // Writes never stream; the smallest valid shape is a complete JSON
        // response.
        if is_write {
            return decide(ExecutionStrategy::JsonComplete, "write");
        }

        match analysis.estimated_size {
            ResultSize::Small => decide(ExecutionStrategy::JsonImmediate, "small result"),
            ResultSize::Medium => {
                if client.prefer_stream {
                    if client.supports_sse {
                        return decide(ExecutionStrategy::SseStreaming, "medium, prefers sse");
                    }
                    if client.supports_ndjson {
                        return decide(
                            ExecutionStrategy::NdjsonStreaming,
                            "medium, prefers ndjson",
                        );
                    }
                }
                decide(ExecutionStrategy::JsonComplete, "medium result")
            }
            ResultSize::Large => {
                if client.supports_sse {
                    return decide(ExecutionStrategy::SseStreaming, "large, sse capable");
                }
                if client.supports_ndjson {
                    return decide(ExecutionStrategy::NdjsonStreaming, "large, ndjson capable");
                }
                if analysis
                    .limit_value
                    .is_some_and(|limit| limit <= ResultSize::MEDIUM_LIMIT)
                {
                    return decide(ExecutionStrategy::JsonComplete, "large but bounded limit");
                }
                tracing::warn!("large result without streaming support, using ndjson anyway");
                decide(
                    ExecutionStrategy::NdjsonStreaming,
                    "large without capability",
                )
            }
        }
    }
}
