use graphgate_strategy::{
    ClientDetector, ClientHeaders, ExecutionStrategy, QueryAnalyzer, ResponseMode,
    StrategySelector, SystemState,
};

fn client(accept: &str, user_agent: &str, prefer: &str) -> graphgate_strategy::ClientCapabilities {
    ClientDetector::detect(&ClientHeaders {
        accept: accept.into(),
        user_agent: user_agent.into(),
        prefer: prefer.into(),
        referer: String::new(),
    })
}

fn idle() -> SystemState {
    SystemState {
        queue_size: 0,
        running_queries: 0,
        max_concurrent: 50,
    }
}

fn under_pressure() -> SystemState {
    SystemState {
        queue_size: 12,
        running_queries: 50,
        max_concurrent: 50,
    }
}

#[test]
fn auto_mode_decision_table() {
    struct Case {
        query: &'static str,
        accept: &'static str,
        prefer: &'static str,
        system: SystemState,
        expected: ExecutionStrategy,
    }

    let cases = [
        // Small results return immediately.
        Case {
            query: "MATCH (n) RETURN n LIMIT 10",
            accept: "*/*",
            prefer: "",
            system: idle(),
            expected: ExecutionStrategy::JsonImmediate,
        },
        // Medium results complete unless the client prefers streaming.
        Case {
            query: "MATCH (n) RETURN n LIMIT 500",
            accept: "*/*",
            prefer: "",
            system: idle(),
            expected: ExecutionStrategy::JsonComplete,
        },
        Case {
            query: "MATCH (n) RETURN n LIMIT 500",
            accept: "text/event-stream",
            prefer: "stream",
            system: idle(),
            expected: ExecutionStrategy::SseStreaming,
        },
        Case {
            query: "MATCH (n) RETURN n LIMIT 500",
            accept: "application/x-ndjson",
            prefer: "stream",
            system: idle(),
            expected: ExecutionStrategy::NdjsonStreaming,
        },
        // Large results stream by capability.
        Case {
            query: "MATCH (n) RETURN n",
            accept: "text/event-stream",
            prefer: "",
            system: idle(),
            expected: ExecutionStrategy::SseStreaming,
        },
        Case {
            query: "MATCH (n) RETURN n",
            accept: "application/x-ndjson",
            prefer: "",
            system: idle(),
            expected: ExecutionStrategy::NdjsonStreaming,
        },
        // Pressure routes to queue+stream for SSE clients.
        Case {
            query: "MATCH (n) RETURN n LIMIT 50",
            accept: "text/event-stream",
            prefer: "",
            system: under_pressure(),
            expected: ExecutionStrategy::SseQueueStream,
        },
        // Pressure + respond-async preference = plain queue.
        Case {
            query: "MATCH (n) RETURN n LIMIT 50",
            accept: "text/event-stream",
            prefer: "respond-async",
            system: under_pressure(),
            expected: ExecutionStrategy::TraditionalQueue,
        },
        Case {
            query: "MATCH (n) RETURN n LIMIT 50",
            accept: "*/*",
            prefer: "",
            system: under_pressure(),
            expected: ExecutionStrategy::TraditionalQueue,
        },
    ];

    for case in cases {
        let analysis = QueryAnalyzer::analyze(case.query);
        let client = client(case.accept, "", case.prefer);
        let decision = StrategySelector::select(
            &analysis,
            &client,
            &case.system,
            ResponseMode::Auto,
            false,
        );
        assert_eq!(
            decision.strategy, case.expected,
            "query {:?} accept {:?} prefer {:?}",
            case.query, case.accept, case.prefer
        );
    }
}

#[test]
fn selection_is_deterministic() {
    let analysis = QueryAnalyzer::analyze("MATCH (n) RETURN n LIMIT 500");
    let client = client("text/event-stream", "", "stream");
    let first = StrategySelector::select(&analysis, &client, &idle(), ResponseMode::Auto, false);
    for _ in 0..10 {
        let next =
            StrategySelector::select(&analysis, &client, &idle(), ResponseMode::Auto, false);
        assert_eq!(next.strategy, first.strategy);
    }
}

#[test]
fn interactive_tools_bypass_size_rules_and_pressure() {
    let analysis = QueryAnalyzer::analyze("MATCH (n) RETURN n");
    let postman = client("*/*", "PostmanRuntime/7.32", "");
    let decision = StrategySelector::select(
        &analysis,
        &postman,
        &under_pressure(),
        ResponseMode::Auto,
        false,
    );
    assert_eq!(decision.strategy, ExecutionStrategy::SyncTesting);
}

#[test]
fn stream_override_without_capability_warns_into_ndjson() {
    let analysis = QueryAnalyzer::analyze("MATCH (n) RETURN n LIMIT 10");
    let plain = client("*/*", "", "");
    let decision =
        StrategySelector::select(&analysis, &plain, &idle(), ResponseMode::Stream, false);
    assert_eq!(decision.strategy, ExecutionStrategy::NdjsonStreaming);
}

#[test]
fn decision_metadata_reflects_inputs() {
    let analysis = QueryAnalyzer::analyze("MATCH (n) RETURN n LIMIT 10");
    let plain = client("*/*", "", "");
    let decision = StrategySelector::select(
        &analysis,
        &plain,
        &under_pressure(),
        ResponseMode::Auto,
        false,
    );
    assert!(decision.needs_queue);
    assert!(!decision.is_write);
    assert_eq!(decision.mode, ResponseMode::Auto);
}
