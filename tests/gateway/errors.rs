use super::helpers::{body_json, fixture, fixture_with, query_body};
use axum::http::StatusCode;
use graphgate_core::config::{GatewayConfig, QueueSettings};
use serde_json::json;

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let fx = fixture(5);
    let response = fx
        .get_unauthenticated("/v1/graphs/kg1/credits/summary")
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_token_is_unauthorized() {
    let fx = fixture(5);
    let response = fx
        .get_with_token("/v1/graphs/kg1/credits/summary", "wrong-token")
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_graph_is_not_found() {
    let fx = fixture(5);
    let response = fx
        .post_query("kgmissing", query_body("MATCH (n) RETURN n LIMIT 5"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bulk_operations_are_bad_requests() {
    let fx = fixture(5);
    let response = fx
        .post_query("kg1", query_body("COPY entities FROM 'x.csv'"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("staging pipeline"));
}

#[tokio::test]
async fn admin_operations_are_forbidden() {
    let fx = fixture(5);
    let response = fx
        .post_query("kg1", query_body("INSTALL httpfs"))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn schema_ddl_is_forbidden() {
    let fx = fixture(5);
    let response = fx
        .post_query("kg1", query_body("CREATE NODE TABLE T(id INT64)"))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("immutable"));
}

#[tokio::test]
async fn empty_and_oversized_queries_are_rejected() {
    let fx = fixture(5);

    let empty = fx.post_query("kg1", query_body("   ")).await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let oversized = fx
        .post_query("kg1", query_body(&"MATCH (n) RETURN n ".repeat(5000)))
        .await;
    assert_eq!(oversized.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn out_of_range_timeout_is_rejected() {
    let fx = fixture(5);
    let response = fx
        .post_query(
            "kg1",
            json!({ "query": "MATCH (n) RETURN n LIMIT 5", "timeout": 301 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn user_concurrency_limit_maps_to_429() {
    let config = GatewayConfig {
        queue: QueueSettings {
            max_per_user: 1,
            max_concurrent: 0,
            ..QueueSettings::default()
        },
        ..GatewayConfig::default()
    };
    let fx = fixture_with(config, 5);

    let first = fx
        .post_query_with("kg1", query_body("MATCH (n) RETURN n LIMIT 5"), &[], "?mode=async")
        .await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = fx
        .post_query_with("kg1", query_body("MATCH (n) RETURN n LIMIT 5"), &[], "?mode=async")
        .await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn full_queue_maps_to_503_with_retry_after() {
    let config = GatewayConfig {
        queue: QueueSettings {
            max_queue_size: 1,
            max_concurrent: 0,
            ..QueueSettings::default()
        },
        ..GatewayConfig::default()
    };
    let fx = fixture_with(config, 5);

    let first = fx
        .post_query_with("kg1", query_body("MATCH (n) RETURN n LIMIT 5"), &[], "?mode=async")
        .await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = fx
        .post_query_with("kg1", query_body("MATCH (n) RETURN n LIMIT 5"), &[], "?mode=async")
        .await;
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(second.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn shared_repository_without_subscription_is_forbidden() {
    let fx = fixture(5);
    let response = fx
        .post_query("sec", query_body("MATCH (n) RETURN n LIMIT 5"))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

/// Included shared-repository reads are rate limited per user; the burst
/// above the budget maps to 429 with a Retry-After hint.
#[tokio::test]
async fn shared_repository_reads_are_rate_limited() {
    use graphgate_core::config::QuerySettings;
    use graphgate_core::{GraphTier, MemoryRepository};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    let config = GatewayConfig {
        query: QuerySettings {
            shared_repo_rate_per_minute: 2,
            ..QuerySettings::default()
        },
        ..GatewayConfig::default()
    };
    let fx = fixture_with(config, 5);
    fx.add_graph(
        "sec",
        Arc::new(MemoryRepository::with_numbered_rows(5)),
        GraphTier::Shared,
    );
    fx.credit_store
        .seed_repository_pool("u1", "sec", "starter", true, dec!(100));

    for _ in 0..2 {
        let response = fx
            .post_query("sec", query_body("MATCH (n) RETURN n LIMIT 5"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let throttled = fx
        .post_query("sec", query_body("MATCH (n) RETURN n LIMIT 5"))
        .await;
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(throttled.headers().contains_key("retry-after"));

    // User-graph queries are unaffected by the shared-repo budget.
    let user_graph = fx
        .post_query("kg1", query_body("MATCH (n) RETURN n LIMIT 5"))
        .await;
    assert_eq!(user_graph.status(), StatusCode::OK);
}

#[tokio::test]
async fn write_on_shared_repository_is_forbidden() {
    let fx = fixture(5);
    let response = fx.post_query("sec", query_body("CREATE (n:X)")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("shared repository"));
}

#[tokio::test]
async fn missing_credit_pool_maps_to_402() {
    let fx = fixture(5);
    let response = fx.get("/v1/graphs/kgunknown/credits/summary").await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test(start_paused = true)]
async fn interactive_timeout_returns_instructive_408() {
    use graphgate_core::{GraphTier, MemoryRepository};
    use std::sync::Arc;
    use std::time::Duration;

    let fx = fixture(5);
    fx.add_graph(
        "kgstall",
        Arc::new(MemoryRepository::with_numbered_rows(1).with_delay(Duration::from_secs(120))),
        GraphTier::Standard,
    );

    // Interactive clients get the 30-second execution floor; paused time
    // fast-forwards through it.
    let response = fx
        .post_query_with(
            "kgstall",
            query_body("MATCH (n) RETURN n"),
            &[("user-agent", "curl/8.0")],
            "",
        )
        .await;
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    let body = body_json(response).await;
    assert_eq!(body["error"], json!("Query execution timeout"));
    assert!(body["options"]["1_add_limit"].is_string());
    assert!(body["examples"]["with_limit"].is_string());
}

#[tokio::test]
async fn token_scoping_applies_to_restricted_graphs() {
    use graphgate_core::{GraphTier, MemoryRepository};
    use std::sync::Arc;

    let fx = fixture(5);
    fx.repositories.register_restricted(
        "kgprivate",
        Arc::new(MemoryRepository::with_numbered_rows(1)),
        GraphTier::Standard,
        vec!["someone-else".to_string()],
    );

    let response = fx
        .post_query("kgprivate", query_body("MATCH (n) RETURN n LIMIT 1"))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
