//! HTTP gateway for multi-tenant graph queries.
//!
//! The router wires the robustness layer, credit accounting, query queue,
//! and SSE plumbing behind the `/v1` surface. All state is injected via
//! [`AppState`]; see [`state::AppStateBuilder`] for the defaults used by
//! tests and single-node deployments.

pub mod auth;
pub mod error;
pub mod models;
pub mod routes;
pub mod state;
pub mod streaming;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::{
    AppState, AppStateBuilder, Authenticator, CurrentUser, RepositoryResolver, ResolveError,
    StaticAuthenticator, StaticRepositoryResolver,
};

/// Builds the gateway router. Every route except `/v1/status` requires a
/// bearer token resolved by the injected authenticator.
pub fn router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route(
            "/v1/graphs/:graph_id/query",
            post(routes::query::execute_query),
        )
        .route(
            "/v1/graphs/:graph_id/query/:query_id",
            get(routes::query::query_status).delete(routes::query::cancel_query),
        )
        .route(
            "/v1/operations/:operation_id/stream",
            get(routes::operations::stream_operation),
        )
        .route(
            "/v1/graphs/:graph_id/credits/summary",
            get(routes::credits::credit_summary),
        )
        .route(
            "/v1/graphs/:graph_id/credits/transactions",
            get(routes::credits::credit_transactions),
        )
        .route(
            "/v1/graphs/:graph_id/credits/balance/check",
            get(routes::credits::balance_check),
        )
        .route(
            "/v1/graphs/:graph_id/credits/storage/limits",
            get(routes::credits::storage_limits),
        )
        .route(
            "/v1/graphs/:graph_id/schema/info",
            get(routes::schema::schema_info),
        )
        .route(
            "/v1/graphs/:graph_id/schema/validate",
            post(routes::schema::validate_schema),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/v1/status", get(routes::status::service_status))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
