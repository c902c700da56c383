//! Gateway binary.
//!
//! Runs the HTTP gateway with in-memory collaborators: useful for local
//! development and as the wiring reference for production deployments, which
//! swap the static resolvers for real auth, engine, and store backends.

use graphgate_core::config::GatewayConfig;
use graphgate_core::{GraphTier, MemoryRepository};
use graphgate_credits::MemoryCreditStore;
use graphgate_server::{
    AppState, CurrentUser, StaticAuthenticator, StaticRepositoryResolver,
};
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphgate=info,tower_http=info".into()),
        )
        .init();

    let config = GatewayConfig::from_env();

    let auth = StaticAuthenticator::new();
    auth.register("dev-token", CurrentUser::new("dev-user", "standard"));

    let repositories = StaticRepositoryResolver::new();
    repositories.register(
        "kgdev",
        Arc::new(MemoryRepository::with_numbered_rows(500)),
        GraphTier::Standard,
    );

    let credit_store = Arc::new(MemoryCreditStore::new());
    credit_store.seed_graph_pool("kgdev", "dev-user", GraphTier::Standard, Decimal::new(1000, 0));

    let state = AppState::builder(config)
        .auth(auth)
        .repositories(repositories)
        .credit_store(credit_store)
        .build();
    state.credits().warmup().await;

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.expect("bind error");

    tracing::info!(%addr, "graphgate listening");
    axum::serve(listener, graphgate_server::router(state).into_make_service())
        .await
        .expect("server error");
}
