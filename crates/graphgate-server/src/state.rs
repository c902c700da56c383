//! Gateway application state and collaborator contracts.
//!
//! Every service is constructed at startup and injected; nothing is a
//! process-wide singleton, so tests build isolated states per case.

use async_trait::async_trait;
use graphgate_core::config::GatewayConfig;
use graphgate_core::{
    translate_catalog_calls, GraphId, GraphTier, KvStore, MemoryKvStore, Repository,
    RepositoryError,
};
use graphgate_credits::{CreditCache, CreditService, MemoryCreditStore};
use graphgate_queue::{QueryExecutor, QueryQueue};
use graphgate_robustness::{
    AdmissionController, CircuitBreakerManager, SlidingLogRateLimiter, StaticPressure,
    TimeoutCoordinator,
};
use graphgate_sse::OperationBus;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// The authenticated caller, resolved by the external auth collaborator.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub subscription_tier: String,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, subscription_tier: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subscription_tier: subscription_tier.into(),
        }
    }

    /// Premium tiers receive the queue priority boost.
    pub fn is_premium(&self) -> bool {
        matches!(
            self.subscription_tier.to_ascii_lowercase().as_str(),
            "enterprise" | "premium"
        )
    }
}

/// Bearer-token validation collaborator.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Option<CurrentUser>;
}

/// Fixed token table for tests and single-node deployments.
#[derive(Default)]
pub struct StaticAuthenticator {
    tokens: RwLock<HashMap<String, CurrentUser>>,
}

impl StaticAuthenticator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, token: &str, user: CurrentUser) {
        self.tokens.write().insert(token.to_string(), user);
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &str) -> Option<CurrentUser> {
        self.tokens.read().get(token).cloned()
    }
}

/// Failure to resolve a repository for a request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("you don't have access to the '{0}' repository")]
    AccessDenied(String),
    #[error("repository '{0}' not found")]
    NotFound(String),
}

/// Graph engine resolution collaborator.
#[async_trait]
pub trait RepositoryResolver: Send + Sync {
    /// Resolves a repository for an authenticated caller.
    async fn resolve(
        &self,
        graph_id: &GraphId,
        user: &CurrentUser,
    ) -> Result<Arc<dyn Repository>, ResolveError>;

    /// Resolves without a caller, for worker-side execution of queries that
    /// were authorized at submission time.
    async fn resolve_unchecked(
        &self,
        graph_id: &GraphId,
    ) -> Result<Arc<dyn Repository>, ResolveError>;

    /// Tenant tier of a graph, used for chunk sizing and priority.
    fn tier_of(&self, graph_id: &GraphId) -> GraphTier;
}

struct RegisteredGraph {
    repository: Arc<dyn Repository>,
    tier: GraphTier,
    /// `None` grants access to every authenticated user.
    allowed_users: Option<Vec<String>>,
}

/// In-memory registry of graph engines, for tests and development.
#[derive(Default)]
pub struct StaticRepositoryResolver {
    graphs: RwLock<HashMap<String, RegisteredGraph>>,
}

impl StaticRepositoryResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, graph_id: &str, repository: Arc<dyn Repository>, tier: GraphTier) {
        self.graphs.write().insert(
            graph_id.to_string(),
            RegisteredGraph {
                repository,
                tier,
                allowed_users: None,
            },
        );
    }

    pub fn register_restricted(
        &self,
        graph_id: &str,
        repository: Arc<dyn Repository>,
        tier: GraphTier,
        allowed_users: Vec<String>,
    ) {
        self.graphs.write().insert(
            graph_id.to_string(),
            RegisteredGraph {
                repository,
                tier,
                allowed_users: Some(allowed_users),
            },
        );
    }
}

#[async_trait]
impl RepositoryResolver for StaticRepositoryResolver {
    async fn resolve(
        &self,
        graph_id: &GraphId,
        user: &CurrentUser,
    ) -> Result<Arc<dyn Repository>, ResolveError> {
        let graphs = self.graphs.read();
        let Some(graph) = graphs.get(graph_id.parent()) else {
            return Err(ResolveError::NotFound(graph_id.parent().to_string()));
        };
        if let Some(allowed) = &graph.allowed_users {
            if !allowed.iter().any(|u| u == &user.id) {
                return Err(ResolveError::AccessDenied(graph_id.parent().to_string()));
            }
        }
        Ok(Arc::clone(&graph.repository))
    }

    async fn resolve_unchecked(
        &self,
        graph_id: &GraphId,
    ) -> Result<Arc<dyn Repository>, ResolveError> {
        let graphs = self.graphs.read();
        graphs
            .get(graph_id.parent())
            .map(|g| Arc::clone(&g.repository))
            .ok_or_else(|| ResolveError::NotFound(graph_id.parent().to_string()))
    }

    fn tier_of(&self, graph_id: &GraphId) -> GraphTier {
        self.graphs
            .read()
            .get(graph_id.parent())
            .map(|g| g.tier)
            .unwrap_or(GraphTier::Standard)
    }
}

/// Queue executor that resolves the target repository per dispatch.
struct ResolverExecutor {
    resolver: Arc<dyn RepositoryResolver>,
}

#[async_trait]
impl QueryExecutor for ResolverExecutor {
    async fn execute(
        &self,
        cypher: &str,
        parameters: Option<&serde_json::Map<String, Value>>,
        graph_id: &str,
    ) -> Result<Value, RepositoryError> {
        let parsed = GraphId::parse(graph_id)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let repository = self
            .resolver
            .resolve_unchecked(&parsed)
            .await
            .map_err(|e| RepositoryError::NotFound(e.to_string()))?;

        let translated = translate_catalog_calls(cypher);
        let rows = repository.execute_query(&translated, parameters).await?;
        let columns = graphgate_core::repository::columns_of(&rows);
        Ok(json!({
            "data": rows,
            "columns": columns,
            "row_count": rows.len(),
        }))
    }
}

struct AppStateInner {
    config: GatewayConfig,
    auth: Arc<dyn Authenticator>,
    repositories: Arc<dyn RepositoryResolver>,
    credits: Arc<CreditService>,
    queue: QueryQueue,
    bus: Arc<OperationBus>,
    breakers: Arc<CircuitBreakerManager>,
    admission: Arc<AdmissionController>,
    timeouts: TimeoutCoordinator,
    shared_repo_limiter: SlidingLogRateLimiter,
}

/// Shared application state, cheap to clone into handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

impl AppState {
    pub fn builder(config: GatewayConfig) -> AppStateBuilder {
        AppStateBuilder::new(config)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn auth(&self) -> &Arc<dyn Authenticator> {
        &self.inner.auth
    }

    pub fn repositories(&self) -> &Arc<dyn RepositoryResolver> {
        &self.inner.repositories
    }

    pub fn credits(&self) -> &Arc<CreditService> {
        &self.inner.credits
    }

    pub fn queue(&self) -> &QueryQueue {
        &self.inner.queue
    }

    pub fn bus(&self) -> &Arc<OperationBus> {
        &self.inner.bus
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.inner.breakers
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.inner.admission
    }

    pub fn timeouts(&self) -> &TimeoutCoordinator {
        &self.inner.timeouts
    }

    pub fn shared_repo_limiter(&self) -> &SlidingLogRateLimiter {
        &self.inner.shared_repo_limiter
    }
}

/// Assembles an [`AppState`], defaulting every collaborator to its in-memory
/// implementation so tests and development need no external services.
pub struct AppStateBuilder {
    config: GatewayConfig,
    auth: Option<Arc<dyn Authenticator>>,
    repositories: Option<Arc<dyn RepositoryResolver>>,
    kv: Option<Arc<dyn KvStore>>,
    credit_store: Option<Arc<dyn graphgate_credits::CreditStore>>,
    pressure: Option<Arc<dyn graphgate_robustness::SystemPressureSource>>,
}

impl AppStateBuilder {
    fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            auth: None,
            repositories: None,
            kv: None,
            credit_store: None,
            pressure: None,
        }
    }

    pub fn auth(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn repositories(mut self, repositories: Arc<dyn RepositoryResolver>) -> Self {
        self.repositories = Some(repositories);
        self
    }

    pub fn kv(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn credit_store(mut self, store: Arc<dyn graphgate_credits::CreditStore>) -> Self {
        self.credit_store = Some(store);
        self
    }

    pub fn pressure(
        mut self,
        pressure: Arc<dyn graphgate_robustness::SystemPressureSource>,
    ) -> Self {
        self.pressure = Some(pressure);
        self
    }

    pub fn build(self) -> AppState {
        let config = self.config;
        let auth = self
            .auth
            .unwrap_or_else(|| StaticAuthenticator::new() as Arc<dyn Authenticator>);
        let repositories = self
            .repositories
            .unwrap_or_else(|| StaticRepositoryResolver::new() as Arc<dyn RepositoryResolver>);
        let kv = self
            .kv
            .unwrap_or_else(|| MemoryKvStore::shared() as Arc<dyn KvStore>);
        let credit_store = self
            .credit_store
            .unwrap_or_else(|| Arc::new(MemoryCreditStore::new()));
        let pressure = self.pressure.unwrap_or_else(|| {
            StaticPressure::new() as Arc<dyn graphgate_robustness::SystemPressureSource>
        });

        let admission = Arc::new(AdmissionController::new(
            config.admission.clone(),
            pressure,
            config.queue.default_priority,
        ));
        let credits = Arc::new(CreditService::new(
            credit_store,
            CreditCache::new(Arc::clone(&kv)),
            config.credits.clone(),
        ));
        let queue = QueryQueue::new(
            config.queue.clone(),
            Arc::clone(&admission),
            Arc::new(ResolverExecutor {
                resolver: Arc::clone(&repositories),
            }),
        );
        let bus = OperationBus::new(Arc::clone(&kv), config.sse.clone());
        let breakers = Arc::new(CircuitBreakerManager::with_defaults());
        let shared_repo_limiter =
            SlidingLogRateLimiter::per_minute(config.query.shared_repo_rate_per_minute);

        AppState {
            inner: Arc::new(AppStateInner {
                config,
                auth,
                repositories,
                credits,
                queue,
                bus,
                breakers,
                admission,
                timeouts: TimeoutCoordinator::new(),
                shared_repo_limiter,
            }),
        }
    }
}
