//! Operation cost tables.
//!
//! Database operations are included in the subscription (cost 0); AI-adjacent
//! operations are priced. Shared repositories carry their own per-repo maps
//! where 0 means "included, rate-limited only" and a missing entry means the
//! cost is dynamic (supplied by the caller, e.g. token-metered).

use graphgate_core::config::CreditSettings;
use rust_decimal::Decimal;

/// Operations metered against credit pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    ApiCall,
    Query,
    Import,
    Backup,
    Analytics,
    Sync,
    McpCall,
    AgentCall,
    AiAnalysis,
    AiTokens,
    StoragePerGbDay,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::ApiCall => "api_call",
            OperationType::Query => "query",
            OperationType::Import => "import",
            OperationType::Backup => "backup",
            OperationType::Analytics => "analytics",
            OperationType::Sync => "sync",
            OperationType::McpCall => "mcp_call",
            OperationType::AgentCall => "agent_call",
            OperationType::AiAnalysis => "ai_analysis",
            OperationType::AiTokens => "ai_tokens",
            OperationType::StoragePerGbDay => "storage_per_gb_day",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "api_call" => Some(OperationType::ApiCall),
            "query" => Some(OperationType::Query),
            "import" => Some(OperationType::Import),
            "backup" => Some(OperationType::Backup),
            "analytics" => Some(OperationType::Analytics),
            "sync" => Some(OperationType::Sync),
            "mcp_call" => Some(OperationType::McpCall),
            "agent_call" => Some(OperationType::AgentCall),
            "ai_analysis" => Some(OperationType::AiAnalysis),
            "ai_tokens" => Some(OperationType::AiTokens),
            "storage_per_gb_day" => Some(OperationType::StoragePerGbDay),
            _ => None,
        }
    }

    /// Base cost before any dynamic pricing. `None` means the cost is
    /// computed per call (token metering).
    pub fn base_cost(&self, settings: &CreditSettings) -> Option<Decimal> {
        match self {
            OperationType::ApiCall
            | OperationType::Query
            | OperationType::Import
            | OperationType::Backup
            | OperationType::Analytics
            | OperationType::Sync => Some(Decimal::ZERO),
            OperationType::McpCall => Some(settings.mcp_call_cost),
            OperationType::AgentCall | OperationType::AiAnalysis => Some(Decimal::new(100, 0)),
            OperationType::AiTokens => None,
            OperationType::StoragePerGbDay => Some(Decimal::new(10, 0)),
        }
    }

    /// All statically priced operations, for cache warmup.
    pub fn warmup_costs(settings: &CreditSettings) -> Vec<(OperationType, Decimal)> {
        [
            OperationType::ApiCall,
            OperationType::Query,
            OperationType::Import,
            OperationType::Backup,
            OperationType::Analytics,
            OperationType::Sync,
            OperationType::McpCall,
            OperationType::AgentCall,
            OperationType::AiAnalysis,
            OperationType::StoragePerGbDay,
        ]
        .into_iter()
        .filter_map(|op| op.base_cost(settings).map(|c| (op, c)))
        .collect()
    }
}

/// Cost of an operation against a shared repository.
///
/// `Some(0)` = included (rate limited only); `Some(n)` = fixed price;
/// `None` = dynamic (token-metered), the caller supplies the cost.
pub fn shared_repository_cost(repository: &str, operation: OperationType) -> Option<Decimal> {
    match operation {
        OperationType::AiTokens => None,
        OperationType::AgentCall | OperationType::AiAnalysis => Some(Decimal::new(100, 0)),
        // Reads against every shared dataset are included with the add-on.
        _ => {
            let _ = repository;
            Some(Decimal::ZERO)
        }
    }
}

/// Token prices per 1000 tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenPricing {
    pub input_per_1k: Decimal,
    pub output_per_1k: Decimal,
}

/// Pricing for an AI model, defaulting to the sonnet-class rates when the
/// model is unknown.
pub fn token_pricing(model: &str) -> TokenPricing {
    let sonnet = TokenPricing {
        input_per_1k: Decimal::new(1, 2),  // 0.01
        output_per_1k: Decimal::new(5, 2), // 0.05
    };
    let opus = TokenPricing {
        input_per_1k: Decimal::new(5, 2),   // 0.05
        output_per_1k: Decimal::new(25, 2), // 0.25
    };

    let model = model.to_ascii_lowercase();
    if model.contains("opus") {
        opus
    } else {
        sonnet
    }
}
