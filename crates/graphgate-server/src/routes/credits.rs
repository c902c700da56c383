//! Credit inspection endpoints.

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::models::{BalanceCheckQuery, TransactionQuery};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use graphgate_credits::{BalanceCheck, OperationType, TransactionFilter, TransactionType};
use rust_decimal::Decimal;
use serde_json::json;

/// `GET /v1/graphs/{graph_id}/credits/summary`
pub async fn credit_summary(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
    AuthenticatedUser(_user): AuthenticatedUser,
) -> Result<Response, ApiError> {
    match state.credits().credit_summary(&graph_id).await? {
        Some(summary) => Ok(Json(summary).into_response()),
        None => Err(ApiError::PaymentRequired(format!(
            "No credit pool found for graph {graph_id}"
        ))),
    }
}

/// `GET /v1/graphs/{graph_id}/credits/transactions`
pub async fn credit_transactions(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
    Query(query): Query<TransactionQuery>,
    AuthenticatedUser(_user): AuthenticatedUser,
) -> Result<Response, ApiError> {
    let transaction_type = match query.transaction_type.as_deref() {
        Some(name) => Some(TransactionType::from_name(name).ok_or_else(|| {
            ApiError::BadRequest(format!("unknown transaction type {name:?}"))
        })?),
        None => None,
    };

    let filter = TransactionFilter {
        transaction_type,
        operation_type: query.operation_type.clone(),
        start_date: query.start_date,
        end_date: query.end_date,
        limit: Some(query.limit.unwrap_or(100).min(1000)),
    };

    let transactions = state.credits().transactions(&graph_id, &filter).await?;
    Ok(Json(json!({
        "graph_id": graph_id,
        "count": transactions.len(),
        "transactions": transactions,
    }))
    .into_response())
}

/// `GET /v1/graphs/{graph_id}/credits/balance/check`
pub async fn balance_check(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
    Query(query): Query<BalanceCheckQuery>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Response, ApiError> {
    let operation = OperationType::from_name(&query.operation_type).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "unknown operation type {:?}",
            query.operation_type
        ))
    })?;

    let required = query
        .base_cost
        .or_else(|| operation.base_cost(state.credits().settings()))
        .unwrap_or(Decimal::ZERO);

    let check = state
        .credits()
        .check_balance(&graph_id, required, Some(&user.id), operation)
        .await?;

    let body = match check {
        BalanceCheck::Sufficient {
            required,
            available,
            cached,
            pool,
            included,
        } => json!({
            "has_sufficient_credits": true,
            "required_credits": required,
            "available_credits": available,
            "cached": cached,
            "repository_type": pool,
            "operation_included": included,
        }),
        BalanceCheck::Insufficient {
            required,
            available,
            pool,
        } => json!({
            "has_sufficient_credits": false,
            "required_credits": required,
            "available_credits": available,
            "repository_type": pool,
        }),
        BalanceCheck::AccessDenied { reason, .. } => return Err(ApiError::Forbidden(reason)),
        BalanceCheck::NoPool { graph_id } => {
            return Err(ApiError::PaymentRequired(format!(
                "No credit pool found for graph {graph_id}"
            )))
        }
    };

    Ok(Json(body).into_response())
}

/// `GET /v1/graphs/{graph_id}/credits/storage/limits`
pub async fn storage_limits(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
    AuthenticatedUser(_user): AuthenticatedUser,
) -> Result<Response, ApiError> {
    // Current usage comes from the latest storage snapshot; the in-process
    // gateway reports the limit with zero usage when no snapshot exists.
    match state
        .credits()
        .check_storage_limit(&graph_id, Decimal::ZERO)
        .await?
    {
        Some(check) => Ok(Json(check).into_response()),
        None => Err(ApiError::BadRequest(
            "Storage limits are not applicable for shared repositories".into(),
        )),
    }
}
