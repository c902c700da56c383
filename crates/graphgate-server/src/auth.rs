//! Bearer-token authentication middleware.
//!
//! Token minting and validation live in an external collaborator; this layer
//! only resolves the token to a [`CurrentUser`] and stores it in request
//! extensions for handlers to read.

use crate::error::ApiError;
use crate::state::{AppState, CurrentUser};
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    let user = state
        .auth()
        .authenticate(token)
        .await
        .ok_or_else(|| ApiError::Unauthorized("invalid or expired token".into()))?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Extractor for the authenticated user placed by [`require_auth`].
pub struct AuthenticatedUser(pub CurrentUser);

#[async_trait::async_trait]
impl<S> axum::extract::FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .map(AuthenticatedUser)
            .ok_or_else(|| ApiError::Unauthorized("authentication required".into()))
    }
}
