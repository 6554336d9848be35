use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::service::ServiceError;
use crate::state::AppState;
use crate::store::SdkScope;

/// Extractor for SDK requests, returns the project and environment the key is bound to
pub struct SdkClient(pub SdkScope);

impl<S> FromRequestParts<S> for SdkClient
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SdkScope>()
            .cloned()
            .map(SdkClient)
            .ok_or((StatusCode::UNAUTHORIZED, "missing sdk scope"))
    }
}

/// Middleware to resolve the SDK key and inject its scope
pub async fn require_sdk_key(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    // Get SDK key from X-SDK-Key header
    let sdk_key = req
        .headers()
        .get("x-sdk-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(ServiceError::MissingSdkKey)?;

    let scope = state.flags.resolve_sdk_key(sdk_key).await?;

    req.extensions_mut().insert(scope);
    Ok(next.run(req).await)
}
