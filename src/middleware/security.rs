use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Reject requests whose Host header is not in the configured allow
/// list. A `*` entry disables the check (useful behind a proxy that
/// already enforces it).
pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> AppResult<Response> {
    let trusted = &state.config.trusted_hosts;
    if trusted.iter().any(|host| host.trim() == "*") {
        return Ok(next.run(request).await);
    }

    let host = request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(':').next().unwrap_or(value).trim().to_string())
        .unwrap_or_default();

    if host.is_empty() || !trusted.iter().any(|allowed| allowed.eq_ignore_ascii_case(&host)) {
        return Err(AppError::BadRequest(format!("Untrusted host: {host}")));
    }

    Ok(next.run(request).await)
}

/// Guard for internal endpoints (overdue sweep). Requires the
/// configured API key in `x-internal-api-key`.
pub fn require_internal_api_key(
    state: &AppState,
    headers: &axum::http::HeaderMap,
) -> AppResult<()> {
    let Some(expected) = state.config.internal_api_key.as_deref() else {
        return Err(AppError::Unauthorized(
            "INTERNAL_API_KEY is not configured.".to_string(),
        ));
    };

    let provided = headers
        .get("x-internal-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if provided != expected {
        return Err(AppError::Unauthorized("Invalid internal API key.".to_string()));
    }

    Ok(())
}
