// Request authentication: `Authorization: Token <key>` (or `Bearer <key>`).
// No header means an anonymous principal; a header with an unknown key is a 401.

use super::AppState;
use crate::entities::{user, Principal};
use crate::error::{Error, Result};
use crate::permissions;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

fn bearer_key(headers: &HeaderMap) -> Result<Option<&str>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| Error::AuthenticationFailed)?;

    match value.split_once(' ') {
        Some((scheme, key))
            if (scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer"))
                && !key.trim().is_empty() =>
        {
            Ok(Some(key.trim()))
        }
        _ => Err(Error::AuthenticationFailed),
    }
}

fn principal(state: &AppState, headers: &HeaderMap) -> Result<Principal> {
    let Some(key) = bearer_key(headers)? else {
        return Ok(Principal::Anonymous);
    };

    let conn = state.conn()?;
    match user::find_by_token(&conn, key)? {
        Some(user) => Ok(Principal::User(user)),
        None => Err(Error::AuthenticationFailed),
    }
}

/// Resolve the principal and apply the read/write permission rule
pub async fn authorize(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let principal = principal(&state, request.headers())?;
    let method = request.method().as_str().to_string();

    if let Err(denied) = permissions::check(&method, &principal, state.policy) {
        warn!(method = %method, path = %request.uri().path(), actor = principal.actor(), "Permission denied");
        return Err(denied);
    }

    debug!(method = %method, actor = principal.actor(), "Request authorized");
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Back-office screens: superusers only, whatever the method
pub async fn authorize_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let principal = principal(&state, request.headers())?;

    if let Err(denied) = permissions::check_admin(&principal) {
        warn!(path = %request.uri().path(), actor = principal.actor(), "Back-office access denied");
        return Err(denied);
    }

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
