// REST API - axum router over the serializers
//
//   /api/health                          open
//   /api/<resource>[/:id]                permission gate (read: everyone allowed in, write: superuser)
//   /admin/:screen, /admin/history/...   superusers only

mod admin;
mod auth;
mod handlers;

use crate::error::{Error, Result};
use crate::fields::FieldSelection;
use crate::permissions::Policy;
use axum::{
    async_trait,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{FromRequestParts, Json, Path, Query},
    http::{header, request::Parts, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub policy: Policy,
}

impl AppState {
    pub fn new(conn: Connection, policy: Policy) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            policy,
        }
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| Error::Internal("database lock poisoned"))
    }
}

pub fn router(state: AppState) -> Router {
    let api = handlers::routes()
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::authorize))
        .route("/health", get(handlers::health));

    let back_office = admin::routes()
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::authorize_admin));

    Router::new()
        .nest("/api", api)
        .nest("/admin", back_office)
        .with_state(state)
}

// ============================================================================
// Responses
// ============================================================================

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::Parse(_) => StatusCode::BAD_REQUEST,
            Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::NotAuthenticated | Error::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if !self.is_client_error() {
            error!(error = %self, "Request failed");
            return (status, Json(json!({"detail": "A server error occurred."}))).into_response();
        }

        let mut response = match self {
            Error::Validation(errors) => (status, Json(errors)).into_response(),
            other => detail(status, &other),
        };
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Token"));
        }
        response
    }
}

fn detail(status: StatusCode, error: &Error) -> Response {
    (status, Json(json!({"detail": error.to_string()}))).into_response()
}

/// Unwrap a JSON body: malformed input is a 400, a missing JSON content type a 415
pub(crate) fn parse<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(rejection)) => {
            warn!(status = %rejection.status(), "Rejected request body");
            Err(Error::UnsupportedMediaType(rejection.body_text()))
        }
        Err(rejection) => {
            warn!(status = %rejection.status(), "Rejected request body");
            Err(Error::Parse(rejection.body_text()))
        }
    }
}

/// Numeric record id from the path; anything that does not parse is an unknown record
pub(crate) struct Id(pub i64);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Id {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Path(id) = Path::<i64>::from_request_parts(parts, state).await.map_err(|rejection| {
            debug!(reason = %rejection.body_text(), "Unparseable record id");
            Error::NotFound
        })?;
        Ok(Id(id))
    }
}

/// Query string as a flat map
pub(crate) fn params(
    query: std::result::Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Result<HashMap<String, String>> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| Error::Parse(rejection.body_text()))
}

/// Serialize `data`, honouring `?fields=` / `?fields!=`
pub(crate) fn render<T: Serialize>(data: &T, params: &HashMap<String, String>) -> Result<Json<Value>> {
    Ok(Json(FieldSelection::from_query(params).render(data)?))
}

pub(crate) fn created<T: Serialize>(data: &T) -> Result<(StatusCode, Json<Value>)> {
    Ok((StatusCode::CREATED, Json(serde_json::to_value(data)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(Error::NotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::UnsupportedMediaType("x".into()).into_response().status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(Error::field("year", "bad").into_response().status(), StatusCode::BAD_REQUEST);

        let unauthorized = Error::AuthenticationFailed.into_response();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unauthorized.headers()[header::WWW_AUTHENTICATE], "Token");
    }

    #[test]
    fn test_server_errors_are_generic() {
        let error = Error::Internal("database lock poisoned");
        assert!(!error.is_client_error());
        assert!(Error::PermissionDenied.is_client_error());

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }
}
