use super::{params, AppState};
use crate::admin::{self, ChangeList, ChangeListQuery};
use crate::db::Event;
use crate::error::{Error, Result};
use axum::{
    extract::rejection::{PathRejection, QueryRejection},
    extract::{Json, Path, Query, State},
    routing::get,
    Router,
};
use std::collections::HashMap;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:screen", get(changelist))
        .route("/history/:entity/:id", get(history))
}

/// GET /admin/:screen?q=&p=&<filter>=
async fn changelist(
    State(state): State<AppState>,
    Path(screen): Path<String>,
    query: std::result::Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Result<Json<ChangeList>> {
    let screen = admin::screen(&screen).ok_or(Error::NotFound)?;
    let query = ChangeListQuery::from_params(&params(query)?)?;

    let conn = state.conn()?;
    Ok(Json(admin::changelist(&conn, screen, &query)?))
}

/// GET /admin/history/:entity/:id
async fn history(
    State(state): State<AppState>,
    path: std::result::Result<Path<(String, i64)>, PathRejection>,
) -> Result<Json<Vec<Event>>> {
    let Path((entity, id)) = path.map_err(|_| Error::NotFound)?;
    let conn = state.conn()?;
    Ok(Json(admin::history(&conn, &entity, id)?))
}
