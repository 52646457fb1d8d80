use super::{created, params, parse, render, AppState, Id};
use crate::entities::{epsa, performance, supply_area, ListFilter, Principal};
use crate::error::{Error, Result};
use crate::serializers::epsa::EpsaPayload;
use crate::serializers::performance::{IndicatorPayload, VariablePayload, YearlyValuePayload};
use crate::serializers::planning::{PlanPayload, PoaPayload};
use crate::serializers::sarh::SarhPayload;
use crate::serializers::supply_area::SupplyAreaPayload;
use crate::serializers::{self, planning, sarh};
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Extension, Json, Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;

type Body<T> = std::result::Result<Json<T>, JsonRejection>;
type Params = std::result::Result<Query<HashMap<String, String>>, QueryRejection>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/epsas", get(list_epsas).post(create_epsa))
        .route("/epsas/:id", get(get_epsa).put(update_epsa).delete(delete_epsa))
        .route("/variables", get(list_variables).post(create_variable))
        .route(
            "/variables/:id",
            get(get_variable).put(update_variable).delete(delete_variable),
        )
        .route("/indicators", get(list_indicators).post(create_indicator))
        .route(
            "/indicators/:id",
            get(get_indicator).put(update_indicator).delete(delete_indicator),
        )
        .route("/variable-reports", get(list_reports).post(create_report))
        .route("/variable-reports/:id", get(get_report).delete(delete_report))
        .route(
            "/indicator-measurements",
            get(list_measurements).post(create_measurement),
        )
        .route(
            "/indicator-measurements/:id",
            get(get_measurement).delete(delete_measurement),
        )
        .route("/poas", get(list_poas).post(create_poa))
        .route("/poas/:id", get(get_poa).delete(delete_poa))
        .route("/plans", get(list_plans).post(create_plan))
        .route("/plans/:id", get(get_plan).delete(delete_plan))
        .route("/supply-areas", get(list_supply_areas).post(create_supply_area))
        .route(
            "/supply-areas/:id",
            get(get_supply_area).delete(delete_supply_area),
        )
        .route("/sarhs", get(list_sarhs).post(create_sarh))
        .route("/sarhs/:id", get(get_sarh).delete(delete_sarh))
}

/// `?epsa=CODE&year=YYYY`
fn list_filter(params: &HashMap<String, String>) -> Result<ListFilter> {
    let year = match params.get("year") {
        None => None,
        Some(raw) => Some(
            raw.trim()
                .parse::<i64>()
                .map_err(|_| Error::field("year", "A valid integer is required."))?,
        ),
    };

    Ok(ListFilter {
        epsa: params.get("epsa").cloned(),
        year,
    })
}

/// `?epsa=CODE` for resources that have no reporting year
fn epsa_filter(params: &HashMap<String, String>) -> Result<ListFilter> {
    if params.contains_key("year") {
        return Err(Error::field("year", "Filtering by year is not supported here."));
    }

    Ok(ListFilter {
        epsa: params.get("epsa").cloned(),
        year: None,
    })
}

type Created = Result<(StatusCode, Json<Value>)>;

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health
pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "version": crate::VERSION}))
}

// --- EPSA -------------------------------------------------------------------

async fn list_epsas(State(state): State<AppState>, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let conn = state.conn()?;
    render(&epsa::list(&conn)?, &params)
}

async fn get_epsa(State(state): State<AppState>, Id(id): Id, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let conn = state.conn()?;
    render(&epsa::get(&conn, id)?, &params)
}

async fn create_epsa(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Body<EpsaPayload>,
) -> Created {
    let payload = parse(body)?;
    let mut conn = state.conn()?;
    created(&serializers::epsa::create(&mut conn, &payload, principal.actor())?)
}

async fn update_epsa(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Id(id): Id,
    body: Body<EpsaPayload>,
) -> Result<Json<Value>> {
    let payload = parse(body)?;
    let mut conn = state.conn()?;
    let updated = serializers::epsa::update(&mut conn, id, &payload, principal.actor())?;
    Ok(Json(serde_json::to_value(updated)?))
}

async fn delete_epsa(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Id(id): Id,
) -> Result<StatusCode> {
    let mut conn = state.conn()?;
    serializers::epsa::delete(&mut conn, id, principal.actor())?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Variables and indicators ----------------------------------------------

async fn list_variables(State(state): State<AppState>, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let conn = state.conn()?;
    render(&performance::list_variables(&conn)?, &params)
}

async fn get_variable(State(state): State<AppState>, Id(id): Id, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let conn = state.conn()?;
    render(&performance::get_variable(&conn, id)?, &params)
}

async fn create_variable(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Body<VariablePayload>,
) -> Created {
    let payload = parse(body)?;
    let mut conn = state.conn()?;
    let saved = serializers::performance::save_variable(&mut conn, None, &payload, principal.actor())?;
    created(&saved)
}

async fn update_variable(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Id(id): Id,
    body: Body<VariablePayload>,
) -> Result<Json<Value>> {
    let payload = parse(body)?;
    let mut conn = state.conn()?;
    let saved = serializers::performance::save_variable(&mut conn, Some(id), &payload, principal.actor())?;
    Ok(Json(serde_json::to_value(saved)?))
}

async fn delete_variable(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Id(id): Id,
) -> Result<StatusCode> {
    let mut conn = state.conn()?;
    serializers::performance::delete_variable(&mut conn, id, principal.actor())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_indicators(State(state): State<AppState>, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let conn = state.conn()?;
    render(&performance::list_indicators(&conn)?, &params)
}

async fn get_indicator(State(state): State<AppState>, Id(id): Id, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let conn = state.conn()?;
    render(&performance::get_indicator(&conn, id)?, &params)
}

async fn create_indicator(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Body<IndicatorPayload>,
) -> Created {
    let payload = parse(body)?;
    let mut conn = state.conn()?;
    let saved = serializers::performance::save_indicator(&mut conn, None, &payload, principal.actor())?;
    created(&saved)
}

async fn update_indicator(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Id(id): Id,
    body: Body<IndicatorPayload>,
) -> Result<Json<Value>> {
    let payload = parse(body)?;
    let mut conn = state.conn()?;
    let saved = serializers::performance::save_indicator(&mut conn, Some(id), &payload, principal.actor())?;
    Ok(Json(serde_json::to_value(saved)?))
}

async fn delete_indicator(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Id(id): Id,
) -> Result<StatusCode> {
    let mut conn = state.conn()?;
    serializers::performance::delete_indicator(&mut conn, id, principal.actor())?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Reports and measurements -----------------------------------------------

async fn list_reports(State(state): State<AppState>, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let filter = list_filter(&params)?;
    let conn = state.conn()?;
    render(&performance::list_reports(&conn, &filter)?, &params)
}

async fn get_report(State(state): State<AppState>, Id(id): Id, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let conn = state.conn()?;
    render(&performance::get_report(&conn, id)?, &params)
}

async fn create_report(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Body<YearlyValuePayload>,
) -> Created {
    let payload = parse(body)?;
    let mut conn = state.conn()?;
    created(&serializers::performance::create_report(&mut conn, &payload, principal.actor())?)
}

async fn delete_report(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Id(id): Id,
) -> Result<StatusCode> {
    let mut conn = state.conn()?;
    serializers::performance::delete_report(&mut conn, id, principal.actor())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_measurements(State(state): State<AppState>, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let filter = list_filter(&params)?;
    let conn = state.conn()?;
    render(&performance::list_measurements(&conn, &filter)?, &params)
}

async fn get_measurement(State(state): State<AppState>, Id(id): Id, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let conn = state.conn()?;
    render(&performance::get_measurement(&conn, id)?, &params)
}

async fn create_measurement(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Body<YearlyValuePayload>,
) -> Created {
    let payload = parse(body)?;
    let mut conn = state.conn()?;
    created(&serializers::performance::create_measurement(&mut conn, &payload, principal.actor())?)
}

async fn delete_measurement(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Id(id): Id,
) -> Result<StatusCode> {
    let mut conn = state.conn()?;
    serializers::performance::delete_measurement(&mut conn, id, principal.actor())?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Planning ---------------------------------------------------------------

async fn list_poas(State(state): State<AppState>, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let filter = list_filter(&params)?;
    let conn = state.conn()?;
    render(&planning::list_poa_details(&conn, &filter)?, &params)
}

async fn get_poa(State(state): State<AppState>, Id(id): Id, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let conn = state.conn()?;
    render(&planning::poa_detail(&conn, id)?, &params)
}

async fn create_poa(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Body<PoaPayload>,
) -> Created {
    let payload = parse(body)?;
    let mut conn = state.conn()?;
    created(&planning::create_poa(&mut conn, &payload, principal.actor())?)
}

async fn delete_poa(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Id(id): Id,
) -> Result<StatusCode> {
    let mut conn = state.conn()?;
    planning::delete_poa(&mut conn, id, principal.actor())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_plans(State(state): State<AppState>, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let filter = list_filter(&params)?;
    let conn = state.conn()?;
    render(&planning::list_plan_details(&conn, &filter)?, &params)
}

async fn get_plan(State(state): State<AppState>, Id(id): Id, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let conn = state.conn()?;
    render(&planning::plan_detail(&conn, id)?, &params)
}

async fn create_plan(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Body<PlanPayload>,
) -> Created {
    let payload = parse(body)?;
    let mut conn = state.conn()?;
    created(&planning::create_plan(&mut conn, &payload, principal.actor())?)
}

async fn delete_plan(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Id(id): Id,
) -> Result<StatusCode> {
    let mut conn = state.conn()?;
    planning::delete_plan(&mut conn, id, principal.actor())?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Supply areas and SARH --------------------------------------------------

async fn list_supply_areas(State(state): State<AppState>, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let filter = epsa_filter(&params)?;
    let conn = state.conn()?;
    render(&supply_area::list(&conn, &filter)?, &params)
}

async fn get_supply_area(State(state): State<AppState>, Id(id): Id, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let conn = state.conn()?;
    render(&supply_area::get(&conn, id)?, &params)
}

async fn create_supply_area(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Body<SupplyAreaPayload>,
) -> Created {
    let payload = parse(body)?;
    let mut conn = state.conn()?;
    created(&serializers::supply_area::create(&mut conn, &payload, principal.actor())?)
}

async fn delete_supply_area(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Id(id): Id,
) -> Result<StatusCode> {
    let mut conn = state.conn()?;
    serializers::supply_area::delete(&mut conn, id, principal.actor())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_sarhs(State(state): State<AppState>, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let filter = epsa_filter(&params)?;
    let conn = state.conn()?;
    render(&sarh::list_details(&conn, &filter)?, &params)
}

async fn get_sarh(State(state): State<AppState>, Id(id): Id, query: Params) -> Result<Json<Value>> {
    let params = params(query)?;
    let conn = state.conn()?;
    render(&sarh::detail(&conn, id)?, &params)
}

async fn create_sarh(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Body<SarhPayload>,
) -> Created {
    let payload = parse(body)?;
    let mut conn = state.conn()?;
    created(&sarh::create(&mut conn, &payload, principal.actor())?)
}

async fn delete_sarh(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Id(id): Id,
) -> Result<StatusCode> {
    let mut conn = state.conn()?;
    sarh::delete(&mut conn, id, principal.actor())?;
    Ok(StatusCode::NO_CONTENT)
}
