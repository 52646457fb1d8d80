// Variables and indicators are plain records; reports and measurements refer
// to them by code and resolve their EPSA by code, creating it when new.

use super::{audit, does_not_exist, required_year, resolve_epsa, CODE_MAX, DESCRIPTION_MAX, NAME_MAX, SHORT_MAX};
use crate::db;
use crate::entities::performance as store;
use crate::entities::{Indicator, IndicatorMeasurement, Variable, VariableReport};
use crate::error::{Error, Result};
use crate::schema::FieldErrors;
use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;

// ============================================================================
// VARIABLES AND INDICATORS
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariablePayload {
    pub code: Option<String>,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub description: Option<String>,
}

impl VariablePayload {
    pub fn validate(&self) -> Result<Variable> {
        let mut errors = FieldErrors::default();

        let code = errors.text("code", self.code.as_deref(), CODE_MAX);
        let name = errors.text("name", self.name.as_deref(), NAME_MAX);
        let unit = errors.optional_text("unit", self.unit.as_deref(), SHORT_MAX);
        let description = errors.optional_text("description", self.description.as_deref(), DESCRIPTION_MAX);

        match (code, name) {
            (Some(code), Some(name)) if errors.is_empty() => Ok(Variable {
                id: 0,
                code,
                name,
                unit,
                description,
            }),
            _ => Err(Error::Validation(errors)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndicatorPayload {
    pub code: Option<String>,
    pub name: Option<String>,
    pub unit: Option<String>,
    /// Kept as given; `null` clears it
    pub formula: Option<serde_json::Value>,
    pub description: Option<String>,
}

impl IndicatorPayload {
    pub fn validate(&self) -> Result<Indicator> {
        let mut errors = FieldErrors::default();

        let code = errors.text("code", self.code.as_deref(), CODE_MAX);
        let name = errors.text("name", self.name.as_deref(), NAME_MAX);
        let unit = errors.optional_text("unit", self.unit.as_deref(), SHORT_MAX);
        let description = errors.optional_text("description", self.description.as_deref(), DESCRIPTION_MAX);
        let formula = self.formula.clone().filter(|f| !f.is_null());

        match (code, name) {
            (Some(code), Some(name)) if errors.is_empty() => Ok(Indicator {
                id: 0,
                code,
                name,
                unit,
                formula,
                description,
            }),
            _ => Err(Error::Validation(errors)),
        }
    }
}

/// Create (`id = None`) or replace a variable
pub fn save_variable(
    conn: &mut Connection,
    id: Option<i64>,
    payload: &VariablePayload,
    actor: &str,
) -> Result<Variable> {
    let variable = payload.validate()?;
    let event_type = if id.is_some() { "updated" } else { "created" };

    let saved = db::atomic(conn, |tx| {
        let saved = store::save_variable(tx, id, &variable)?;
        audit(tx, event_type, "variable", saved.id, &saved, actor)?;
        Ok(saved)
    })?;

    info!(code = %saved.code, actor, event_type, "Variable saved");
    Ok(saved)
}

/// Create (`id = None`) or replace an indicator
pub fn save_indicator(
    conn: &mut Connection,
    id: Option<i64>,
    payload: &IndicatorPayload,
    actor: &str,
) -> Result<Indicator> {
    let indicator = payload.validate()?;
    let event_type = if id.is_some() { "updated" } else { "created" };

    let saved = db::atomic(conn, |tx| {
        let saved = store::save_indicator(tx, id, &indicator)?;
        audit(tx, event_type, "indicator", saved.id, &saved, actor)?;
        Ok(saved)
    })?;

    info!(code = %saved.code, actor, event_type, "Indicator saved");
    Ok(saved)
}

pub fn delete_variable(conn: &mut Connection, id: i64, actor: &str) -> Result<()> {
    let deleted = db::atomic(conn, |tx| {
        let existing = store::get_variable(tx, id)?;
        store::delete_variable(tx, id)?;
        audit(tx, "deleted", "variable", id, &existing, actor)?;
        Ok(existing)
    })?;

    info!(id, code = %deleted.code, actor, "Variable deleted");
    Ok(())
}

pub fn delete_indicator(conn: &mut Connection, id: i64, actor: &str) -> Result<()> {
    let deleted = db::atomic(conn, |tx| {
        let existing = store::get_indicator(tx, id)?;
        store::delete_indicator(tx, id)?;
        audit(tx, "deleted", "indicator", id, &existing, actor)?;
        Ok(existing)
    })?;

    info!(id, code = %deleted.code, actor, "Indicator deleted");
    Ok(())
}

// ============================================================================
// REPORTS AND MEASUREMENTS
// ============================================================================

/// Body of a variable report or an indicator measurement
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YearlyValuePayload {
    pub epsa: Option<String>,
    /// Variable code (reports)
    pub variable: Option<String>,
    /// Indicator code (measurements)
    pub indicator: Option<String>,
    pub year: Option<i64>,
    pub value: Option<f64>,
}

/// Validated yearly value: (EPSA code, referenced code, year, value)
struct YearlyValue {
    epsa: String,
    reference: String,
    year: i64,
    value: f64,
}

impl YearlyValuePayload {
    fn validate(&self, reference_field: &str, reference: Option<&str>) -> Result<YearlyValue> {
        let mut errors = FieldErrors::default();

        let epsa = errors.text("epsa", self.epsa.as_deref(), CODE_MAX);
        let reference = errors.text(reference_field, reference, CODE_MAX);
        let year = required_year(&mut errors, "year", self.year);
        let value = errors.number("value", self.value);

        match (epsa, reference, year, value) {
            (Some(epsa), Some(reference), Some(year), Some(value)) if errors.is_empty() => {
                Ok(YearlyValue {
                    epsa,
                    reference,
                    year,
                    value,
                })
            }
            _ => Err(Error::Validation(errors)),
        }
    }
}

pub fn create_report(
    conn: &mut Connection,
    payload: &YearlyValuePayload,
    actor: &str,
) -> Result<VariableReport> {
    let valid = payload.validate("variable", payload.variable.as_deref())?;

    let report = db::atomic(conn, |tx| {
        let variable_id = store::find_variable_id(tx, &valid.reference)?
            .ok_or_else(|| Error::field("variable", does_not_exist(&valid.reference)))?;
        let epsa = resolve_epsa(tx, &valid.epsa, actor)?;
        let report = store::insert_report(tx, epsa.id, variable_id, valid.year, valid.value)?;
        audit(tx, "created", "variable_report", report.id, &report, actor)?;
        Ok(report)
    })?;

    info!(epsa = %report.epsa, variable = %report.variable, year = report.year, "Variable report created");
    Ok(report)
}

pub fn create_measurement(
    conn: &mut Connection,
    payload: &YearlyValuePayload,
    actor: &str,
) -> Result<IndicatorMeasurement> {
    let valid = payload.validate("indicator", payload.indicator.as_deref())?;

    let measurement = db::atomic(conn, |tx| {
        let indicator_id = store::find_indicator_id(tx, &valid.reference)?
            .ok_or_else(|| Error::field("indicator", does_not_exist(&valid.reference)))?;
        let epsa = resolve_epsa(tx, &valid.epsa, actor)?;
        let measurement =
            store::insert_measurement(tx, epsa.id, indicator_id, valid.year, valid.value)?;
        audit(tx, "created", "indicator_measurement", measurement.id, &measurement, actor)?;
        Ok(measurement)
    })?;

    info!(
        epsa = %measurement.epsa,
        indicator = %measurement.indicator,
        year = measurement.year,
        "Indicator measurement created"
    );
    Ok(measurement)
}

pub fn delete_report(conn: &mut Connection, id: i64, actor: &str) -> Result<()> {
    let deleted = db::atomic(conn, |tx| {
        let existing = store::get_report(tx, id)?;
        store::delete_report(tx, id)?;
        audit(tx, "deleted", "variable_report", id, &existing, actor)?;
        Ok(existing)
    })?;

    info!(id, epsa = %deleted.epsa, year = deleted.year, actor, "Variable report deleted");
    Ok(())
}

pub fn delete_measurement(conn: &mut Connection, id: i64, actor: &str) -> Result<()> {
    let deleted = db::atomic(conn, |tx| {
        let existing = store::get_measurement(tx, id)?;
        store::delete_measurement(tx, id)?;
        audit(tx, "deleted", "indicator_measurement", id, &existing, actor)?;
        Ok(existing)
    })?;

    info!(id, epsa = %deleted.epsa, year = deleted.year, actor, "Indicator measurement deleted");
    Ok(())
}
