use super::{audit, children, CODE_MAX, NAME_MAX};
use crate::db;
use crate::entities::{epsa, Category, Department, Epsa, EpsaFields};
use crate::error::{Error, Result};
use crate::schema::FieldErrors;
use rusqlite::Connection;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EpsaPayload {
    pub code: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub state: Option<String>,
}

impl EpsaPayload {
    pub fn validate(&self) -> Result<EpsaFields> {
        let mut errors = FieldErrors::default();

        let code = errors.text("code", self.code.as_deref(), CODE_MAX);
        let name = errors.text("name", self.name.as_deref(), NAME_MAX);
        let category = errors.optional_choice("category", self.category.as_deref(), Category::parse);
        let state = errors.optional_choice("state", self.state.as_deref(), Department::parse);

        match (code, name) {
            (Some(code), Some(name)) if errors.is_empty() => Ok(EpsaFields {
                code,
                name,
                category,
                state,
            }),
            _ => Err(Error::Validation(errors)),
        }
    }
}

pub fn create(conn: &mut Connection, payload: &EpsaPayload, actor: &str) -> Result<Epsa> {
    let fields = payload.validate()?;

    let created = db::atomic(conn, |tx| {
        let created = epsa::insert(tx, &fields)?;
        audit(tx, "created", "epsa", created.id, &created, actor)?;
        Ok(created)
    })?;

    info!(code = %created.code, actor, "EPSA created");
    Ok(created)
}

pub fn update(conn: &mut Connection, id: i64, payload: &EpsaPayload, actor: &str) -> Result<Epsa> {
    let fields = payload.validate()?;

    let updated = db::atomic(conn, |tx| {
        let updated = epsa::update(tx, id, &fields)?;
        audit(tx, "updated", "epsa", id, &updated, actor)?;
        Ok(updated)
    })?;

    info!(code = %updated.code, actor, "EPSA updated");
    Ok(updated)
}

/// Delete an EPSA together with everything that hangs from it
pub fn delete(conn: &mut Connection, id: i64, actor: &str) -> Result<()> {
    db::atomic(conn, |tx| {
        let existing = epsa::get(tx, id)?;
        epsa::delete(tx, id)?;
        audit(tx, "deleted", "epsa", id, &existing, actor)
    })?;

    info!(id, actor, "EPSA deleted");
    Ok(())
}

// ============================================================================
// BULK IMPORT
// ============================================================================

/// Outcome of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
}

/// Read EPSA rows from a CSV file with a `code,name,category,state` header
pub fn load_csv(csv_path: &Path) -> Result<Vec<EpsaPayload>> {
    let mut rdr = csv::Reader::from_path(csv_path)?;

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: EpsaPayload = result?;
        rows.push(row);
    }

    Ok(rows)
}

/// Upsert every row by code in one transaction; any invalid row aborts the import.
/// Row errors are reported under `rows`, at the row's index.
pub fn import(conn: &mut Connection, rows: &[EpsaPayload], actor: &str) -> Result<ImportSummary> {
    let mut errors = FieldErrors::default();
    let valid = children(&mut errors, "rows", rows, |row, row_errors| match row.validate() {
        Ok(fields) => Some(fields),
        Err(Error::Validation(e)) => {
            *row_errors = e;
            None
        }
        Err(other) => {
            row_errors.add(FieldErrors::NON_FIELD, other.to_string());
            None
        }
    });
    errors.into_result()?;

    let summary = db::atomic(conn, |tx| {
        let mut summary = ImportSummary::default();
        for fields in &valid {
            let created = epsa::upsert(tx, fields)?;
            let stored = epsa::find_by_code(tx, &fields.code)?
                .ok_or(Error::Internal("EPSA missing after upsert"))?;
            let event_type = if created { "created" } else { "updated" };
            audit(tx, event_type, "epsa", stored.id, &stored, actor)?;

            if created {
                summary.created += 1;
            } else {
                summary.updated += 1;
            }
        }
        Ok(summary)
    })?;

    info!(created = summary.created, updated = summary.updated, actor, "EPSA import finished");
    Ok(summary)
}
