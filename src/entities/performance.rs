// Performance registry: variables reported by each EPSA and the indicators
// computed from them, with one value per (EPSA, variable|indicator, year).

use super::ListFilter;
use crate::error::{map_unique, Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

/// Reported quantity (e.g. connections, billed volume)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub unit: Option<String>,
    pub description: Option<String>,
}

/// Performance indicator; `formula` is an opaque JSON expression over variable codes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Indicator {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub unit: Option<String>,
    pub formula: Option<serde_json::Value>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableReport {
    pub id: i64,
    /// EPSA code
    pub epsa: String,
    /// Variable code
    pub variable: String,
    pub year: i64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorMeasurement {
    pub id: i64,
    /// EPSA code
    pub epsa: String,
    /// Indicator code
    pub indicator: String,
    pub year: i64,
    pub value: f64,
}

// ============================================================================
// VARIABLES
// ============================================================================

fn variable_from_row(row: &Row<'_>) -> rusqlite::Result<Variable> {
    Ok(Variable {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        unit: row.get(3)?,
        description: row.get(4)?,
    })
}

/// Insert (`id = None`) or overwrite a variable
pub fn save_variable(conn: &Connection, id: Option<i64>, v: &Variable) -> Result<Variable> {
    let id = match id {
        None => {
            conn.execute(
                "INSERT INTO variables (code, name, unit, description) VALUES (?1, ?2, ?3, ?4)",
                params![v.code, v.name, v.unit, v.description],
            )
            .map_err(|e| map_unique(e, "variable", &["code"]))?;
            conn.last_insert_rowid()
        }
        Some(id) => {
            let changed = conn
                .execute(
                    "UPDATE variables SET code = ?1, name = ?2, unit = ?3, description = ?4
                     WHERE id = ?5",
                    params![v.code, v.name, v.unit, v.description, id],
                )
                .map_err(|e| map_unique(e, "variable", &["code"]))?;
            if changed == 0 {
                return Err(Error::NotFound);
            }
            id
        }
    };
    get_variable(conn, id)
}

pub fn get_variable(conn: &Connection, id: i64) -> Result<Variable> {
    conn.query_row(
        "SELECT id, code, name, unit, description FROM variables WHERE id = ?1",
        [id],
        variable_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound)
}

pub fn find_variable_id(conn: &Connection, code: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT id FROM variables WHERE code = ?1", [code], |row| {
            row.get(0)
        })
        .optional()?)
}

pub fn list_variables(conn: &Connection) -> Result<Vec<Variable>> {
    let mut stmt =
        conn.prepare("SELECT id, code, name, unit, description FROM variables ORDER BY code")?;
    let rows = stmt
        .query_map([], variable_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_variable(conn: &Connection, id: i64) -> Result<()> {
    delete_by_id(conn, "variables", id)
}

// ============================================================================
// INDICATORS
// ============================================================================

fn indicator_from_row(row: &Row<'_>) -> rusqlite::Result<Indicator> {
    let formula: Option<String> = row.get(4)?;
    let formula = formula
        .map(|json| serde_json::from_str::<serde_json::Value>(&json))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Indicator {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        unit: row.get(3)?,
        formula,
        description: row.get(5)?,
    })
}

/// Insert (`id = None`) or overwrite an indicator
pub fn save_indicator(conn: &Connection, id: Option<i64>, i: &Indicator) -> Result<Indicator> {
    let formula = i.formula.as_ref().map(serde_json::to_string).transpose()?;
    let id = match id {
        None => {
            conn.execute(
                "INSERT INTO indicators (code, name, unit, formula, description)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![i.code, i.name, i.unit, formula, i.description],
            )
            .map_err(|e| map_unique(e, "indicator", &["code"]))?;
            conn.last_insert_rowid()
        }
        Some(id) => {
            let changed = conn
                .execute(
                    "UPDATE indicators SET code = ?1, name = ?2, unit = ?3, formula = ?4,
                     description = ?5 WHERE id = ?6",
                    params![i.code, i.name, i.unit, formula, i.description, id],
                )
                .map_err(|e| map_unique(e, "indicator", &["code"]))?;
            if changed == 0 {
                return Err(Error::NotFound);
            }
            id
        }
    };
    get_indicator(conn, id)
}

pub fn get_indicator(conn: &Connection, id: i64) -> Result<Indicator> {
    conn.query_row(
        "SELECT id, code, name, unit, formula, description FROM indicators WHERE id = ?1",
        [id],
        indicator_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound)
}

pub fn find_indicator_id(conn: &Connection, code: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT id FROM indicators WHERE code = ?1", [code], |row| {
            row.get(0)
        })
        .optional()?)
}

pub fn list_indicators(conn: &Connection) -> Result<Vec<Indicator>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, name, unit, formula, description FROM indicators ORDER BY code",
    )?;
    let rows = stmt
        .query_map([], indicator_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_indicator(conn: &Connection, id: i64) -> Result<()> {
    delete_by_id(conn, "indicators", id)
}

// ============================================================================
// REPORTS AND MEASUREMENTS
// ============================================================================

const REPORT_SELECT: &str = "SELECT r.id, e.code, v.code, r.year, r.value
     FROM variable_reports r
     JOIN epsas e ON e.id = r.epsa_id
     JOIN variables v ON v.id = r.variable_id";

const MEASUREMENT_SELECT: &str = "SELECT m.id, e.code, i.code, m.year, m.value
     FROM indicator_measurements m
     JOIN epsas e ON e.id = m.epsa_id
     JOIN indicators i ON i.id = m.indicator_id";

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<VariableReport> {
    Ok(VariableReport {
        id: row.get(0)?,
        epsa: row.get(1)?,
        variable: row.get(2)?,
        year: row.get(3)?,
        value: row.get(4)?,
    })
}

fn measurement_from_row(row: &Row<'_>) -> rusqlite::Result<IndicatorMeasurement> {
    Ok(IndicatorMeasurement {
        id: row.get(0)?,
        epsa: row.get(1)?,
        indicator: row.get(2)?,
        year: row.get(3)?,
        value: row.get(4)?,
    })
}

pub fn insert_report(
    conn: &Connection,
    epsa_id: i64,
    variable_id: i64,
    year: i64,
    value: f64,
) -> Result<VariableReport> {
    conn.execute(
        "INSERT INTO variable_reports (epsa_id, variable_id, year, value) VALUES (?1, ?2, ?3, ?4)",
        params![epsa_id, variable_id, year, value],
    )
    .map_err(|e| map_unique(e, "variable report", &["epsa", "variable", "year"]))?;

    get_report(conn, conn.last_insert_rowid())
}

pub fn get_report(conn: &Connection, id: i64) -> Result<VariableReport> {
    conn.query_row(&format!("{REPORT_SELECT} WHERE r.id = ?1"), [id], report_from_row)
        .optional()?
        .ok_or(Error::NotFound)
}

pub fn list_reports(conn: &Connection, filter: &ListFilter) -> Result<Vec<VariableReport>> {
    let mut stmt = conn.prepare(&format!(
        "{REPORT_SELECT}
         WHERE (?1 IS NULL OR e.code = ?1) AND (?2 IS NULL OR r.year = ?2)
         ORDER BY e.code, r.year, v.code"
    ))?;
    let rows = stmt
        .query_map(params![filter.epsa, filter.year], report_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_report(conn: &Connection, id: i64) -> Result<()> {
    delete_by_id(conn, "variable_reports", id)
}

pub fn insert_measurement(
    conn: &Connection,
    epsa_id: i64,
    indicator_id: i64,
    year: i64,
    value: f64,
) -> Result<IndicatorMeasurement> {
    conn.execute(
        "INSERT INTO indicator_measurements (epsa_id, indicator_id, year, value)
         VALUES (?1, ?2, ?3, ?4)",
        params![epsa_id, indicator_id, year, value],
    )
    .map_err(|e| map_unique(e, "indicator measurement", &["epsa", "indicator", "year"]))?;

    get_measurement(conn, conn.last_insert_rowid())
}

pub fn get_measurement(conn: &Connection, id: i64) -> Result<IndicatorMeasurement> {
    conn.query_row(
        &format!("{MEASUREMENT_SELECT} WHERE m.id = ?1"),
        [id],
        measurement_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound)
}

pub fn list_measurements(
    conn: &Connection,
    filter: &ListFilter,
) -> Result<Vec<IndicatorMeasurement>> {
    let mut stmt = conn.prepare(&format!(
        "{MEASUREMENT_SELECT}
         WHERE (?1 IS NULL OR e.code = ?1) AND (?2 IS NULL OR m.year = ?2)
         ORDER BY e.code, m.year, i.code"
    ))?;
    let rows = stmt
        .query_map(params![filter.epsa, filter.year], measurement_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_measurement(conn: &Connection, id: i64) -> Result<()> {
    delete_by_id(conn, "indicator_measurements", id)
}

fn delete_by_id(conn: &Connection, table: &str, id: i64) -> Result<()> {
    let deleted = conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), [id])?;
    if deleted == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::entities::epsa;

    fn variable(code: &str) -> Variable {
        Variable {
            id: 0,
            code: code.to_string(),
            name: format!("Variable {code}"),
            unit: Some("m3".to_string()),
            description: None,
        }
    }

    #[test]
    fn test_variable_crud() {
        let conn = db::open_in_memory().unwrap();

        let created = save_variable(&conn, None, &variable("V1")).unwrap();
        assert_eq!(find_variable_id(&conn, "V1").unwrap(), Some(created.id));

        let mut changed = created.clone();
        changed.name = "Volumen facturado".to_string();
        let updated = save_variable(&conn, Some(created.id), &changed).unwrap();
        assert_eq!(updated.name, "Volumen facturado");

        delete_variable(&conn, created.id).unwrap();
        assert!(list_variables(&conn).unwrap().is_empty());
        assert!(matches!(
            save_variable(&conn, Some(created.id), &changed),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_indicator_formula_round_trips_as_json() {
        let conn = db::open_in_memory().unwrap();
        let indicator = Indicator {
            id: 0,
            code: "I1".to_string(),
            name: "Cobertura".to_string(),
            unit: Some("%".to_string()),
            formula: Some(serde_json::json!({"div": ["V2", "V1"]})),
            description: None,
        };

        let saved = save_indicator(&conn, None, &indicator).unwrap();

        assert_eq!(saved.formula, indicator.formula);
        assert_eq!(list_indicators(&conn).unwrap(), vec![saved]);
    }

    #[test]
    fn test_report_unique_per_epsa_variable_year() {
        let conn = db::open_in_memory().unwrap();
        let (epsa, _) = epsa::get_or_create(&conn, "SEMAPA").unwrap();
        let v = save_variable(&conn, None, &variable("V1")).unwrap();

        let report = insert_report(&conn, epsa.id, v.id, 2022, 10.5).unwrap();
        assert_eq!(report.epsa, "SEMAPA");
        assert_eq!(report.variable, "V1");

        match insert_report(&conn, epsa.id, v.id, 2022, 11.0) {
            Err(Error::Validation(errors)) => assert_eq!(
                errors.messages("non_field_errors"),
                ["The fields epsa, variable, year must make a unique set."]
            ),
            other => panic!("expected validation error, got {:?}", other),
        }

        insert_report(&conn, epsa.id, v.id, 2023, 12.0).unwrap();
        let filter = ListFilter {
            epsa: Some("SEMAPA".to_string()),
            year: Some(2023),
        };
        assert_eq!(list_reports(&conn, &filter).unwrap().len(), 1);
        assert_eq!(list_reports(&conn, &ListFilter::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_deleting_variable_cascades_to_reports() {
        let conn = db::open_in_memory().unwrap();
        let (epsa, _) = epsa::get_or_create(&conn, "SEMAPA").unwrap();
        let v = save_variable(&conn, None, &variable("V1")).unwrap();
        insert_report(&conn, epsa.id, v.id, 2022, 1.0).unwrap();

        delete_variable(&conn, v.id).unwrap();

        assert_eq!(db::count(&conn, "variable_reports").unwrap(), 0);
    }
}
