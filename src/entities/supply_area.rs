use super::ListFilter;
use crate::error::{Error, Result};
use crate::geometry::MultiPolygon;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

/// Area where an EPSA provides service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplyArea {
    pub id: i64,
    #[serde(skip)]
    pub epsa_id: i64,
    /// EPSA code
    pub epsa: String,
    /// Square kilometres
    pub area: Option<f64>,
    pub geom: Option<MultiPolygon>,
}

const SELECT: &str = "SELECT s.id, s.epsa_id, e.code, s.area, s.geom
     FROM supply_areas s JOIN epsas e ON e.id = s.epsa_id";

fn from_row(row: &Row<'_>) -> rusqlite::Result<SupplyArea> {
    let geom: Option<String> = row.get(4)?;
    let geom = geom
        .map(|json| serde_json::from_str::<MultiPolygon>(&json))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(SupplyArea {
        id: row.get(0)?,
        epsa_id: row.get(1)?,
        epsa: row.get(2)?,
        area: row.get(3)?,
        geom,
    })
}

pub fn insert(
    conn: &Connection,
    epsa_id: i64,
    area: Option<f64>,
    geom: Option<&MultiPolygon>,
) -> Result<SupplyArea> {
    let geom = geom.map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO supply_areas (epsa_id, area, geom) VALUES (?1, ?2, ?3)",
        params![epsa_id, area, geom],
    )?;

    get(conn, conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<SupplyArea> {
    conn.query_row(&format!("{SELECT} WHERE s.id = ?1"), [id], from_row)
        .optional()?
        .ok_or(Error::NotFound)
}

/// Ordered by EPSA category, then EPSA code
pub fn list(conn: &Connection, filter: &ListFilter) -> Result<Vec<SupplyArea>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT}
         WHERE (?1 IS NULL OR e.code = ?1)
         ORDER BY e.category, e.code, s.id"
    ))?;
    let rows = stmt
        .query_map(params![filter.epsa], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn.execute("DELETE FROM supply_areas WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}
