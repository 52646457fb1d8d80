// SARH - self-supply water resource systems inside an EPSA's territory,
// with the technical data of their groundwater wells or surface intakes.

use super::ListFilter;
use crate::error::{map_unique, Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

choices! {
    pub enum SourceType {
        Subterranean => ("sub", "Subterránea"),
        Surface => ("sup", "Superficial"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sarh {
    pub id: i64,
    /// Registry number of the system
    pub code: String,
    #[serde(skip)]
    pub epsa_id: i64,
    /// EPSA code
    pub epsa: String,
    /// Holder of the self-supply system
    pub user_name: String,
    pub municipality: String,
    pub source_type: SourceType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubterraneanData {
    #[serde(skip)]
    pub id: i64,
    pub well_depth_m: Option<f64>,
    /// Litres per second
    pub flow_lps: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceData {
    #[serde(skip)]
    pub id: i64,
    pub source_name: String,
    /// Litres per second
    pub flow_lps: Option<f64>,
    pub description: Option<String>,
}

const SELECT: &str = "SELECT s.id, s.code, s.epsa_id, e.code, s.user_name, s.municipality, s.source_type
     FROM sarhs s JOIN epsas e ON e.id = s.epsa_id";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Sarh> {
    Ok(Sarh {
        id: row.get(0)?,
        code: row.get(1)?,
        epsa_id: row.get(2)?,
        epsa: row.get(3)?,
        user_name: row.get(4)?,
        municipality: row.get(5)?,
        source_type: row.get(6)?,
    })
}

pub fn insert(
    conn: &Connection,
    code: &str,
    epsa_id: i64,
    user_name: &str,
    municipality: &str,
    source_type: SourceType,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO sarhs (code, epsa_id, user_name, municipality, source_type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![code, epsa_id, user_name, municipality, source_type],
    )
    .map_err(|e| map_unique(e, "SARH", &["code"]))?;

    Ok(conn.last_insert_rowid())
}

pub fn insert_subterranean(conn: &Connection, sarh_id: i64, data: &SubterraneanData) -> Result<()> {
    conn.execute(
        "INSERT INTO sarh_subterranean (sarh_id, well_depth_m, flow_lps, description)
         VALUES (?1, ?2, ?3, ?4)",
        params![sarh_id, data.well_depth_m, data.flow_lps, data.description],
    )?;
    Ok(())
}

pub fn insert_surface(conn: &Connection, sarh_id: i64, data: &SurfaceData) -> Result<()> {
    conn.execute(
        "INSERT INTO sarh_surface (sarh_id, source_name, flow_lps, description)
         VALUES (?1, ?2, ?3, ?4)",
        params![sarh_id, data.source_name, data.flow_lps, data.description],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: i64) -> Result<Sarh> {
    conn.query_row(&format!("{SELECT} WHERE s.id = ?1"), [id], from_row)
        .optional()?
        .ok_or(Error::NotFound)
}

pub fn list(conn: &Connection, filter: &ListFilter) -> Result<Vec<Sarh>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT}
         WHERE (?1 IS NULL OR e.code = ?1)
         ORDER BY e.code, s.code"
    ))?;
    let rows = stmt
        .query_map(params![filter.epsa], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn subterranean_of(conn: &Connection, sarh_id: i64) -> Result<Vec<SubterraneanData>> {
    let mut stmt = conn.prepare(
        "SELECT id, well_depth_m, flow_lps, description FROM sarh_subterranean
         WHERE sarh_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([sarh_id], |row| {
            Ok(SubterraneanData {
                id: row.get(0)?,
                well_depth_m: row.get(1)?,
                flow_lps: row.get(2)?,
                description: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn surface_of(conn: &Connection, sarh_id: i64) -> Result<Vec<SurfaceData>> {
    let mut stmt = conn.prepare(
        "SELECT id, source_name, flow_lps, description FROM sarh_surface
         WHERE sarh_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([sarh_id], |row| {
            Ok(SurfaceData {
                id: row.get(0)?,
                source_name: row.get(1)?,
                flow_lps: row.get(2)?,
                description: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn.execute("DELETE FROM sarhs WHERE id = ?1", [id])?;
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

    #[test]
    fn test_sarh_with_technical_data() {
        let conn = db::open_in_memory().unwrap();
        let (e, _) = epsa::get_or_create(&conn, "SEMAPA").unwrap();

        let id = insert(&conn, "SARH-001", e.id, "Embotelladora Valle", "Quillacollo", SourceType::Subterranean).unwrap();
        insert_subterranean(
            &conn,
            id,
            &SubterraneanData {
                id: 0,
                well_depth_m: Some(120.0),
                flow_lps: Some(4.5),
                description: None,
            },
        )
        .unwrap();

        let sarh = get(&conn, id).unwrap();
        assert_eq!(sarh.epsa, "SEMAPA");
        assert_eq!(sarh.source_type, SourceType::Subterranean);
        assert_eq!(subterranean_of(&conn, id).unwrap()[0].well_depth_m, Some(120.0));
        assert!(surface_of(&conn, id).unwrap().is_empty());

        assert!(matches!(
            insert(&conn, "SARH-001", e.id, "Otro", "Sacaba", SourceType::Surface),
            Err(Error::Validation(_))
        ));

        delete(&conn, id).unwrap();
        assert_eq!(db::count(&conn, "sarh_subterranean").unwrap(), 0);
    }
}
