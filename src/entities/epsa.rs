// EPSA Entity - root of the registry
//
// `code` is the natural key: every other record refers to an EPSA by it on the
// wire, and writes may create the EPSA on first reference.

use crate::error::{map_unique, Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

choices! {
    /// Regulatory category assigned by the agency
    pub enum Category {
        A => ("A", "Categoría A"),
        B => ("B", "Categoría B"),
        C => ("C", "Categoría C"),
        D => ("D", "Categoría D"),
    }
}

choices! {
    /// Department (state) where the EPSA operates
    pub enum Department {
        LaPaz => ("LP", "La Paz"),
        Cochabamba => ("CO", "Cochabamba"),
        Potosi => ("PO", "Potosí"),
        SantaCruz => ("SC", "Santa Cruz"),
        Chuquisaca => ("CH", "Chuquisaca"),
        Oruro => ("OR", "Oruro"),
        Tarija => ("TA", "Tarija"),
        Beni => ("BE", "Beni"),
        Pando => ("PA", "Pando"),
    }
}

/// Water and sanitation service provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Epsa {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub category: Option<Category>,
    pub state: Option<Department>,
}

/// Validated writable fields of an EPSA
#[derive(Debug, Clone, PartialEq)]
pub struct EpsaFields {
    pub code: String,
    pub name: String,
    pub category: Option<Category>,
    pub state: Option<Department>,
}

impl EpsaFields {
    /// Fields of an EPSA created implicitly from a code reference
    pub fn from_code(code: &str) -> Self {
        EpsaFields {
            code: code.to_string(),
            name: code.to_string(),
            category: None,
            state: None,
        }
    }
}

const COLUMNS: &str = "id, code, name, category, state";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Epsa> {
    Ok(Epsa {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        category: row.get(3)?,
        state: row.get(4)?,
    })
}

pub fn insert(conn: &Connection, fields: &EpsaFields) -> Result<Epsa> {
    conn.execute(
        "INSERT INTO epsas (code, name, category, state) VALUES (?1, ?2, ?3, ?4)",
        params![fields.code, fields.name, fields.category, fields.state],
    )
    .map_err(|e| map_unique(e, "EPSA", &["code"]))?;

    get(conn, conn.last_insert_rowid())
}

pub fn update(conn: &Connection, id: i64, fields: &EpsaFields) -> Result<Epsa> {
    let changed = conn
        .execute(
            "UPDATE epsas SET code = ?1, name = ?2, category = ?3, state = ?4 WHERE id = ?5",
            params![fields.code, fields.name, fields.category, fields.state, id],
        )
        .map_err(|e| map_unique(e, "EPSA", &["code"]))?;

    if changed == 0 {
        return Err(Error::NotFound);
    }
    get(conn, id)
}

pub fn get(conn: &Connection, id: i64) -> Result<Epsa> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM epsas WHERE id = ?1"),
        [id],
        from_row,
    )
    .optional()?
    .ok_or(Error::NotFound)
}

pub fn find_by_code(conn: &Connection, code: &str) -> Result<Option<Epsa>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM epsas WHERE code = ?1"),
            [code],
            from_row,
        )
        .optional()?)
}

/// Resolve an EPSA by code, creating it when absent.
///
/// The insert is guarded by the UNIQUE(code) constraint, so two concurrent
/// writers referencing the same new code end up with one row.
/// Returns the EPSA and whether it was created by this call.
pub fn get_or_create(conn: &Connection, code: &str) -> Result<(Epsa, bool)> {
    let fields = EpsaFields::from_code(code);
    let inserted = conn.execute(
        "INSERT INTO epsas (code, name) VALUES (?1, ?2) ON CONFLICT(code) DO NOTHING",
        params![fields.code, fields.name],
    )?;

    let epsa = find_by_code(conn, code)?.ok_or(Error::Internal("EPSA vanished after upsert"))?;
    Ok((epsa, inserted == 1))
}

/// Insert or overwrite by code (bulk import). Returns true when a row was created.
pub fn upsert(conn: &Connection, fields: &EpsaFields) -> Result<bool> {
    match find_by_code(conn, &fields.code)? {
        Some(existing) => {
            update(conn, existing.id, fields)?;
            Ok(false)
        }
        None => {
            insert(conn, fields)?;
            Ok(true)
        }
    }
}

pub fn list(conn: &Connection) -> Result<Vec<Epsa>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM epsas ORDER BY code"))?;
    let epsas = stmt
        .query_map([], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(epsas)
}

/// Delete an EPSA; POAs, plans, supply areas, reports and SARHs go with it
pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn.execute("DELETE FROM epsas WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}
