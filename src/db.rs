use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Event for the audit trail: every write through the API or the CLI leaves one
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: impl ToString,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Open (or create) the database file and apply connection pragmas
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    // WAL for crash recovery; in-memory databases silently keep "memory"
    conn.pragma_update(None, "journal_mode", "WAL")?;
    configure(&conn)?;
    Ok(conn)
}

/// In-memory database with the full schema (tests and dry runs)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    setup_database(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    // Cascading deletes depend on this, SQLite ships with it off
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- ====================================================================
        -- Entity registry
        -- ====================================================================
        CREATE TABLE IF NOT EXISTS epsas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            category TEXT,
            state TEXT
        );

        -- ====================================================================
        -- Performance variables, indicators and their reports
        -- ====================================================================
        CREATE TABLE IF NOT EXISTS variables (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            unit TEXT,
            description TEXT
        );

        CREATE TABLE IF NOT EXISTS indicators (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            unit TEXT,
            formula TEXT,
            description TEXT
        );

        CREATE TABLE IF NOT EXISTS variable_reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            epsa_id INTEGER NOT NULL REFERENCES epsas(id) ON DELETE CASCADE,
            variable_id INTEGER NOT NULL REFERENCES variables(id) ON DELETE CASCADE,
            year INTEGER NOT NULL CHECK (year >= 1900),
            value REAL NOT NULL,
            UNIQUE (epsa_id, variable_id, year)
        );

        CREATE TABLE IF NOT EXISTS indicator_measurements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            epsa_id INTEGER NOT NULL REFERENCES epsas(id) ON DELETE CASCADE,
            indicator_id INTEGER NOT NULL REFERENCES indicators(id) ON DELETE CASCADE,
            year INTEGER NOT NULL CHECK (year >= 1900),
            value REAL NOT NULL,
            UNIQUE (epsa_id, indicator_id, year)
        );

        -- ====================================================================
        -- Annual operating budgets (POA) and their line items
        -- ====================================================================
        CREATE TABLE IF NOT EXISTS poas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            epsa_id INTEGER NOT NULL REFERENCES epsas(id) ON DELETE CASCADE,
            year INTEGER NOT NULL CHECK (year >= 1900),
            \"order\" INTEGER NOT NULL CHECK (\"order\" BETWEEN 1 AND 5),
            UNIQUE (epsa_id, year, \"order\")
        );

        CREATE TABLE IF NOT EXISTS poa_incomes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            poa_id INTEGER NOT NULL REFERENCES poas(id) ON DELETE CASCADE,
            income_type TEXT NOT NULL,
            description TEXT NOT NULL,
            value REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS poa_expenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            poa_id INTEGER NOT NULL REFERENCES poas(id) ON DELETE CASCADE,
            expense_type TEXT NOT NULL,
            description TEXT NOT NULL,
            value REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS poa_investments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            poa_id INTEGER NOT NULL REFERENCES poas(id) ON DELETE CASCADE,
            description TEXT NOT NULL,
            value REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS poa_goals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            poa_id INTEGER NOT NULL REFERENCES poas(id) ON DELETE CASCADE,
            description TEXT NOT NULL,
            value REAL NOT NULL,
            val_description TEXT,
            unit TEXT NOT NULL
        );

        -- ====================================================================
        -- Development plans (PDQ / PTDS)
        -- ====================================================================
        CREATE TABLE IF NOT EXISTS plans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            epsa_id INTEGER NOT NULL REFERENCES epsas(id) ON DELETE CASCADE,
            year INTEGER NOT NULL CHECK (year >= 1900),
            plan_type TEXT NOT NULL,
            UNIQUE (epsa_id, year)
        );

        CREATE TABLE IF NOT EXISTS plan_goals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            plan_id INTEGER NOT NULL REFERENCES plans(id) ON DELETE CASCADE,
            year INTEGER NOT NULL CHECK (year >= 1900),
            description TEXT NOT NULL,
            value REAL NOT NULL,
            val_description TEXT,
            unit TEXT NOT NULL
        );

        -- ====================================================================
        -- Supply areas and self-supply systems (SARH)
        -- ====================================================================
        CREATE TABLE IF NOT EXISTS supply_areas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            epsa_id INTEGER NOT NULL REFERENCES epsas(id) ON DELETE CASCADE,
            area REAL,
            geom TEXT
        );

        CREATE TABLE IF NOT EXISTS sarhs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT UNIQUE NOT NULL,
            epsa_id INTEGER NOT NULL REFERENCES epsas(id) ON DELETE CASCADE,
            user_name TEXT NOT NULL,
            municipality TEXT NOT NULL,
            source_type TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sarh_subterranean (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sarh_id INTEGER NOT NULL REFERENCES sarhs(id) ON DELETE CASCADE,
            well_depth_m REAL,
            flow_lps REAL,
            description TEXT
        );

        CREATE TABLE IF NOT EXISTS sarh_surface (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sarh_id INTEGER NOT NULL REFERENCES sarhs(id) ON DELETE CASCADE,
            source_name TEXT NOT NULL,
            flow_lps REAL,
            description TEXT
        );

        -- ====================================================================
        -- API users and audit trail
        -- ====================================================================
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            token_hash TEXT UNIQUE NOT NULL,
            is_superuser INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        -- ====================================================================
        -- Indexes
        -- ====================================================================
        CREATE INDEX IF NOT EXISTS idx_poas_epsa ON poas(epsa_id);
        CREATE INDEX IF NOT EXISTS idx_plans_epsa ON plans(epsa_id);
        CREATE INDEX IF NOT EXISTS idx_supply_areas_epsa ON supply_areas(epsa_id);
        CREATE INDEX IF NOT EXISTS idx_sarhs_epsa ON sarhs(epsa_id);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
        ",
    )?;

    debug!("database schema ready");
    Ok(())
}

/// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`
pub fn atomic<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    let tx = conn.transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Row count of a table (diagnostics and tests)
pub fn count(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;

    Ok(count)
}
