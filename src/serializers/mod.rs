// Serialization Layer - wire JSON <-> relational records
//
// Payload structs take every field as optional so that a missing or malformed
// value ends up as a field error instead of a parse failure. `validate()`
// collects all problems (children at their list index) before anything is
// written; the write itself then runs in one transaction.

pub mod epsa;
pub mod performance;
pub mod planning;
pub mod sarh;
pub mod supply_area;

use crate::db::{self, Event};
use crate::entities::{epsa as epsa_store, Epsa};
use crate::error::{Error, Result};
use crate::schema::{current_year, FieldErrors};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

pub const CODE_MAX: usize = 32;
pub const NAME_MAX: usize = 256;
pub const DESCRIPTION_MAX: usize = 256;
pub const SHORT_MAX: usize = 64;
pub const MIN_YEAR: i64 = 1900;

/// Year field: defaults to the current year when missing, never before 1900
pub(crate) fn year(errors: &mut FieldErrors, field: &str, value: Option<Option<i64>>) -> Option<i64> {
    let value = errors.defaulted(field, value, current_year)?;
    errors.range(field, value, Some(MIN_YEAR), None)
}

/// Year field without a default
pub(crate) fn required_year(errors: &mut FieldErrors, field: &str, value: Option<i64>) -> Option<i64> {
    let value = errors.required(field, value)?;
    errors.range(field, value, Some(MIN_YEAR), None)
}

/// Validate each element of a nested list, keeping errors at their index
pub(crate) fn children<P, T>(
    errors: &mut FieldErrors,
    field: &str,
    items: &[P],
    check: impl Fn(&P, &mut FieldErrors) -> Option<T>,
) -> Vec<T> {
    let mut valid = Vec::with_capacity(items.len());
    let mut nested = Vec::with_capacity(items.len());

    for item in items {
        let mut child = FieldErrors::default();
        if let Some(value) = check(item, &mut child) {
            valid.push(value);
        }
        nested.push(child);
    }

    errors.nest(field, nested);
    valid
}

pub(crate) fn does_not_exist(code: &str) -> String {
    format!("Object with code={code} does not exist.")
}

/// Resolve an EPSA reference, creating the EPSA on first use
pub(crate) fn resolve_epsa(conn: &Connection, code: &str, actor: &str) -> Result<Epsa> {
    let (epsa, created) = epsa_store::get_or_create(conn, code)?;
    if created {
        info!(code, actor, "EPSA created from reference");
        audit(conn, "created", "epsa", epsa.id, &epsa, actor)?;
    }
    Ok(epsa)
}

/// Resolve an EPSA reference that must already exist
pub(crate) fn existing_epsa(conn: &Connection, code: &str) -> Result<Epsa> {
    epsa_store::find_by_code(conn, code)?.ok_or_else(|| Error::field("epsa", does_not_exist(code)))
}

/// Record a write in the audit trail
pub(crate) fn audit<T: Serialize>(
    conn: &Connection,
    event_type: &str,
    entity_type: &str,
    entity_id: i64,
    data: &T,
    actor: &str,
) -> Result<()> {
    let event = Event::new(
        event_type,
        entity_type,
        entity_id,
        serde_json::to_value(data)?,
        actor,
    );
    db::insert_event(conn, &event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_defaults_to_current() {
        let mut errors = FieldErrors::default();

        assert_eq!(year(&mut errors, "year", None), Some(current_year()));
        assert_eq!(year(&mut errors, "year", Some(Some(1850))), None);
        assert_eq!(required_year(&mut errors, "other", None), None);
        assert_eq!(errors.messages("other"), [crate::schema::REQUIRED]);
    }

    #[test]
    fn test_resolve_epsa_audits_creation_once() {
        let conn = db::open_in_memory().unwrap();

        let first = resolve_epsa(&conn, "COAPAT", "admin").unwrap();
        let second = resolve_epsa(&conn, "COAPAT", "admin").unwrap();

        assert_eq!(first.id, second.id);
        let events = db::get_events_for_entity(&conn, "epsa", &first.id.to_string()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, "admin");
    }

    #[test]
    fn test_existing_epsa_message() {
        let conn = db::open_in_memory().unwrap();

        match existing_epsa(&conn, "NOPE") {
            Err(Error::Validation(errors)) => {
                assert_eq!(errors.messages("epsa"), ["Object with code=NOPE does not exist."])
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
