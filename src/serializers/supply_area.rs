use super::{audit, existing_epsa, CODE_MAX};
use crate::db;
use crate::entities::supply_area as store;
use crate::entities::SupplyArea;
use crate::error::{Error, Result};
use crate::geometry::MultiPolygon;
use crate::schema::FieldErrors;
use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SupplyAreaPayload {
    pub epsa: Option<String>,
    /// Square kilometres; computed from `geom` when left out
    pub area: Option<f64>,
    pub geom: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ValidSupplyArea {
    pub epsa: String,
    pub area: Option<f64>,
    pub geom: Option<MultiPolygon>,
}

impl SupplyAreaPayload {
    pub fn validate(&self) -> Result<ValidSupplyArea> {
        let mut errors = FieldErrors::default();

        let epsa = errors.text("epsa", self.epsa.as_deref(), CODE_MAX);
        let area = errors.optional_non_negative("area", self.area);
        let geom = match &self.geom {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => MultiPolygon::from_value(value, "geom", &mut errors),
        };

        match epsa {
            Some(epsa) if errors.is_empty() => Ok(ValidSupplyArea {
                epsa,
                area: area.or_else(|| geom.as_ref().map(MultiPolygon::area_km2)),
                geom,
            }),
            _ => Err(Error::Validation(errors)),
        }
    }
}

pub fn create(conn: &mut Connection, payload: &SupplyAreaPayload, actor: &str) -> Result<SupplyArea> {
    let valid = payload.validate()?;

    let created = db::atomic(conn, |tx| {
        let epsa = existing_epsa(tx, &valid.epsa)?;
        let created = store::insert(tx, epsa.id, valid.area, valid.geom.as_ref())?;
        audit(tx, "created", "supply_area", created.id, &created, actor)?;
        Ok(created)
    })?;

    info!(id = created.id, epsa = %created.epsa, area = ?created.area, actor, "Supply area created");
    Ok(created)
}

pub fn delete(conn: &mut Connection, id: i64, actor: &str) -> Result<()> {
    db::atomic(conn, |tx| {
        let existing = store::get(tx, id)?;
        store::delete(tx, id)?;
        audit(tx, "deleted", "supply_area", id, &existing, actor)
    })?;

    info!(id, actor, "Supply area deleted");
    Ok(())
}
