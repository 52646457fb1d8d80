use super::{audit, children, existing_epsa, CODE_MAX, DESCRIPTION_MAX, NAME_MAX};
use crate::db;
use crate::entities::sarh as store;
use crate::entities::{ListFilter, Sarh, SourceType, SubterraneanData, SurfaceData};
use crate::error::{Error, Result};
use crate::schema::FieldErrors;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubterraneanPayload {
    pub well_depth_m: Option<f64>,
    pub flow_lps: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SurfacePayload {
    pub source_name: Option<String>,
    pub flow_lps: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SarhPayload {
    pub code: Option<String>,
    pub epsa: Option<String>,
    pub user_name: Option<String>,
    pub municipality: Option<String>,
    pub source_type: Option<String>,
    #[serde(default)]
    pub subterranean: Vec<SubterraneanPayload>,
    #[serde(default)]
    pub surface: Vec<SurfacePayload>,
}

#[derive(Debug, Clone)]
pub struct ValidSarh {
    pub code: String,
    pub epsa: String,
    pub user_name: String,
    pub municipality: String,
    pub source_type: SourceType,
    pub subterranean: Vec<SubterraneanData>,
    pub surface: Vec<SurfaceData>,
}

fn check_subterranean(p: &SubterraneanPayload, errors: &mut FieldErrors) -> Option<SubterraneanData> {
    Some(SubterraneanData {
        id: 0,
        well_depth_m: errors.optional_non_negative("well_depth_m", p.well_depth_m),
        flow_lps: errors.optional_non_negative("flow_lps", p.flow_lps),
        description: errors.optional_text("description", p.description.as_deref(), DESCRIPTION_MAX),
    })
}

fn check_surface(p: &SurfacePayload, errors: &mut FieldErrors) -> Option<SurfaceData> {
    let source_name = errors.text("source_name", p.source_name.as_deref(), NAME_MAX);
    let flow_lps = errors.optional_non_negative("flow_lps", p.flow_lps);
    let description = errors.optional_text("description", p.description.as_deref(), DESCRIPTION_MAX);

    Some(SurfaceData {
        id: 0,
        source_name: source_name?,
        flow_lps,
        description,
    })
}

impl SarhPayload {
    pub fn validate(&self) -> Result<ValidSarh> {
        let mut errors = FieldErrors::default();

        let code = errors.text("code", self.code.as_deref(), CODE_MAX);
        let epsa = errors.text("epsa", self.epsa.as_deref(), CODE_MAX);
        let user_name = errors.text("user_name", self.user_name.as_deref(), NAME_MAX);
        let municipality = errors.text("municipality", self.municipality.as_deref(), NAME_MAX);
        let source_type = errors
            .required("source_type", self.source_type.as_deref())
            .and_then(|v| errors.choice("source_type", v, SourceType::parse));
        let subterranean = children(&mut errors, "subterranean", &self.subterranean, check_subterranean);
        let surface = children(&mut errors, "surface", &self.surface, check_surface);

        match (code, epsa, user_name, municipality, source_type) {
            (Some(code), Some(epsa), Some(user_name), Some(municipality), Some(source_type))
                if errors.is_empty() =>
            {
                Ok(ValidSarh {
                    code,
                    epsa,
                    user_name,
                    municipality,
                    source_type,
                    subterranean,
                    surface,
                })
            }
            _ => Err(Error::Validation(errors)),
        }
    }
}

/// SARH with its technical data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SarhDetail {
    #[serde(flatten)]
    pub sarh: Sarh,
    pub subterranean: Vec<SubterraneanData>,
    pub surface: Vec<SurfaceData>,
}

fn with_data(conn: &Connection, sarh: Sarh) -> Result<SarhDetail> {
    Ok(SarhDetail {
        subterranean: store::subterranean_of(conn, sarh.id)?,
        surface: store::surface_of(conn, sarh.id)?,
        sarh,
    })
}

pub fn detail(conn: &Connection, id: i64) -> Result<SarhDetail> {
    let sarh = store::get(conn, id)?;
    with_data(conn, sarh)
}

pub fn list_details(conn: &Connection, filter: &ListFilter) -> Result<Vec<SarhDetail>> {
    store::list(conn, filter)?
        .into_iter()
        .map(|sarh| with_data(conn, sarh))
        .collect()
}

pub fn create(conn: &mut Connection, payload: &SarhPayload, actor: &str) -> Result<SarhDetail> {
    let valid = payload.validate()?;

    let created = db::atomic(conn, |tx| {
        let epsa = existing_epsa(tx, &valid.epsa)?;
        let id = store::insert(
            tx,
            &valid.code,
            epsa.id,
            &valid.user_name,
            &valid.municipality,
            valid.source_type,
        )?;
        for data in &valid.subterranean {
            store::insert_subterranean(tx, id, data)?;
        }
        for data in &valid.surface {
            store::insert_surface(tx, id, data)?;
        }

        let created = detail(tx, id)?;
        audit(tx, "created", "sarh", id, &created, actor)?;
        Ok(created)
    })?;

    info!(code = %created.sarh.code, epsa = %created.sarh.epsa, actor, "SARH created");
    Ok(created)
}

pub fn delete(conn: &mut Connection, id: i64, actor: &str) -> Result<()> {
    db::atomic(conn, |tx| {
        let existing = detail(tx, id)?;
        store::delete(tx, id)?;
        audit(tx, "deleted", "sarh", id, &existing, actor)
    })?;

    info!(id, actor, "SARH deleted");
    Ok(())
}
