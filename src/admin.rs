// Back-office list screens
//
// Each screen is declared as data: the columns it shows, the axes it can be
// filtered on and the fields its search box looks at. `changelist` turns a
// screen plus a query (`q`, filter params, page) into one page of rows.
//
// Filters are exact matches on whitelisted axes only. Search splits the term
// on whitespace; every word must appear (case-insensitive substring) in at
// least one search field.

use crate::db::{self, Event};
use crate::entities::{Category, Department, PlanType, SourceType};
use crate::error::{Error, Result};
use crate::schema::FieldErrors;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const PAGE_SIZE: usize = 100;

/// How stored values are shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    Plain,
    Integer,
    Category,
    Department,
    PlanType,
    SourceType,
}

impl Display {
    fn label(self, raw: &str) -> String {
        let label = match self {
            Display::Plain | Display::Integer => None,
            Display::Category => Category::parse(raw).map(Category::label),
            Display::Department => Department::parse(raw).map(Department::label),
            Display::PlanType => PlanType::parse(raw).map(PlanType::label),
            Display::SourceType => SourceType::parse(raw).map(SourceType::label),
        };
        label.map_or_else(|| raw.to_string(), str::to_string)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub key: &'static str,
    pub label: &'static str,
    sql: &'static str,
    display: Display,
}

#[derive(Debug, Clone, Copy)]
pub struct FilterAxis {
    pub param: &'static str,
    pub label: &'static str,
    sql: &'static str,
    display: Display,
}

#[derive(Debug, Clone, Copy)]
pub struct AdminScreen {
    pub name: &'static str,
    pub title: &'static str,
    /// Audit entity type of the listed records
    pub entity: &'static str,
    pub columns: &'static [Column],
    pub filters: &'static [FilterAxis],
    search: &'static [&'static str],
    id_sql: &'static str,
    from: &'static str,
    ordering: &'static str,
}

const fn column(key: &'static str, label: &'static str, sql: &'static str, display: Display) -> Column {
    Column {
        key,
        label,
        sql,
        display,
    }
}

const fn axis(param: &'static str, label: &'static str, sql: &'static str, display: Display) -> FilterAxis {
    FilterAxis {
        param,
        label,
        sql,
        display,
    }
}

const EPSA_CODE: Column = column("epsa", "EPSA", "e.code", Display::Plain);
const EPSA_CATEGORY: Column = column("category", "Categoría", "e.category", Display::Category);
const EPSA_STATE: Column = column("state", "Departamento", "e.state", Display::Department);

const BY_CATEGORY: FilterAxis = axis("epsa__category", "Categoría", "e.category", Display::Category);
const BY_STATE: FilterAxis = axis("epsa__state", "Departamento", "e.state", Display::Department);
const BY_EPSA: FilterAxis = axis("epsa", "EPSA", "e.code", Display::Plain);

const EPSA_SEARCH: &[&str] = &["e.code", "e.name", "e.state"];

pub const SCREENS: &[AdminScreen] = &[
    AdminScreen {
        name: "epsa",
        title: "AAPS: EPSA Reguladas",
        entity: "epsa",
        columns: &[
            column("code", "Código", "e.code", Display::Plain),
            column("name", "Nombre", "e.name", Display::Plain),
            EPSA_CATEGORY,
            EPSA_STATE,
        ],
        filters: &[
            axis("category", "Categoría", "e.category", Display::Category),
            axis("state", "Departamento", "e.state", Display::Department),
        ],
        search: EPSA_SEARCH,
        id_sql: "e.id",
        from: "epsas e",
        ordering: "e.code",
    },
    AdminScreen {
        name: "poa",
        title: "AAPS - Planificación: POAs",
        entity: "poa",
        columns: &[
            EPSA_CODE,
            column("year", "Año", "p.year", Display::Integer),
            column("order", "Orden", r#"p."order""#, Display::Integer),
            EPSA_CATEGORY,
            EPSA_STATE,
        ],
        filters: &[
            BY_CATEGORY,
            BY_STATE,
            axis("year", "Año", "p.year", Display::Integer),
        ],
        search: EPSA_SEARCH,
        id_sql: "p.id",
        from: "poas p JOIN epsas e ON e.id = p.epsa_id",
        ordering: r#"e.code, p.year, p."order""#,
    },
    AdminScreen {
        name: "plan",
        title: "AAPS - Planificación: PDQs/PTDS",
        entity: "plan",
        columns: &[
            EPSA_CODE,
            column("year", "Año", "p.year", Display::Integer),
            column("plan_type", "Tipo", "p.plan_type", Display::PlanType),
            EPSA_CATEGORY,
            EPSA_STATE,
        ],
        filters: &[
            BY_CATEGORY,
            BY_STATE,
            axis("year", "Año", "p.year", Display::Integer),
        ],
        search: EPSA_SEARCH,
        id_sql: "p.id",
        from: "plans p JOIN epsas e ON e.id = p.epsa_id",
        ordering: "e.code, p.year",
    },
    AdminScreen {
        name: "supply-area",
        title: "AAPS: Áreas de Prestación de Servicios de las EPSA Reguladas",
        entity: "supply_area",
        columns: &[
            EPSA_CODE,
            EPSA_CATEGORY,
            EPSA_STATE,
            column("area", "Área (km²)", "s.area", Display::Plain),
        ],
        filters: &[BY_CATEGORY, BY_STATE, BY_EPSA],
        search: EPSA_SEARCH,
        id_sql: "s.id",
        from: "supply_areas s JOIN epsas e ON e.id = s.epsa_id",
        ordering: "e.category, e.code, s.id",
    },
    AdminScreen {
        name: "sarh",
        title: "AAPS: Sistemas de Autoabastecimiento de Recursos Hídricos (SARH).",
        entity: "sarh",
        columns: &[
            column("sarh_id", "SARH", "s.code", Display::Plain),
            EPSA_CODE,
            column("user", "Usuario", "s.user_name", Display::Plain),
            EPSA_STATE,
            column("municipality", "Municipio", "s.municipality", Display::Plain),
            column("sub_subt", "Fuente", "s.source_type", Display::SourceType),
        ],
        filters: &[
            BY_CATEGORY,
            BY_STATE,
            BY_EPSA,
            axis("municipality", "Municipio", "s.municipality", Display::Plain),
            axis("sub_subt", "Fuente", "s.source_type", Display::SourceType),
        ],
        search: &["e.code", "e.name", "e.state", "s.user_name"],
        id_sql: "s.id",
        from: "sarhs s JOIN epsas e ON e.id = s.epsa_id",
        ordering: "e.code, s.code",
    },
];

/// Entity types whose history can be browsed
pub const AUDITED: &[&str] = &[
    "epsa",
    "variable",
    "indicator",
    "variable_report",
    "indicator_measurement",
    "poa",
    "plan",
    "supply_area",
    "sarh",
];

pub fn screen(name: &str) -> Option<&'static AdminScreen> {
    SCREENS.iter().find(|s| s.name == name)
}

// ============================================================================
// QUERY AND RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeListQuery {
    pub q: Option<String>,
    pub filters: BTreeMap<String, String>,
    /// 1-based
    pub page: usize,
}

impl Default for ChangeListQuery {
    fn default() -> Self {
        ChangeListQuery {
            q: None,
            filters: BTreeMap::new(),
            page: 1,
        }
    }
}

impl ChangeListQuery {
    /// `q` is the search term, `p` the page; anything else is a filter
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let mut query = ChangeListQuery::default();

        for (key, value) in params {
            match key.as_str() {
                "q" => query.q = Some(value.clone()),
                "p" => {
                    query.page = value
                        .parse()
                        .map_err(|_| Error::field("p", "A valid integer is required."))?
                }
                _ => {
                    query.filters.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(query)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnHeader {
    pub key: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterChoices {
    pub param: &'static str,
    pub label: &'static str,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeList {
    pub screen: &'static str,
    pub title: &'static str,
    pub columns: Vec<ColumnHeader>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub filters: Vec<FilterChoices>,
    pub count: usize,
    pub page: usize,
    pub pages: usize,
}

// ============================================================================
// CHANGELIST
// ============================================================================

fn escape_like(word: &str) -> String {
    word.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn to_json(value: Value, display: Display) -> serde_json::Value {
    match value {
        Value::Null | Value::Blob(_) => serde_json::Value::Null,
        Value::Integer(i) => i.into(),
        Value::Real(f) => serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, Into::into),
        Value::Text(text) => display.label(&text).into(),
    }
}

fn raw_text(value: &Value) -> Option<String> {
    match value {
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(text) => Some(text.clone()),
        Value::Null | Value::Blob(_) => None,
    }
}

/// WHERE clause and its bound values for a query on `screen`
fn where_clause(screen: &AdminScreen, query: &ChangeListQuery) -> Result<(String, Vec<Value>)> {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    let mut errors = FieldErrors::default();

    for (param, raw) in &query.filters {
        let Some(axis) = screen.filters.iter().find(|a| a.param == param) else {
            errors.add(param, "Unknown filter.");
            continue;
        };
        let value = if axis.display == Display::Integer {
            match raw.trim().parse::<i64>() {
                Ok(n) => Value::Integer(n),
                Err(_) => {
                    errors.add(param, "A valid integer is required.");
                    continue;
                }
            }
        } else {
            Value::Text(raw.clone())
        };
        params.push(value);
        clauses.push(format!("{} = ?{}", axis.sql, params.len()));
    }
    errors.into_result()?;

    let words = query.q.as_deref().unwrap_or_default().split_whitespace();
    for word in words {
        params.push(Value::Text(format!("%{}%", escape_like(word))));
        let n = params.len();
        let any = screen
            .search
            .iter()
            .map(|field| format!("{field} LIKE ?{n} ESCAPE '\\'"))
            .collect::<Vec<_>>()
            .join(" OR ");
        clauses.push(format!("({any})"));
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    Ok((sql, params))
}

fn filter_choices(conn: &Connection, screen: &AdminScreen) -> Result<Vec<FilterChoices>> {
    screen
        .filters
        .iter()
        .map(|axis| {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT {sql} FROM {from} WHERE {sql} IS NOT NULL ORDER BY 1",
                sql = axis.sql,
                from = screen.from
            ))?;
            let values = stmt
                .query_map([], |row| row.get::<_, Value>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let choices = values
                .iter()
                .filter_map(raw_text)
                .map(|value| Choice {
                    label: axis.display.label(&value),
                    value,
                })
                .collect();

            Ok(FilterChoices {
                param: axis.param,
                label: axis.label,
                choices,
            })
        })
        .collect()
}

/// One page of a list screen
pub fn changelist(conn: &Connection, screen: &AdminScreen, query: &ChangeListQuery) -> Result<ChangeList> {
    let (where_sql, params) = where_clause(screen, query)?;

    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} {where_sql}", screen.from),
        params_from_iter(params.iter()),
        |row| row.get(0),
    )?;
    let count = usize::try_from(count).unwrap_or_default();
    let pages = count.div_ceil(PAGE_SIZE).max(1);
    if query.page == 0 || query.page > pages {
        return Err(Error::NotFound);
    }

    let columns_sql = screen
        .columns
        .iter()
        .map(|c| c.sql)
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {id}, {columns_sql} FROM {from} {where_sql} ORDER BY {ordering} LIMIT {limit} OFFSET {offset}",
        id = screen.id_sql,
        from = screen.from,
        ordering = screen.ordering,
        limit = PAGE_SIZE,
        offset = (query.page - 1) * PAGE_SIZE,
    ))?;

    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let mut map = serde_json::Map::new();
            map.insert("id".to_string(), row.get::<_, i64>(0)?.into());
            for (i, column) in screen.columns.iter().enumerate() {
                let value: Value = row.get(i + 1)?;
                map.insert(column.key.to_string(), to_json(value, column.display));
            }
            Ok(map)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(ChangeList {
        screen: screen.name,
        title: screen.title,
        columns: screen
            .columns
            .iter()
            .map(|c| ColumnHeader {
                key: c.key,
                label: c.label,
            })
            .collect(),
        rows,
        filters: filter_choices(conn, screen)?,
        count,
        page: query.page,
        pages,
    })
}

/// Audit trail of one record, newest first
pub fn history(conn: &Connection, entity: &str, id: i64) -> Result<Vec<Event>> {
    if !AUDITED.contains(&entity) {
        return Err(Error::NotFound);
    }
    db::get_events_for_entity(conn, entity, &id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{epsa, EpsaFields};
    use crate::serializers::planning::{create_poa, PoaPayload};
    use crate::serializers::sarh::{create as create_sarh, SarhPayload};

    fn seed(conn: &mut Connection) {
        for (code, name, category, state) in [
            ("AAPOS", "Administración Autónoma para Obras Sanitarias", Category::B, Department::Potosi),
            ("SEMAPA", "Servicio Municipal de Agua Potable y Alcantarillado", Category::A, Department::Cochabamba),
            ("COAPAT", "Cooperativa de Agua Potable Tarija", Category::C, Department::Tarija),
        ] {
            epsa::insert(
                conn,
                &EpsaFields {
                    code: code.to_string(),
                    name: name.to_string(),
                    category: Some(category),
                    state: Some(state),
                },
            )
            .unwrap();
        }

        for (code, year, order) in [("AAPOS", 2022, 1), ("AAPOS", 2023, 1), ("SEMAPA", 2023, 1), ("COAPAT", 2023, 2)] {
            let payload = PoaPayload {
                epsa: Some(code.to_string()),
                year: Some(Some(year)),
                order: Some(Some(order)),
                ..Default::default()
            };
            create_poa(conn, &payload, "admin").unwrap();
        }
    }

    fn query(pairs: &[(&str, &str)]) -> ChangeListQuery {
        let params: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ChangeListQuery::from_params(&params).unwrap()
    }

    fn epsas(list: &ChangeList) -> Vec<&str> {
        list.rows.iter().filter_map(|r| r["epsa"].as_str()).collect()
    }

    #[test]
    fn test_poa_screen_lists_with_labels() {
        let mut conn = db::open_in_memory().unwrap();
        seed(&mut conn);
        let poa = screen("poa").unwrap();

        let list = changelist(&conn, poa, &ChangeListQuery::default()).unwrap();

        assert_eq!(list.title, "AAPS - Planificación: POAs");
        assert_eq!(list.count, 4);
        assert_eq!(epsas(&list), vec!["AAPOS", "AAPOS", "COAPAT", "SEMAPA"]);
        assert_eq!(list.rows[0]["state"], "Potosí");
        assert_eq!(list.rows[0]["category"], "Categoría B");
        assert_eq!(list.rows[3]["order"], 1);
    }

    #[test]
    fn test_filters_combine() {
        let mut conn = db::open_in_memory().unwrap();
        seed(&mut conn);
        let poa = screen("poa").unwrap();

        let list = changelist(&conn, poa, &query(&[("year", "2023"), ("epsa__category", "A")])).unwrap();

        assert_eq!(epsas(&list), vec!["SEMAPA"]);
    }

    #[test]
    fn test_search_requires_every_word() {
        let mut conn = db::open_in_memory().unwrap();
        seed(&mut conn);
        let poa = screen("poa").unwrap();

        let both = changelist(&conn, poa, &query(&[("q", "agua tarija")])).unwrap();
        let one = changelist(&conn, poa, &query(&[("q", "AGUA")])).unwrap();
        let split_words = changelist(&conn, poa, &query(&[("q", "  sanitarias   obras ")])).unwrap();

        assert_eq!(epsas(&both), vec!["COAPAT"]);
        assert_eq!(epsas(&one), vec!["COAPAT", "SEMAPA"]);
        assert_eq!(epsas(&split_words), vec!["AAPOS", "AAPOS"]);
    }

    #[test]
    fn test_unknown_filter_rejected() {
        let mut conn = db::open_in_memory().unwrap();
        seed(&mut conn);

        match changelist(&conn, screen("plan").unwrap(), &query(&[("municipality", "Sacaba")])) {
            Err(Error::Validation(errors)) => {
                assert_eq!(errors.messages("municipality"), ["Unknown filter."])
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_choices_are_distinct() {
        let mut conn = db::open_in_memory().unwrap();
        seed(&mut conn);

        let list = changelist(&conn, screen("poa").unwrap(), &ChangeListQuery::default()).unwrap();
        let years = list.filters.iter().find(|f| f.param == "year").unwrap();
        let states = list.filters.iter().find(|f| f.param == "epsa__state").unwrap();

        let values: Vec<&str> = years.choices.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(values, vec!["2022", "2023"]);
        assert!(states.choices.iter().any(|c| c.value == "TA" && c.label == "Tarija"));
    }

    #[test]
    fn test_pagination() {
        let conn = db::open_in_memory().unwrap();
        for i in 0..(PAGE_SIZE + 1) {
            epsa::get_or_create(&conn, &format!("EPSA-{i:03}")).unwrap();
        }
        let screen = screen("epsa").unwrap();

        let first = changelist(&conn, screen, &ChangeListQuery::default()).unwrap();
        let second = changelist(&conn, screen, &query(&[("p", "2")])).unwrap();

        assert_eq!(first.rows.len(), PAGE_SIZE);
        assert_eq!(first.pages, 2);
        assert_eq!(second.rows.len(), 1);
        assert_eq!(second.rows[0]["code"], "EPSA-100");
        assert!(matches!(
            changelist(&conn, screen, &query(&[("p", "3")])),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_sarh_screen_filters() {
        let mut conn = db::open_in_memory().unwrap();
        seed(&mut conn);
        for (code, municipality, source) in [("S-1", "Sacaba", "sub"), ("S-2", "Quillacollo", "sup")] {
            let payload = SarhPayload {
                code: Some(code.to_string()),
                epsa: Some("SEMAPA".to_string()),
                user_name: Some("Usuario".to_string()),
                municipality: Some(municipality.to_string()),
                source_type: Some(source.to_string()),
                ..Default::default()
            };
            create_sarh(&mut conn, &payload, "admin").unwrap();
        }
        let sarh = screen("sarh").unwrap();

        let list = changelist(&conn, sarh, &query(&[("sub_subt", "sup")])).unwrap();

        assert_eq!(list.rows.len(), 1);
        assert_eq!(list.rows[0]["sarh_id"], "S-2");
        assert_eq!(list.rows[0]["sub_subt"], "Superficial");
        assert_eq!(
            changelist(&conn, sarh, &query(&[("municipality", "Sacaba")])).unwrap().count,
            1
        );
    }

    #[test]
    fn test_history() {
        let mut conn = db::open_in_memory().unwrap();
        seed(&mut conn);

        let events = history(&conn, "poa", 1).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "created");
        assert!(matches!(history(&conn, "users", 1), Err(Error::NotFound)));
    }
}
