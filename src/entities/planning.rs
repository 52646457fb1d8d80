// Planning aggregates: annual operating budgets (POA) with their budgeted line
// items, and five-year / transitional development plans with their goals.
//
// Children have no lifecycle of their own: they are inserted with their parent
// and removed by ON DELETE CASCADE.

use super::ListFilter;
use crate::error::{map_unique, Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

choices! {
    pub enum IncomeType {
        OperatingWater => ("op_ap", "Operativos - Agua Potable"),
        OperatingSewerage => ("op_alc", "Operativos - Alcantarillado"),
        OperatingOther => ("op_otros", "Operativos - Otros"),
        NonOperating => ("no_op", "No Operativos"),
        Other => ("otros", "Otros"),
    }
}

choices! {
    pub enum ExpenseType {
        Operating => ("operativos", "Operativos"),
        Administrative => ("administrativos", "Administrativos"),
        Financial => ("financieros", "Financieros"),
        Other => ("otros", "Otros"),
    }
}

choices! {
    pub enum PlanType {
        Pdq => ("pdq", "PDQ"),
        Ptds => ("ptds", "PTDS"),
    }
}

/// Annual operating budget, identified by (EPSA, year, order)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Poa {
    pub id: i64,
    #[serde(skip)]
    pub epsa_id: i64,
    /// EPSA code
    pub epsa: String,
    pub year: i64,
    /// 1 for the initial budget, 2-5 for reprogrammings
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Income {
    #[serde(skip)]
    pub id: i64,
    pub income_type: IncomeType,
    pub description: String,
    /// Bolivianos
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expense {
    #[serde(skip)]
    pub id: i64,
    pub expense_type: ExpenseType,
    pub description: String,
    /// Bolivianos
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Investment {
    #[serde(skip)]
    pub id: i64,
    pub description: String,
    /// Bolivianos
    pub value: f64,
}

/// Expansion goal of a POA
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Goal {
    #[serde(skip)]
    pub id: i64,
    pub description: String,
    pub value: f64,
    /// What the value stands for, e.g. "more than X new connections" or just ">"
    pub val_description: Option<String>,
    pub unit: String,
}

/// PDQ or PTDS, identified by (EPSA, first year)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub id: i64,
    #[serde(skip)]
    pub epsa_id: i64,
    /// EPSA code
    pub epsa: String,
    pub year: i64,
    pub plan_type: PlanType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanGoal {
    #[serde(skip)]
    pub id: i64,
    pub year: i64,
    pub description: String,
    pub value: f64,
    pub val_description: Option<String>,
    pub unit: String,
}

// ============================================================================
// POA
// ============================================================================

const POA_SELECT: &str = r#"SELECT p.id, p.epsa_id, e.code, p.year, p."order"
     FROM poas p JOIN epsas e ON e.id = p.epsa_id"#;

fn poa_from_row(row: &Row<'_>) -> rusqlite::Result<Poa> {
    Ok(Poa {
        id: row.get(0)?,
        epsa_id: row.get(1)?,
        epsa: row.get(2)?,
        year: row.get(3)?,
        order: row.get(4)?,
    })
}

pub fn insert_poa(conn: &Connection, epsa_id: i64, year: i64, order: i64) -> Result<i64> {
    conn.execute(
        r#"INSERT INTO poas (epsa_id, year, "order") VALUES (?1, ?2, ?3)"#,
        params![epsa_id, year, order],
    )
    .map_err(|e| map_unique(e, "POA", &["epsa", "year", "order"]))?;

    Ok(conn.last_insert_rowid())
}

pub fn insert_income(conn: &Connection, poa_id: i64, income: &Income) -> Result<()> {
    conn.execute(
        "INSERT INTO poa_incomes (poa_id, income_type, description, value) VALUES (?1, ?2, ?3, ?4)",
        params![poa_id, income.income_type, income.description, income.value],
    )?;
    Ok(())
}

pub fn insert_expense(conn: &Connection, poa_id: i64, expense: &Expense) -> Result<()> {
    conn.execute(
        "INSERT INTO poa_expenses (poa_id, expense_type, description, value) VALUES (?1, ?2, ?3, ?4)",
        params![poa_id, expense.expense_type, expense.description, expense.value],
    )?;
    Ok(())
}

pub fn insert_investment(conn: &Connection, poa_id: i64, investment: &Investment) -> Result<()> {
    conn.execute(
        "INSERT INTO poa_investments (poa_id, description, value) VALUES (?1, ?2, ?3)",
        params![poa_id, investment.description, investment.value],
    )?;
    Ok(())
}

pub fn insert_goal(conn: &Connection, poa_id: i64, goal: &Goal) -> Result<()> {
    conn.execute(
        "INSERT INTO poa_goals (poa_id, description, value, val_description, unit)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![poa_id, goal.description, goal.value, goal.val_description, goal.unit],
    )?;
    Ok(())
}

pub fn get_poa(conn: &Connection, id: i64) -> Result<Poa> {
    conn.query_row(&format!("{POA_SELECT} WHERE p.id = ?1"), [id], poa_from_row)
        .optional()?
        .ok_or(Error::NotFound)
}

pub fn list_poas(conn: &Connection, filter: &ListFilter) -> Result<Vec<Poa>> {
    let mut stmt = conn.prepare(&format!(
        r#"{POA_SELECT}
         WHERE (?1 IS NULL OR e.code = ?1) AND (?2 IS NULL OR p.year = ?2)
         ORDER BY e.code, p.year, p."order""#
    ))?;
    let rows = stmt
        .query_map(params![filter.epsa, filter.year], poa_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn incomes_of(conn: &Connection, poa_id: i64) -> Result<Vec<Income>> {
    let mut stmt = conn.prepare(
        "SELECT id, income_type, description, value FROM poa_incomes
         WHERE poa_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([poa_id], |row| {
            Ok(Income {
                id: row.get(0)?,
                income_type: row.get(1)?,
                description: row.get(2)?,
                value: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn expenses_of(conn: &Connection, poa_id: i64) -> Result<Vec<Expense>> {
    let mut stmt = conn.prepare(
        "SELECT id, expense_type, description, value FROM poa_expenses
         WHERE poa_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([poa_id], |row| {
            Ok(Expense {
                id: row.get(0)?,
                expense_type: row.get(1)?,
                description: row.get(2)?,
                value: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn investments_of(conn: &Connection, poa_id: i64) -> Result<Vec<Investment>> {
    let mut stmt = conn.prepare(
        "SELECT id, description, value FROM poa_investments WHERE poa_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([poa_id], |row| {
            Ok(Investment {
                id: row.get(0)?,
                description: row.get(1)?,
                value: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn goals_of(conn: &Connection, poa_id: i64) -> Result<Vec<Goal>> {
    let mut stmt = conn.prepare(
        "SELECT id, description, value, val_description, unit FROM poa_goals
         WHERE poa_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([poa_id], |row| {
            Ok(Goal {
                id: row.get(0)?,
                description: row.get(1)?,
                value: row.get(2)?,
                val_description: row.get(3)?,
                unit: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_poa(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn.execute("DELETE FROM poas WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}

// ============================================================================
// PLAN
// ============================================================================

const PLAN_SELECT: &str = "SELECT p.id, p.epsa_id, e.code, p.year, p.plan_type
     FROM plans p JOIN epsas e ON e.id = p.epsa_id";

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<Plan> {
    Ok(Plan {
        id: row.get(0)?,
        epsa_id: row.get(1)?,
        epsa: row.get(2)?,
        year: row.get(3)?,
        plan_type: row.get(4)?,
    })
}

pub fn insert_plan(conn: &Connection, epsa_id: i64, year: i64, plan_type: PlanType) -> Result<i64> {
    conn.execute(
        "INSERT INTO plans (epsa_id, year, plan_type) VALUES (?1, ?2, ?3)",
        params![epsa_id, year, plan_type],
    )
    .map_err(|e| map_unique(e, "plan", &["epsa", "year"]))?;

    Ok(conn.last_insert_rowid())
}

pub fn insert_plan_goal(conn: &Connection, plan_id: i64, goal: &PlanGoal) -> Result<()> {
    conn.execute(
        "INSERT INTO plan_goals (plan_id, year, description, value, val_description, unit)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            plan_id,
            goal.year,
            goal.description,
            goal.value,
            goal.val_description,
            goal.unit
        ],
    )?;
    Ok(())
}

pub fn get_plan(conn: &Connection, id: i64) -> Result<Plan> {
    conn.query_row(&format!("{PLAN_SELECT} WHERE p.id = ?1"), [id], plan_from_row)
        .optional()?
        .ok_or(Error::NotFound)
}

pub fn list_plans(conn: &Connection, filter: &ListFilter) -> Result<Vec<Plan>> {
    let mut stmt = conn.prepare(&format!(
        "{PLAN_SELECT}
         WHERE (?1 IS NULL OR e.code = ?1) AND (?2 IS NULL OR p.year = ?2)
         ORDER BY e.code, p.year"
    ))?;
    let rows = stmt
        .query_map(params![filter.epsa, filter.year], plan_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn plan_goals_of(conn: &Connection, plan_id: i64) -> Result<Vec<PlanGoal>> {
    let mut stmt = conn.prepare(
        "SELECT id, year, description, value, val_description, unit FROM plan_goals
         WHERE plan_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([plan_id], |row| {
            Ok(PlanGoal {
                id: row.get(0)?,
                year: row.get(1)?,
                description: row.get(2)?,
                value: row.get(3)?,
                val_description: row.get(4)?,
                unit: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_plan(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn.execute("DELETE FROM plans WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}
