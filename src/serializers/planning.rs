// Nested create for the planning aggregates.
//
//   payload ──validate──► ValidPoa ──atomic──► resolve EPSA ─► insert POA ─► insert children ─► audit
//
// Everything after validation happens in one transaction: a failing child
// leaves neither the parent nor an EPSA created for it.

use super::{audit, children, resolve_epsa, year, CODE_MAX, DESCRIPTION_MAX, SHORT_MAX};
use crate::db;
use crate::entities::planning as store;
use crate::entities::{
    Expense, ExpenseType, Goal, Income, IncomeType, Investment, ListFilter, Plan, PlanGoal,
    PlanType, Poa,
};
use crate::error::{Error, Result};
use crate::schema::{nullable, FieldErrors};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// PAYLOADS
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomePayload {
    #[serde(default, deserialize_with = "nullable")]
    pub income_type: Option<Option<String>>,
    pub description: Option<String>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpensePayload {
    #[serde(default, deserialize_with = "nullable")]
    pub expense_type: Option<Option<String>>,
    pub description: Option<String>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvestmentPayload {
    pub description: Option<String>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoalPayload {
    /// Only read for plan goals
    #[serde(default, deserialize_with = "nullable")]
    pub year: Option<Option<i64>>,
    pub description: Option<String>,
    pub value: Option<f64>,
    pub val_description: Option<String>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoaPayload {
    pub epsa: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub year: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub order: Option<Option<i64>>,
    #[serde(default)]
    pub incomes: Vec<IncomePayload>,
    #[serde(default)]
    pub expenses: Vec<ExpensePayload>,
    #[serde(default)]
    pub investments: Vec<InvestmentPayload>,
    #[serde(default)]
    pub goals: Vec<GoalPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanPayload {
    pub epsa: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub year: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub plan_type: Option<Option<String>>,
    #[serde(default)]
    pub goals: Vec<GoalPayload>,
}

/// POA ready to be written
#[derive(Debug, Clone)]
pub struct ValidPoa {
    pub epsa: String,
    pub year: i64,
    pub order: i64,
    pub incomes: Vec<Income>,
    pub expenses: Vec<Expense>,
    pub investments: Vec<Investment>,
    pub goals: Vec<Goal>,
}

/// Plan ready to be written
#[derive(Debug, Clone)]
pub struct ValidPlan {
    pub epsa: String,
    pub year: i64,
    pub plan_type: PlanType,
    pub goals: Vec<PlanGoal>,
}

fn check_income(p: &IncomePayload, errors: &mut FieldErrors) -> Option<Income> {
    let income_type = errors.choice_or(
        "income_type",
        p.income_type.as_ref().map(Option::as_deref),
        IncomeType::Other,
        IncomeType::parse,
    );
    let description = errors.text("description", p.description.as_deref(), DESCRIPTION_MAX);
    let value = errors.number("value", p.value);

    Some(Income {
        id: 0,
        income_type: income_type?,
        description: description?,
        value: value?,
    })
}

fn check_expense(p: &ExpensePayload, errors: &mut FieldErrors) -> Option<Expense> {
    let expense_type = errors.choice_or(
        "expense_type",
        p.expense_type.as_ref().map(Option::as_deref),
        ExpenseType::Other,
        ExpenseType::parse,
    );
    let description = errors.text("description", p.description.as_deref(), DESCRIPTION_MAX);
    let value = errors.number("value", p.value);

    Some(Expense {
        id: 0,
        expense_type: expense_type?,
        description: description?,
        value: value?,
    })
}

fn check_investment(p: &InvestmentPayload, errors: &mut FieldErrors) -> Option<Investment> {
    let description = errors.text("description", p.description.as_deref(), DESCRIPTION_MAX);
    let value = errors.number("value", p.value);

    Some(Investment {
        id: 0,
        description: description?,
        value: value?,
    })
}

fn check_goal(p: &GoalPayload, errors: &mut FieldErrors) -> Option<Goal> {
    let description = errors.text("description", p.description.as_deref(), DESCRIPTION_MAX);
    let value = errors.number("value", p.value);
    let val_description =
        errors.optional_text("val_description", p.val_description.as_deref(), SHORT_MAX);
    let unit = errors.text("unit", p.unit.as_deref(), SHORT_MAX);

    Some(Goal {
        id: 0,
        description: description?,
        value: value?,
        val_description,
        unit: unit?,
    })
}

fn check_plan_goal(p: &GoalPayload, errors: &mut FieldErrors) -> Option<PlanGoal> {
    let year = year(errors, "year", p.year);
    let goal = check_goal(p, errors)?;

    Some(PlanGoal {
        id: 0,
        year: year?,
        description: goal.description,
        value: goal.value,
        val_description: goal.val_description,
        unit: goal.unit,
    })
}

impl PoaPayload {
    pub fn validate(&self) -> Result<ValidPoa> {
        let mut errors = FieldErrors::default();

        let epsa = errors.text("epsa", self.epsa.as_deref(), CODE_MAX);
        let year = year(&mut errors, "year", self.year);
        let order = errors
            .defaulted("order", self.order, || 1)
            .and_then(|order| errors.range("order", order, Some(1), Some(5)));
        let incomes = children(&mut errors, "incomes", &self.incomes, check_income);
        let expenses = children(&mut errors, "expenses", &self.expenses, check_expense);
        let investments = children(&mut errors, "investments", &self.investments, check_investment);
        let goals = children(&mut errors, "goals", &self.goals, check_goal);

        match (epsa, year, order) {
            (Some(epsa), Some(year), Some(order)) if errors.is_empty() => Ok(ValidPoa {
                epsa,
                year,
                order,
                incomes,
                expenses,
                investments,
                goals,
            }),
            _ => Err(Error::Validation(errors)),
        }
    }
}

impl PlanPayload {
    pub fn validate(&self) -> Result<ValidPlan> {
        let mut errors = FieldErrors::default();

        let epsa = errors.text("epsa", self.epsa.as_deref(), CODE_MAX);
        let year = year(&mut errors, "year", self.year);
        let plan_type = errors.choice_or(
            "plan_type",
            self.plan_type.as_ref().map(Option::as_deref),
            PlanType::Pdq,
            PlanType::parse,
        );
        let goals = children(&mut errors, "goals", &self.goals, check_plan_goal);

        match (epsa, year, plan_type) {
            (Some(epsa), Some(year), Some(plan_type)) if errors.is_empty() => Ok(ValidPlan {
                epsa,
                year,
                plan_type,
                goals,
            }),
            _ => Err(Error::Validation(errors)),
        }
    }
}

// ============================================================================
// REPRESENTATIONS
// ============================================================================

/// POA as returned by the API: the record plus its line items
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoaDetail {
    #[serde(flatten)]
    pub poa: Poa,
    pub incomes: Vec<Income>,
    pub expenses: Vec<Expense>,
    pub investments: Vec<Investment>,
    pub goals: Vec<Goal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanDetail {
    #[serde(flatten)]
    pub plan: Plan,
    pub goals: Vec<PlanGoal>,
}

fn poa_with_children(conn: &Connection, poa: Poa) -> Result<PoaDetail> {
    Ok(PoaDetail {
        incomes: store::incomes_of(conn, poa.id)?,
        expenses: store::expenses_of(conn, poa.id)?,
        investments: store::investments_of(conn, poa.id)?,
        goals: store::goals_of(conn, poa.id)?,
        poa,
    })
}

fn plan_with_goals(conn: &Connection, plan: Plan) -> Result<PlanDetail> {
    Ok(PlanDetail {
        goals: store::plan_goals_of(conn, plan.id)?,
        plan,
    })
}

pub fn poa_detail(conn: &Connection, id: i64) -> Result<PoaDetail> {
    let poa = store::get_poa(conn, id)?;
    poa_with_children(conn, poa)
}

pub fn list_poa_details(conn: &Connection, filter: &ListFilter) -> Result<Vec<PoaDetail>> {
    store::list_poas(conn, filter)?
        .into_iter()
        .map(|poa| poa_with_children(conn, poa))
        .collect()
}

pub fn plan_detail(conn: &Connection, id: i64) -> Result<PlanDetail> {
    let plan = store::get_plan(conn, id)?;
    plan_with_goals(conn, plan)
}

pub fn list_plan_details(conn: &Connection, filter: &ListFilter) -> Result<Vec<PlanDetail>> {
    store::list_plans(conn, filter)?
        .into_iter()
        .map(|plan| plan_with_goals(conn, plan))
        .collect()
}

// ============================================================================
// WRITES
// ============================================================================

pub fn create_poa(conn: &mut Connection, payload: &PoaPayload, actor: &str) -> Result<PoaDetail> {
    let valid = payload.validate()?;

    let detail = db::atomic(conn, |tx| {
        let epsa = resolve_epsa(tx, &valid.epsa, actor)?;
        let id = store::insert_poa(tx, epsa.id, valid.year, valid.order)?;

        for income in &valid.incomes {
            store::insert_income(tx, id, income)?;
        }
        for expense in &valid.expenses {
            store::insert_expense(tx, id, expense)?;
        }
        for investment in &valid.investments {
            store::insert_investment(tx, id, investment)?;
        }
        for goal in &valid.goals {
            store::insert_goal(tx, id, goal)?;
        }

        let detail = poa_detail(tx, id)?;
        audit(tx, "created", "poa", id, &detail, actor)?;
        Ok(detail)
    })?;

    info!(
        id = detail.poa.id,
        epsa = %detail.poa.epsa,
        year = detail.poa.year,
        order = detail.poa.order,
        actor,
        "POA created"
    );
    Ok(detail)
}

pub fn create_plan(conn: &mut Connection, payload: &PlanPayload, actor: &str) -> Result<PlanDetail> {
    let valid = payload.validate()?;

    let detail = db::atomic(conn, |tx| {
        let epsa = resolve_epsa(tx, &valid.epsa, actor)?;
        let id = store::insert_plan(tx, epsa.id, valid.year, valid.plan_type)?;

        for goal in &valid.goals {
            store::insert_plan_goal(tx, id, goal)?;
        }

        let detail = plan_detail(tx, id)?;
        audit(tx, "created", "plan", id, &detail, actor)?;
        Ok(detail)
    })?;

    info!(
        id = detail.plan.id,
        epsa = %detail.plan.epsa,
        year = detail.plan.year,
        goals = detail.goals.len(),
        actor,
        "Plan created"
    );
    Ok(detail)
}

pub fn delete_poa(conn: &mut Connection, id: i64, actor: &str) -> Result<()> {
    db::atomic(conn, |tx| {
        let existing = poa_detail(tx, id)?;
        store::delete_poa(tx, id)?;
        audit(tx, "deleted", "poa", id, &existing, actor)
    })?;

    info!(id, actor, "POA deleted");
    Ok(())
}

pub fn delete_plan(conn: &mut Connection, id: i64, actor: &str) -> Result<()> {
    db::atomic(conn, |tx| {
        let existing = plan_detail(tx, id)?;
        store::delete_plan(tx, id)?;
        audit(tx, "deleted", "plan", id, &existing, actor)
    })?;

    info!(id, actor, "Plan deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::epsa;
    use crate::schema::FieldError;

    fn coapat_poa() -> PoaPayload {
        serde_json::from_value(serde_json::json!({
            "epsa": "COAPAT",
            "year": 2023,
            "order": 1,
            "incomes": [{"income_type": "otros", "description": "x", "value": 100.0}]
        }))
        .unwrap()
    }

    fn goal(year: i64) -> GoalPayload {
        GoalPayload {
            year: Some(Some(year)),
            description: Some("Nuevas conexiones de agua".to_string()),
            value: Some(350.0),
            val_description: None,
            unit: Some("conexiones".to_string()),
        }
    }

    #[test]
    fn test_create_poa_with_unknown_epsa() {
        let mut conn = db::open_in_memory().unwrap();

        let detail = create_poa(&mut conn, &coapat_poa(), "admin").unwrap();

        assert!(detail.poa.id > 0);
        assert_eq!(detail.poa.epsa, "COAPAT");
        assert!(epsa::find_by_code(&conn, "COAPAT").unwrap().is_some());
        assert_eq!(detail.incomes.len(), 1);
        assert_eq!(detail.incomes[0].value, 100.0);
        assert_eq!(detail.incomes[0].income_type, IncomeType::Other);
        assert_eq!(db::count(&conn, "poa_incomes").unwrap(), 1);
    }

    #[test]
    fn test_second_poa_reuses_epsa() {
        let mut conn = db::open_in_memory().unwrap();
        create_poa(&mut conn, &coapat_poa(), "admin").unwrap();

        let mut reprogrammed = coapat_poa();
        reprogrammed.order = Some(Some(2));
        create_poa(&mut conn, &reprogrammed, "admin").unwrap();

        assert_eq!(db::count(&conn, "epsas").unwrap(), 1);
        assert_eq!(db::count(&conn, "poas").unwrap(), 2);
    }

    #[test]
    fn test_duplicate_poa_triple_rejected() {
        let mut conn = db::open_in_memory().unwrap();
        create_poa(&mut conn, &coapat_poa(), "admin").unwrap();

        match create_poa(&mut conn, &coapat_poa(), "admin") {
            Err(Error::Validation(errors)) => assert_eq!(
                errors.messages("non_field_errors"),
                ["The fields epsa, year, order must make a unique set."]
            ),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(db::count(&conn, "poas").unwrap(), 1);
        assert_eq!(db::count(&conn, "poa_incomes").unwrap(), 1);
    }

    #[test]
    fn test_poa_defaults() {
        let payload = PoaPayload {
            epsa: Some("COAPAT".to_string()),
            ..Default::default()
        };

        let valid = payload.validate().unwrap();

        assert_eq!(valid.order, 1);
        assert_eq!(valid.year, crate::schema::current_year());
        assert!(valid.incomes.is_empty());
    }

    #[test]
    fn test_explicit_null_is_not_defaulted() {
        let mut conn = db::open_in_memory().unwrap();
        let payload: PoaPayload = serde_json::from_value(serde_json::json!({
            "epsa": "COAPAT",
            "year": null,
            "order": null,
            "incomes": [{"income_type": null, "description": "x", "value": 1.0}]
        }))
        .unwrap();

        match create_poa(&mut conn, &payload, "admin") {
            Err(Error::Validation(errors)) => {
                assert_eq!(errors.messages("year"), [crate::schema::NULL]);
                assert_eq!(errors.messages("order"), [crate::schema::NULL]);
                match errors.get("incomes") {
                    Some(FieldError::Nested(items)) => {
                        assert_eq!(items[0].messages("income_type"), [crate::schema::NULL])
                    }
                    other => panic!("expected nested errors, got {:?}", other),
                }
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(db::count(&conn, "epsas").unwrap(), 0);
    }

    #[test]
    fn test_missing_epsa_and_bad_children() {
        let payload: PoaPayload = serde_json::from_value(serde_json::json!({
            "order": 9,
            "incomes": [
                {"description": "ok", "value": 1.0},
                {"income_type": "venta", "description": "", "value": 2.0}
            ],
            "goals": [{"description": "Cobertura", "value": 95.0}]
        }))
        .unwrap();

        let errors = match payload.validate() {
            Err(Error::Validation(errors)) => errors,
            other => panic!("expected validation error, got {:?}", other),
        };

        assert_eq!(errors.messages("epsa"), ["This field is required."]);
        assert_eq!(errors.messages("order"), ["Ensure this value is less than or equal to 5."]);
        match errors.get("incomes") {
            Some(FieldError::Nested(items)) => {
                assert!(items[0].is_empty());
                assert_eq!(items[1].messages("income_type"), ["\"venta\" is not a valid choice."]);
                assert_eq!(items[1].messages("description"), ["This field may not be blank."]);
            }
            other => panic!("expected nested errors, got {:?}", other),
        }
        match errors.get("goals") {
            Some(FieldError::Nested(items)) => {
                assert_eq!(items[0].messages("unit"), ["This field is required."])
            }
            other => panic!("expected nested errors, got {:?}", other),
        }
    }

    #[test]
    fn test_child_failure_rolls_back_everything() {
        let mut conn = db::open_in_memory().unwrap();
        conn.execute_batch("DROP TABLE poa_goals").unwrap();

        let mut payload = coapat_poa();
        payload.goals = vec![goal(2023)];

        assert!(matches!(
            create_poa(&mut conn, &payload, "admin"),
            Err(Error::Database(_))
        ));
        assert_eq!(db::count(&conn, "poas").unwrap(), 0);
        assert_eq!(db::count(&conn, "poa_incomes").unwrap(), 0);
        assert_eq!(db::count(&conn, "epsas").unwrap(), 0);
        assert_eq!(db::count(&conn, "events").unwrap(), 0);
    }

    #[test]
    fn test_plan_goals_are_linked() {
        let mut conn = db::open_in_memory().unwrap();
        let payload = PlanPayload {
            epsa: Some("ELAPAS".to_string()),
            year: Some(Some(2021)),
            plan_type: Some(Some("ptds".to_string())),
            goals: vec![goal(2022), goal(2023), goal(2024)],
        };

        let detail = create_plan(&mut conn, &payload, "admin").unwrap();

        assert_eq!(detail.plan.plan_type, PlanType::Ptds);
        assert_eq!(detail.goals.len(), 3);
        assert_eq!(db::count(&conn, "plan_goals").unwrap(), 3);
        assert_eq!(detail.goals[2].year, 2024);

        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["epsa"], "ELAPAS");
        assert!(json["goals"][0].get("id").is_none());
        assert!(json.get("epsa_id").is_none());
    }

    #[test]
    fn test_plan_unique_per_epsa_year() {
        let mut conn = db::open_in_memory().unwrap();
        let payload = PlanPayload {
            epsa: Some("ELAPAS".to_string()),
            year: Some(Some(2021)),
            ..Default::default()
        };
        create_plan(&mut conn, &payload, "admin").unwrap();

        match create_plan(&mut conn, &payload, "admin") {
            Err(Error::Validation(errors)) => assert_eq!(
                errors.messages("non_field_errors"),
                ["The fields epsa, year must make a unique set."]
            ),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_deleting_epsa_leaves_no_orphans() {
        let mut conn = db::open_in_memory().unwrap();
        let mut payload = coapat_poa();
        payload.goals = vec![goal(2023)];
        create_poa(&mut conn, &payload, "admin").unwrap();
        create_plan(
            &mut conn,
            &PlanPayload {
                epsa: Some("COAPAT".to_string()),
                goals: vec![goal(2024)],
                ..Default::default()
            },
            "admin",
        )
        .unwrap();

        let coapat = epsa::find_by_code(&conn, "COAPAT").unwrap().unwrap();
        crate::serializers::epsa::delete(&mut conn, coapat.id, "admin").unwrap();

        for table in ["poas", "poa_incomes", "poa_goals", "plans", "plan_goals"] {
            assert_eq!(db::count(&conn, table).unwrap(), 0, "{table}");
        }
    }

    #[test]
    fn test_list_details_with_filter() {
        let mut conn = db::open_in_memory().unwrap();
        create_poa(&mut conn, &coapat_poa(), "admin").unwrap();
        let mut other = coapat_poa();
        other.epsa = Some("SEMAPA".to_string());
        other.year = Some(Some(2022));
        create_poa(&mut conn, &other, "admin").unwrap();

        let filter = ListFilter {
            epsa: Some("SEMAPA".to_string()),
            year: None,
        };
        let listed = list_poa_details(&conn, &filter).unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].poa.year, 2022);
        assert_eq!(listed[0].incomes.len(), 1);

        delete_poa(&mut conn, listed[0].poa.id, "admin").unwrap();
        assert!(matches!(poa_detail(&conn, listed[0].poa.id), Err(Error::NotFound)));
    }
}
