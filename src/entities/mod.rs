// Entity Models - relational records and their SQL access
//
// Each entity module owns:
// - the record type as stored (ids and foreign keys included)
// - insert/get/list/delete functions over a borrowed `Connection`
//   (a `Transaction` derefs to one, so the same functions compose atomically)

/// Closed set of string choices stored as TEXT: `Variant => ("stored value", "label")`.
macro_rules! choices {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => ($value:literal, $label:literal)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }

            pub const fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let value = <String as serde::Deserialize>::deserialize(deserializer)?;
                Self::parse(&value).ok_or_else(|| {
                    serde::de::Error::custom(format!("\"{value}\" is not a valid choice."))
                })
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                let text = value.as_str()?;
                Self::parse(text).ok_or_else(|| {
                    rusqlite::types::FromSqlError::Other(
                        format!("unknown {} choice: {text}", stringify!($name)).into(),
                    )
                })
            }
        }
    };
}

pub mod epsa;
pub mod performance;
pub mod planning;
pub mod sarh;
pub mod supply_area;
pub mod user;

pub use epsa::{Category, Department, Epsa, EpsaFields};
pub use performance::{Indicator, IndicatorMeasurement, Variable, VariableReport};
pub use planning::{
    Expense, ExpenseType, Goal, Income, IncomeType, Investment, Plan, PlanGoal, PlanType, Poa,
};
pub use sarh::{Sarh, SourceType, SubterraneanData, SurfaceData};
pub use supply_area::SupplyArea;
pub use user::{Principal, User};

/// Optional `?epsa=CODE&year=YYYY` narrowing shared by list endpoints
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub epsa: Option<String>,
    pub year: Option<i64>,
}
