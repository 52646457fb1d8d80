// AAPS Registry - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod schema;
pub mod db;
pub mod entities;
pub mod geometry;
pub mod serializers;    // wire JSON <-> records, nested create
pub mod permissions;
pub mod fields;         // sparse fieldsets
pub mod admin;          // back-office list screens
pub mod config;
pub mod logging;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use error::{Error, Result};
pub use db::{Event, atomic, get_events_for_entity, insert_event, setup_database};
pub use entities::{
    Category, Department, Epsa, EpsaFields,
    Variable, Indicator, VariableReport, IndicatorMeasurement,
    Poa, Income, IncomeType, Expense, ExpenseType, Investment, Goal,
    Plan, PlanGoal, PlanType,
    SupplyArea,
    Sarh, SourceType, SubterraneanData, SurfaceData,
    ListFilter, Principal, User,
};
pub use geometry::MultiPolygon;
pub use permissions::{has_permission, Policy};
pub use admin::{changelist, ChangeList, ChangeListQuery};
pub use config::Settings;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
