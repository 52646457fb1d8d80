// AAPS Registry - command line
//
//   aaps-registry init
//   aaps-registry create-user <name> [--superuser]
//   aaps-registry import-epsas <csv>
//   aaps-registry changelist <screen> [-q <search>] [--filter key=value]... [--page N]

use aaps_registry::admin::{self, ChangeListQuery};
use aaps_registry::entities::user;
use aaps_registry::serializers::epsa as epsa_import;
use aaps_registry::{db, logging, Settings};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "aaps-registry", version, about = "AAPS regulatory registry")]
struct Cli {
    /// Settings file (default: aaps.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database and its tables
    Init,
    /// Create an API user and print its key
    CreateUser {
        username: String,
        #[arg(long)]
        superuser: bool,
    },
    /// Upsert EPSAs from a CSV file (code,name,category,state)
    ImportEpsas { csv: PathBuf },
    /// Print one page of a back-office list screen as JSON
    Changelist {
        /// epsa, poa, plan, supply-area or sarh
        screen: String,
        #[arg(short = 'q', long)]
        search: Option<String>,
        /// Exact-match filter, e.g. epsa__state=LP
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    logging::init(&settings.logging).context("Failed to initialise logging")?;

    match cli.command {
        Command::Init => run_init(&settings),
        Command::CreateUser {
            username,
            superuser,
        } => run_create_user(&settings, &username, superuser),
        Command::ImportEpsas { csv } => run_import(&settings, &csv),
        Command::Changelist {
            screen,
            search,
            filters,
            page,
        } => run_changelist(&settings, &screen, search, &filters, page),
    }
}

fn open_database(settings: &Settings) -> Result<Connection> {
    let path = &settings.database.path;
    let conn = db::open(path).with_context(|| format!("Failed to open database {}", path.display()))?;
    db::setup_database(&conn).context("Failed to set up database")?;
    Ok(conn)
}

fn run_init(settings: &Settings) -> Result<()> {
    open_database(settings)?;
    info!(path = %settings.database.path.display(), "Database initialised");
    println!("✓ Database ready at {}", settings.database.path.display());
    Ok(())
}

fn run_create_user(settings: &Settings, username: &str, superuser: bool) -> Result<()> {
    let conn = open_database(settings)?;
    let (user, token) = user::create(&conn, username, superuser).context("Failed to create user")?;

    info!(username = %user.username, superuser, "User created");
    println!("✓ User {} created (superuser: {})", user.username, user.is_superuser);
    println!("  API key (shown once): {token}");
    Ok(())
}

fn run_import(settings: &Settings, csv: &std::path::Path) -> Result<()> {
    let mut conn = open_database(settings)?;

    let rows = epsa_import::load_csv(csv).with_context(|| format!("Failed to read {}", csv.display()))?;
    println!("✓ Loaded {} rows from CSV", rows.len());

    let summary = epsa_import::import(&mut conn, &rows, "csv_importer").context("Import failed")?;
    println!("✓ {} EPSAs created, {} updated", summary.created, summary.updated);
    Ok(())
}

fn run_changelist(
    settings: &Settings,
    screen: &str,
    search: Option<String>,
    filters: &[String],
    page: usize,
) -> Result<()> {
    let screen = admin::screen(screen).ok_or_else(|| {
        let known: Vec<&str> = admin::SCREENS.iter().map(|s| s.name).collect();
        anyhow!("Unknown screen '{screen}' (expected one of: {})", known.join(", "))
    })?;

    let mut query = ChangeListQuery {
        q: search,
        page,
        ..Default::default()
    };
    for filter in filters {
        let Some((key, value)) = filter.split_once('=') else {
            bail!("Filters take the form key=value, got '{filter}'");
        };
        query.filters.insert(key.to_string(), value.to_string());
    }

    let conn = open_database(settings)?;
    let list = admin::changelist(&conn, screen, &query).context("Failed to build list")?;
    println!("{}", serde_json::to_string_pretty(&list)?);
    Ok(())
}
