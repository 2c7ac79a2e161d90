//! # FFM Ledger CLI (`ffm`)
//!
//! The `ffm` binary manages a local ledger of hourly retail counters:
//! schema setup, the item catalog, payload import, daily rollups and
//! inspection.
//!
//! ## Usage
//!
//! ```bash
//! ffm --config ./config/ffm.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ffm init` | Create the SQLite database and run schema migrations |
//! | `ffm item add <name> --price N` | Register an item |
//! | `ffm item list` | List registered items |
//! | `ffm import <payload.json>` | Store a recognition payload and roll up its date |
//! | `ffm rebuild <date>` / `--all` | Recompute daily summaries |
//! | `ffm show <date> [--item NAME]` | Print the hourly grid and daily summary |
//! | `ffm stats` | Row counts, date range, cache size |
//! | `ffm schema columns <table>` | Inspect a table's columns |
//! | `ffm schema drop-column <table> <column>` | Manual schema repair |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ffm_core::models::NewItem;
use ffm_ledger::{catalog, config, import, migrate, rollup, schema, show, stats, telemetry};

/// FFM Ledger CLI: hourly retail counters with daily rollups.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with at least a `[db] path` entry.
#[derive(Parser)]
#[command(
    name = "ffm",
    about = "FFM Ledger: hourly retail counters with daily rollups",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ffm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite file and applies every pending migration step.
    /// Running it again is safe.
    Init,

    /// Manage the item catalog.
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },

    /// Import a recognition payload (JSON).
    ///
    /// Product names must already be registered. The payload's date is
    /// rolled up after the facts are stored.
    Import {
        /// Path to the payload file.
        path: PathBuf,
    },

    /// Recompute daily summaries from hourly facts.
    Rebuild {
        /// Date to rebuild (`2025-01-02`, `2025/1/2`, `2025.1.2`).
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        date: Option<String>,

        /// Rebuild every date.
        #[arg(long)]
        all: bool,
    },

    /// Show one day's hourly grid and daily summary.
    Show {
        date: String,

        /// Show a single item instead of the cross-item totals.
        #[arg(long)]
        item: Option<String>,
    },

    /// Show database statistics.
    Stats,

    /// Manual schema maintenance.
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },
}

/// Item catalog subcommands.
#[derive(Subcommand)]
enum ItemAction {
    /// Register a new item.
    Add {
        name: String,

        #[arg(long)]
        price: i64,

        /// Shelf life in hours.
        #[arg(long)]
        freshness: Option<i64>,

        /// `normal` or `limited`.
        #[arg(long, default_value = "normal")]
        sales_class: String,

        /// `ambient`, `heated`, `chukaman` or `oden`.
        #[arg(long, default_value = "ambient")]
        item_type: String,

        /// Register the item as inactive.
        #[arg(long)]
        inactive: bool,
    },
    /// List registered items.
    List,
}

/// Schema maintenance subcommands.
#[derive(Subcommand)]
enum SchemaAction {
    /// List the columns of a table.
    Columns { table: String },
    /// Drop a column, rebuilding the table on SQLite builds without native support.
    DropColumn { table: String, column: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    telemetry::init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
        }
        Commands::Item { action } => match action {
            ItemAction::Add {
                name,
                price,
                freshness,
                sales_class,
                item_type,
                inactive,
            } => {
                let item = NewItem {
                    item_name: name,
                    price,
                    freshness,
                    sales_class: sales_class.parse()?,
                    item_type: item_type.parse()?,
                    is_active: !inactive,
                };
                catalog::run_item_add(&cfg, &item).await?;
            }
            ItemAction::List => {
                catalog::run_item_list(&cfg).await?;
            }
        },
        Commands::Import { path } => {
            import::run_import(&cfg, &path).await?;
        }
        Commands::Rebuild { date, all } => {
            rollup::run_rebuild(&cfg, date.as_deref(), all).await?;
        }
        Commands::Show { date, item } => {
            show::run_show(&cfg, &date, item.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Schema { action } => match action {
            SchemaAction::Columns { table } => {
                schema::run_columns(&cfg, &table).await?;
            }
            SchemaAction::DropColumn { table, column } => {
                schema::run_drop_column(&cfg, &table, &column).await?;
            }
        },
    }

    Ok(())
}
