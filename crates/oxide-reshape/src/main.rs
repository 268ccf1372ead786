//! oxide-reshape CLI
//!
//! Command-line tool for inspecting and reshaping SQLite tables.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_reshape::parse_rename;
use oxide_reshape::prelude::*;

/// Safe column-level schema evolution for SQLite tables.
#[derive(Parser)]
#[command(name = "oxide-reshape")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the live shape of a table.
    Inspect {
        /// Table name.
        table: String,
    },

    /// List tables.
    Tables {
        /// Include views.
        #[arg(long)]
        views: bool,
    },

    /// Add the columns and indexes of a shape file that the table lacks.
    Add {
        /// Target shape (JSON).
        #[arg(short, long)]
        shape: PathBuf,

        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Bring a table to a shape file, rebuilding it if needed.
    Rebuild {
        /// Target shape (JSON).
        #[arg(short, long)]
        shape: PathBuf,

        /// Column rename, as OLD=NEW. Repeatable.
        #[arg(short, long = "rename", value_parser = parse_rename)]
        renames: Vec<(String, String)>,

        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_shape(shape: &TableShape) {
    println!("\n{}", shape.name);
    println!("{:-<60}", "");
    for column in &shape.columns {
        let mut flags = Vec::new();
        if column.is_primary_key {
            flags.push("PRIMARY KEY".to_string());
        }
        if !column.nullable && !column.is_primary_key {
            flags.push("NOT NULL".to_string());
        }
        if let Some(default) = column.default.to_sql() {
            flags.push(format!("DEFAULT {}", default));
        }
        if let Some(fk) = &column.foreign_key {
            flags.push(format!(
                "-> {}.{}",
                fk.referenced_table, fk.referenced_column
            ));
        }
        println!(
            " {:<24} {:<8} {}",
            column.name,
            column.column_type.as_str(),
            flags.join(" ")
        );
    }
    for index in &shape.indexes {
        println!(
            " {}index {} ({})",
            if index.unique { "unique " } else { "" },
            index.name,
            index.columns.join(", ")
        );
    }
    println!();
}

fn print_result(result: &AppliedResult) {
    match result.strategy {
        Strategy::Noop => info!("Table '{}' is already up to date.", result.table),
        Strategy::Additive => info!(
            "Added {} column(s) and {} index(es) to '{}'.",
            result.columns_added.len(),
            result.indexes_rebuilt.len(),
            result.table
        ),
        Strategy::Rebuild => info!(
            "Rebuilt '{}': {} row(s) copied, {} index(es) recreated, {} dropped, \
             {} view(s) and trigger(s) recreated.",
            result.table,
            result.rows_copied,
            result.indexes_rebuilt.len(),
            result.indexes_dropped.len(),
            result.dependents_recreated.len()
        ),
    }
    print_shape(&result.shape);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Connect to database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&cli.database)
        .await?;
    let mut conn = pool.acquire().await?;
    let mut migrator = SchemaMigrator::new(&mut *conn);

    match cli.command {
        Commands::Inspect { table } => {
            let shape = migrator.inspect(&table).await?;
            if cli.json {
                print_json(&shape)?;
            } else {
                print_shape(&shape);
            }
        }

        Commands::Tables { views } => {
            let entries = migrator.inspector().list_tables(views).await?;
            if cli.json {
                print_json(&entries)?;
            } else if entries.is_empty() {
                info!("No tables found.");
            } else {
                for entry in &entries {
                    println!(" {:<6} {}", entry.kind.as_str(), entry.name);
                }
            }
        }

        Commands::Add { shape, dry_run } => {
            let desired = TableShape::from_json_file(&shape)?;
            let mut plan = migrator
                .plan_additive(&desired.name, &desired.columns)
                .await?;
            let live = migrator.inspect(&desired.name).await?;
            plan.index_additions = desired
                .indexes
                .iter()
                .filter(|index| live.get_index(&index.name).is_none())
                .cloned()
                .collect();

            if dry_run {
                info!("Dry run mode - SQL will be printed but not executed.");
                print!("{}", plan);
                for sql in migrator.statements_for_additive(&plan) {
                    println!("{};", sql);
                }
                return Ok(());
            }

            let result = migrator.apply_additive(&plan).await?;
            if cli.json {
                print_json(&result)?;
            } else {
                print_result(&result);
            }
        }

        Commands::Rebuild {
            shape,
            renames,
            dry_run,
        } => {
            let desired = TableShape::from_json_file(&shape)?;
            let renames: RenameMap = renames.into_iter().collect();

            if dry_run {
                info!("Dry run mode - SQL will be printed but not executed.");
                let plan = migrator
                    .plan_rebuild(&desired.name, &desired, &renames)
                    .await?;
                print!("{}", plan);
                let statements = if plan.is_empty() {
                    Vec::new()
                } else if plan.requires_rebuild {
                    migrator.statements_for_rebuild(&plan, &desired).await?
                } else {
                    migrator.statements_for_additive(&plan)
                };
                for sql in statements {
                    println!("{};", sql);
                }
                return Ok(());
            }

            let result = migrator
                .reconcile_rebuild(&desired.name, &desired, &renames)
                .await?;
            if cli.json {
                print_json(&result)?;
            } else {
                print_result(&result);
            }
        }
    }

    Ok(())
}
