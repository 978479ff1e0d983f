//! maria-pg-quality CLI - data-quality operations on MariaDB and PostgreSQL tables.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use maria_pg_quality::engine::{select_occurrences, Occurrence, ReplacementPlan};
use maria_pg_quality::{
    build_matrix, CastDirection, ColumnSelection, Config, ConnectorCatalog, JoinRequest, MetadataLoader,
    QualityError, ResultSet, Session, Slot, SqlValue, Statement, TableContext,
};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "maria-pg-quality")]
#[command(about = "Search, replace, unify and join data in MariaDB and PostgreSQL tables")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

/// A table behind a named connection.
#[derive(Args)]
struct TableArgs {
    /// Connection name from the configuration
    #[arg(short = 'n', long)]
    connection: String,

    /// Table name
    #[arg(short, long)]
    table: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Test database connections
    HealthCheck,

    /// List tables with a preview of their first rows
    Tables {
        /// Connection name from the configuration
        #[arg(short = 'n', long)]
        connection: String,
    },

    /// Show a table's columns, buckets and primary key
    Schema {
        #[command(flatten)]
        table: TableArgs,
    },

    /// Find rows where any selected column contains a substring
    Search {
        #[command(flatten)]
        table: TableArgs,

        /// Column to search (repeatable; default: all columns)
        #[arg(long = "column")]
        columns: Vec<String>,

        /// Substring to look for
        pattern: String,
    },

    /// Replace a substring (text) or a whole value (other types)
    Replace {
        #[command(flatten)]
        table: TableArgs,

        /// Column to replace in (repeatable; default: all columns)
        #[arg(long = "column")]
        columns: Vec<String>,

        /// Value to replace
        #[arg(long)]
        old: String,

        /// Replacement value
        #[arg(long)]
        new: String,

        /// Show the per-occurrence plan instead of replacing everything
        #[arg(long, conflicts_with = "select")]
        plan: bool,

        /// Replace only these occurrence ids from the plan (comma separated)
        #[arg(long, value_delimiter = ',')]
        select: Vec<usize>,

        /// Commit the changes (default: dry run)
        #[arg(long)]
        commit: bool,
    },

    /// Check whether a value may replace another in a column
    Validate {
        #[command(flatten)]
        table: TableArgs,

        /// Column to check
        #[arg(long)]
        column: String,

        /// Value being replaced
        #[arg(long)]
        old: String,

        /// Candidate value (omit to check NULL)
        #[arg(long)]
        new: Option<String>,
    },

    /// List distinct values of a column with their counts
    Distinct {
        #[command(flatten)]
        table: TableArgs,

        /// Column to group by
        #[arg(long)]
        column: String,
    },

    /// Merge several distinct values of a column into one
    Unify {
        #[command(flatten)]
        table: TableArgs,

        /// Column to unify
        #[arg(long)]
        column: String,

        /// Value to merge (repeatable)
        #[arg(long = "value", required = true)]
        values: Vec<String>,

        /// Value all of them become
        #[arg(long)]
        into: String,

        /// Commit the changes (default: dry run)
        #[arg(long)]
        commit: bool,
    },

    /// Join two tables, on the same server or across servers
    Join {
        /// First table as connection/table
        #[arg(long, value_parser = parse_table_ref)]
        first: (String, String),

        /// Second table as connection/table
        #[arg(long, value_parser = parse_table_ref)]
        second: (String, String),

        /// Join column of the first table
        #[arg(long)]
        first_column: String,

        /// Join column of the second table
        #[arg(long)]
        second_column: String,

        /// Columns of the first table to show (repeatable; default: all)
        #[arg(long = "select-first")]
        select_first: Vec<String>,

        /// Columns of the second table to show (repeatable; default: all)
        #[arg(long = "select-second")]
        select_second: Vec<String>,

        /// Cast direction: 0 automatic, 1 second to first, 2 first to second
        #[arg(long, default_value = "0")]
        cast: u8,

        /// Keep unmatched rows of both tables
        #[arg(long)]
        full_outer: bool,
    },

    /// Show the column compatibility matrix of two tables
    Compat {
        /// First table as connection/table
        #[arg(long, value_parser = parse_table_ref)]
        first: (String, String),

        /// Second table as connection/table
        #[arg(long, value_parser = parse_table_ref)]
        second: (String, String),
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), QualityError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| QualityError::Config(e.to_string()))?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);
    let catalog = ConnectorCatalog::from_config(&config)?;

    let result = execute(&cli, &config, &catalog).await;
    catalog.close_all().await;
    result
}

async fn execute(cli: &Cli, config: &Config, catalog: &ConnectorCatalog) -> Result<(), QualityError> {
    let mut session = Session::new();

    match &cli.command {
        Commands::HealthCheck => {
            let results = health_check(catalog).await;
            let healthy = results.iter().all(|r| r.connected);

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("Health Check Results:");
                for r in &results {
                    println!(
                        "  {} ({} {}:{}/{}): {} ({}ms)",
                        r.name,
                        r.dialect,
                        r.host,
                        r.port,
                        r.database,
                        if r.connected { "OK" } else { "FAILED" },
                        r.latency_ms
                    );
                    if let Some(ref err) = r.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !healthy {
                return Err(QualityError::Config("Health check failed".to_string()));
            }
        }

        Commands::Tables { connection } => {
            let connector = catalog.require(connection)?;
            let overview = MetadataLoader::new(connector.as_ref())
                .list_tables(config.engine.preview_rows)
                .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&overview)?);
            } else {
                for table in &overview.tables {
                    println!("\n{} ({} preview rows)", table.name, table.rows.len());
                    print_result_set(&table.rows);
                }
                if !overview.without_primary_key.is_empty() {
                    println!(
                        "\nTables without primary key (not editable): {}",
                        overview.without_primary_key.join(", ")
                    );
                }
            }
        }

        Commands::Schema { table } => {
            let ctx = select(&mut session, catalog, Slot::First, table).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&ctx.schema)?);
            } else {
                let schema = &ctx.schema;
                println!(
                    "{}.{} ({}, {} rows)",
                    schema.database, schema.name, schema.dialect, schema.row_count
                );
                for col in schema.columns() {
                    let pk = if schema.primary_key().contains(&col.name) { " PK" } else { "" };
                    let length = col
                        .max_length
                        .map(|l| format!(" max {}", l))
                        .unwrap_or_default();
                    println!(
                        "  {:<24} {:<24} {:<8}{}{}{}",
                        col.name,
                        col.native_type,
                        col.bucket,
                        if col.is_nullable { "" } else { " NOT NULL" },
                        length,
                        pk
                    );
                }
            }
        }

        Commands::Search {
            table,
            columns,
            pattern,
        } => {
            let ctx = select(&mut session, catalog, Slot::First, table).await?;
            let rows = ctx.search().search(&selection(columns), pattern).await?;
            emit_rows(cli, &rows)?;
        }

        Commands::Replace {
            table,
            columns,
            old,
            new,
            plan,
            select: ids,
            commit,
        } => {
            let ctx = select(&mut session, catalog, Slot::First, table).await?;
            let engine = ctx.replace();

            if *plan || !ids.is_empty() {
                let included = inclusion_flags(ctx, columns)?;
                let (plan, occurrences) = engine.compute_plan(&included, old, new).await?;

                if ids.is_empty() {
                    if cli.output_json {
                        let report = PlanReport { plan: &plan, occurrences: &occurrences };
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        print_plan(&plan, &occurrences);
                    }
                } else {
                    let chosen = select_occurrences(&occurrences, ids)?;
                    let summary = engine.replace_selected(&chosen, old, new, *commit).await?;
                    if cli.output_json {
                        println!("{}", serde_json::to_string_pretty(&summary)?);
                    } else {
                        println!("{}", summary.message());
                    }
                }
            } else {
                let rows = engine
                    .replace_all(&selection(columns), old, new, *commit)
                    .await?;
                if !cli.output_json {
                    println!(
                        "{} {} rows",
                        if *commit { "Updated" } else { "Dry run would update" },
                        rows.len()
                    );
                }
                emit_rows(cli, &rows)?;
            }
        }

        Commands::Validate {
            table,
            column,
            old,
            new,
        } => {
            let ctx = select(&mut session, catalog, Slot::First, table).await?;
            let verdict = ctx.validator().validate(column, new.as_deref(), old).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                println!("{}", verdict);
            }
            verdict.into_result()?;
        }

        Commands::Distinct { table, column } => {
            let ctx = select(&mut session, catalog, Slot::First, table).await?;
            let values = ctx.unify().list_distinct(column).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                for v in &values {
                    println!("  {:>8}  {}", v.count, v.value);
                }
            }
        }

        Commands::Unify {
            table,
            column,
            values,
            into,
            commit,
        } => {
            let ctx = select(&mut session, catalog, Slot::First, table).await?;
            let engine = ctx.unify();
            let preview = engine.affected_rows(column, values).await?;
            let updated = engine.unify(column, values, into, *commit).await?;

            if cli.output_json {
                let report = UnifyReport {
                    rows: &preview,
                    updated,
                    committed: *commit,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let rows = preview.iter().map(u64::to_string).collect::<Vec<_>>();
                println!("Rows affected: {}", rows.join(", "));
                println!(
                    "{} {} rows",
                    if *commit { "Unified" } else { "Dry run would unify" },
                    updated
                );
            }
        }

        Commands::Join {
            first,
            second,
            first_column,
            second_column,
            select_first,
            select_second,
            cast,
            full_outer,
        } => {
            select_ref(&mut session, catalog, Slot::First, first).await?;
            select_ref(&mut session, catalog, Slot::Second, second).await?;
            let request = JoinRequest {
                join_columns: vec![first_column.clone(), second_column.clone()],
                select_first: selection(select_first),
                select_second: selection(select_second),
                cast: CastDirection::from_code(*cast)?,
                full_outer: *full_outer,
            };
            let result = session.join_engine()?.join(&request).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result_set(&ResultSet::new(result.columns.clone(), result.rows.clone()));
                for u in &result.unmatched {
                    println!("Unmatched in {}: {}", u.table, u.count);
                }
            }
        }

        Commands::Compat { first, second } => {
            select_ref(&mut session, catalog, Slot::First, first).await?;
            select_ref(&mut session, catalog, Slot::Second, second).await?;
            let (a, b) = session.pair()?;
            let matrix = build_matrix(&a.schema, &b.schema);

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&matrix)?);
            } else {
                println!("{:<24} {}", "", matrix.columns.join("\t"));
                for (row, cells) in matrix.rows.iter().zip(&matrix.cells) {
                    let codes = cells
                        .iter()
                        .map(|c| c.code.code().to_string())
                        .collect::<Vec<_>>();
                    println!("{:<24} {}", row, codes.join("\t"));
                }
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct HealthResult {
    name: String,
    dialect: String,
    host: String,
    port: u16,
    database: String,
    connected: bool,
    latency_ms: u64,
    error: Option<String>,
}

#[derive(Serialize)]
struct PlanReport<'a> {
    plan: &'a ReplacementPlan,
    occurrences: &'a [Occurrence],
}

#[derive(Serialize)]
struct UnifyReport<'a> {
    rows: &'a [u64],
    updated: u64,
    committed: bool,
}

async fn health_check(catalog: &ConnectorCatalog) -> Vec<HealthResult> {
    let mut results = Vec::new();
    for name in catalog.names() {
        let Some(connector) = catalog.get(name) else {
            continue;
        };
        let target = connector.target().clone();
        let start = Instant::now();
        let outcome = match connector.acquire().await {
            Ok(mut conn) => conn.execute(&Statement::new("SELECT 1")).await.map(|_| ()),
            Err(e) => Err(e),
        };
        results.push(HealthResult {
            name: name.to_string(),
            dialect: target.dialect.to_string(),
            host: target.host,
            port: target.port,
            database: target.database,
            connected: outcome.is_ok(),
            latency_ms: start.elapsed().as_millis() as u64,
            error: outcome.err().map(|e| e.to_string()),
        });
    }
    results
}

async fn select<'s>(
    session: &'s mut Session,
    catalog: &ConnectorCatalog,
    slot: Slot,
    table: &TableArgs,
) -> Result<&'s TableContext, QualityError> {
    session
        .select_table(slot, catalog.require(&table.connection)?, &table.table)
        .await
}

async fn select_ref(
    session: &mut Session,
    catalog: &ConnectorCatalog,
    slot: Slot,
    (connection, table): &(String, String),
) -> Result<(), QualityError> {
    session
        .select_table(slot, catalog.require(connection)?, table)
        .await?;
    Ok(())
}

fn parse_table_ref(s: &str) -> Result<(String, String), String> {
    match s.split_once('/') {
        Some((connection, table)) if !connection.is_empty() && !table.is_empty() => {
            Ok((connection.to_string(), table.to_string()))
        }
        _ => Err(format!("expected connection/table, got '{}'", s)),
    }
}

fn selection(columns: &[String]) -> ColumnSelection {
    if columns.is_empty() {
        ColumnSelection::All
    } else {
        ColumnSelection::Only(columns.to_vec())
    }
}

/// One flag per table column, set for the requested columns.
fn inclusion_flags(ctx: &TableContext, columns: &[String]) -> Result<Vec<bool>, QualityError> {
    let included = ctx.schema.resolve(&selection(columns))?;
    Ok(ctx
        .schema
        .columns()
        .iter()
        .map(|c| included.iter().any(|i| i.name == c.name))
        .collect())
}

fn emit_rows(cli: &Cli, rows: &ResultSet) -> Result<(), QualityError> {
    if cli.output_json {
        println!("{}", serde_json::to_string_pretty(rows)?);
    } else {
        print_result_set(rows);
    }
    Ok(())
}

fn print_result_set(rows: &ResultSet) {
    println!("{}", rows.columns.join("\t"));
    for row in &rows.rows {
        let cells = row.iter().map(SqlValue::to_string).collect::<Vec<_>>();
        println!("{}", cells.join("\t"));
    }
}

fn print_plan(plan: &ReplacementPlan, occurrences: &[Occurrence]) {
    println!("{} occurrences in {} rows", occurrences.len(), plan.len());
    for entry in &plan.entries {
        for (i, column) in plan.columns.iter().enumerate() {
            if !entry.changed[i] {
                continue;
            }
            let new = entry.new_values[i]
                .as_ref()
                .map(SqlValue::to_string)
                .unwrap_or_default();
            println!(
                "  row {:>5}  {:<20} {} -> {}",
                entry.row_no, column, entry.old_values[i], new
            );
        }
    }
    println!("\nOccurrences (use --select):");
    for o in occurrences {
        let key = o.primary_key.iter().map(SqlValue::to_string).collect::<Vec<_>>();
        println!("  {:>4}  row {:>5}  ({})  {}", o.id, o.row_no, key.join(", "), o.column);
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
