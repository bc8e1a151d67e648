//! romql: command-line front end
//!
//! Inspect filter expressions and query game catalogue databases.
//!
//! # Usage
//!
//! ```bash
//! # How a filter parses
//! romql explain "Year >= 1986 AND (Publisher LIKE '%soft%' OR Developer = 'Acme')"
//!
//! # Query two databases at once
//! romql query --db snes=snes.sqlite --db nes=nes.sqlite -c Name,Year -f "Year < 1990" -s -Year
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use romql::builder::where_clause;
use romql::lexer::tokenize;
use romql::prelude::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "romql")]
#[command(version)]
#[command(about = "Filter expressions and federated queries over game catalogue databases", long_about = None)]
#[command(after_help = "EXAMPLES:
    romql explain \"Years.Year BETWEEN 1983 AND 1985\"
    romql criteria \"Year >= 1986 AND (Publisher LIKE '%soft%' OR Developer = 'Acme')\"
    romql where '[{\"Year\": \">=1986\", \"Publisher\": \"soft\"}]'
    romql query --db snes=snes.sqlite -c Name,Genre -f \"Name ~ '^Super'\" -s Name")]
struct Cli {
    /// Config file (default: <config dir>/romql/config.toml)
    #[arg(long, global = true, env = "ROMQL_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the token stream of a filter
    Tokens { expr: String },
    /// Show the flattened AST and the WHERE text of a filter
    Explain { expr: String },
    /// Translate a filter into per-column criteria rows (JSON)
    Criteria {
        expr: String,
        /// Drop terms that have no per-column form instead of failing
        #[arg(long)]
        lenient: bool,
    },
    /// Turn per-column criteria rows (JSON) into a filter
    Where { json: String },
    /// List the catalog columns
    Columns,
    /// Run a federated query
    Query {
        /// Database to attach, as name=path (repeatable)
        #[arg(long = "db", value_name = "NAME=PATH")]
        databases: Vec<String>,

        /// Catalog column ids to select
        #[arg(short, long, value_delimiter = ',', default_value = "Name")]
        columns: Vec<String>,

        /// Filter expression
        #[arg(short, long)]
        filter: Option<String>,

        /// Sort keys; prefix with '-' for descending
        #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true)]
        sort: Vec<String>,

        /// Only query these schemas (repeatable)
        #[arg(long = "schema")]
        schemas: Vec<String>,

        /// Show the statements without running them
        #[arg(short, long)]
        dry_run: bool,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "romql=debug" } else { "romql=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => RomqlConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RomqlConfig::load_default()?,
    };
    let catalog = config.catalog()?;

    match cli.command {
        Commands::Tokens { expr } => show_tokens(&expr),
        Commands::Explain { expr } => explain(&expr, &catalog),
        Commands::Criteria { expr, lenient } => {
            let mode = if lenient {
                Strictness::Lenient
            } else {
                Strictness::Strict
            };
            let rows = report(filter_to_criteria(&expr, &catalog, mode))?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(())
        }
        Commands::Where { json } => {
            let rows: Vec<CriteriaRow> =
                serde_json::from_str(&json).context("criteria must be a JSON array of objects")?;
            let sql = report(criteria_to_where(&rows, &catalog))?;
            println!("{}", sql);
            Ok(())
        }
        Commands::Columns => {
            show_columns(&catalog);
            Ok(())
        }
        Commands::Query {
            databases,
            columns,
            filter,
            sort,
            schemas,
            dry_run,
            format,
        } => {
            let mut request = QueryRequest::new(columns);
            if let Some(filter) = filter {
                request = request.filter(filter);
            }
            for key in &sort {
                request = request.sort(key.parse()?);
            }
            for schema in schemas {
                request = request.schema(schema);
            }
            run_query(config, databases, request, dry_run, format).await
        }
    }
}

/// Print filter-level errors inline and exit non-zero.
fn report<T>(result: RomqlResult<T>) -> anyhow::Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_recoverable() => {
            eprintln!("{} {}", "Filter error:".red().bold(), e);
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}

fn show_tokens(expr: &str) -> anyhow::Result<()> {
    let tokens = report(tokenize(expr))?;
    for token in tokens {
        println!(
            "{:>4}..{:<4} {:12} {}",
            token.span.start.to_string().dimmed(),
            token.span.end.to_string().dimmed(),
            format!("{:?}", token.kind).cyan(),
            token.text.white()
        );
    }
    Ok(())
}

fn explain(expr: &str, catalog: &Catalog) -> anyhow::Result<()> {
    println!("{} {}", "Filter:".dimmed(), expr.yellow());
    println!();

    let tree = report(romql::parse(expr))?.flatten_logical();

    println!("{}", "Flattened AST:".green().bold());
    print_tree(&tree, 1);
    println!();

    println!("{}", "Filter text:".green().bold());
    println!("  {}", tree.to_sql().white());

    let columns: Vec<String> = catalog.columns().iter().map(|c| c.id.clone()).collect();
    let everything: FulfillableColumnSet = columns.into_iter().collect();
    match where_clause(catalog, &everything, &tree) {
        Ok(sql) => {
            println!();
            println!("{}", "WHERE (full schema):".green().bold());
            println!("  {}", sql.white());
        }
        Err(e) => println!("  {} {}", "⚠".yellow(), e),
    }

    match expr_to_criteria(&tree, catalog, Strictness::Strict) {
        Ok(rows) => {
            println!();
            println!("{}", "Column criteria:".green().bold());
            for (i, row) in rows.iter().enumerate() {
                let cells: Vec<String> = row
                    .iter()
                    .map(|(col, text)| format!("{}: {}", col.cyan(), text.yellow()))
                    .collect();
                println!("  {} {}", format!("[{}]", i).dimmed(), cells.join(", "));
            }
        }
        Err(e) => {
            println!();
            println!("{} {}", "No column criteria:".yellow(), e);
        }
    }
    Ok(())
}

fn print_tree(expr: &Expr, depth: usize) {
    let indent = "  ".repeat(depth);
    match expr {
        Expr::Value(lit) => {
            let text = match lit.kind {
                LiteralKind::Identifier => lit.text.cyan(),
                LiteralKind::String => format!("'{}'", lit.text).yellow(),
                _ => lit.text.white(),
            };
            println!("{}{}", indent, text);
        }
        Expr::Op { op, operands } => {
            println!("{}{}", indent, op.to_string().magenta().bold());
            for operand in operands {
                print_tree(operand, depth + 1);
            }
        }
    }
}

fn show_columns(catalog: &Catalog) {
    println!(
        "{:14} {:8} {:36} {}",
        "Id".white().bold(),
        "Kind".white().bold(),
        "Projection".white().bold(),
        "Filter names".white().bold()
    );
    println!("{}", "─".repeat(80).dimmed());
    for column in catalog.columns() {
        println!(
            "{:14} {:8} {:36} {}",
            column.id.cyan().bold(),
            format!("{:?}", column.kind).to_lowercase().yellow(),
            column.select.white(),
            column.filters.join(", ").dimmed()
        );
    }
}

async fn run_query(
    mut config: RomqlConfig,
    databases: Vec<String>,
    request: QueryRequest,
    dry_run: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    for entry in databases {
        let (name, path) = entry
            .split_once('=')
            .with_context(|| format!("--db expects NAME=PATH, got '{}'", entry))?;
        config.databases.push(romql::config::DatabaseEntry {
            name: name.to_string(),
            path: PathBuf::from(path),
        });
    }

    let mut federation = Federation::from_config(&config).await?;
    if federation.attachments().next().is_none() {
        println!(
            "{}",
            "⚠ No databases attached. Use --db NAME=PATH or list them in the config file."
                .yellow()
        );
    }

    if dry_run {
        println!("{}", "Generated SQL:".green().bold());
        for (i, sql) in report(federation.statements(&request))?.iter().enumerate() {
            println!("{} {}", format!("[container {}]", i).dimmed(), sql.white());
        }
        return Ok(());
    }

    let result = report(federation.query(&request).await)?;
    format_output(&result, &format)?;
    Ok(())
}

fn format_output(result: &QueryResult, format: &OutputFormat) -> anyhow::Result<()> {
    if result.rows.is_empty() {
        println!("{}", "(no results)".dimmed());
        return Ok(());
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result.to_records())?);
        }
        OutputFormat::Table => {
            let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
            for row in &result.rows {
                for (w, cell) in widths.iter_mut().zip(row) {
                    *w = (*w).max(cell.to_string().chars().count());
                }
            }

            let header: Vec<String> = result
                .columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:width$}", c, width = *w))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in &result.rows {
                let cells: Vec<String> = row
                    .iter()
                    .zip(&widths)
                    .map(|(cell, w)| {
                        let text = format!("{:width$}", cell.to_string(), width = *w);
                        if cell.is_null() {
                            text.dimmed().to_string()
                        } else {
                            text
                        }
                    })
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", result.rows.len().to_string().cyan());
        }
    }
    Ok(())
}
