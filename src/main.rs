use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sqlbridge::db::connection::{default_config_path, find_connection, load_connections};
use sqlbridge::db::{
    CellValue, DbClient, ListFilter, Outcome, QueryResult, SortDirection, TableChanges,
};
use sqlbridge::export::{
    export_result, export_stream, CsvSink, JsonLinesSink, RowSink, SqlInsertSink,
};
use sqlbridge::sql::{Filter, FilterOp, Filters, OrderBy, SelectRequest};

/// One client for many SQL engines
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Connections file (defaults to ~/.config/sqlbridge/connections.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Saved connection to use
    #[arg(long = "connect", short = 'c', global = true)]
    connect: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run SQL; several statements run as one transaction. Ctrl+C cancels.
    Query { sql: String },
    /// List tables, views and materialized views
    Tables {
        #[arg(long)]
        schema: Option<String>,
    },
    /// List the columns of a table
    Columns {
        table: String,
        #[arg(long)]
        schema: Option<String>,
    },
    /// Show primary, foreign and incoming keys of a table
    Keys {
        table: String,
        #[arg(long)]
        schema: Option<String>,
    },
    /// Page through a table
    Select {
        table: String,
        #[arg(long)]
        schema: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Sort column, optionally suffixed with `:desc`
        #[arg(long)]
        order: Vec<String>,
        /// Equality filter as `column=value`
        #[arg(long)]
        filter: Vec<String>,
        /// Raw WHERE fragment, used instead of --filter
        #[arg(long = "where")]
        where_clause: Option<String>,
    },
    /// Stream a table or query to stdout
    Export {
        table: Option<String>,
        #[arg(long)]
        schema: Option<String>,
        /// Export the result of this query instead of a table
        #[arg(long, conflicts_with = "table")]
        sql: Option<String>,
        #[arg(long, value_enum, default_value_t = Format::Csv)]
        format: Format,
        #[arg(long, default_value_t = 1000)]
        chunk: usize,
    },
    /// Apply a JSON change set atomically
    Apply { changes: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Csv,
    Tsv,
    Json,
    Sql,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(default_config_path);
    let saved = load_connections(&path)
        .with_context(|| format!("Failed to load connections from {}", path.display()))?;
    let Some(name) = cli.connect.as_deref() else {
        eprintln!("Error: --connect <name> is required");
        print_saved(&saved);
        std::process::exit(2);
    };
    let Some(mut config) = find_connection(&saved, name) else {
        eprintln!("Error: no saved connection named {:?}", name);
        print_saved(&saved);
        std::process::exit(1);
    };
    config.resolve_password(true)?;

    let client: DbClient = DbClient::new(config);
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", client.config().display_string()))?;

    let result = run(&client, cli.command).await;
    client.disconnect().await?;
    result
}

fn print_saved(saved: &[sqlbridge::db::ConnectionConfig]) {
    eprintln!("Saved connections:");
    for c in saved {
        eprintln!("  - {} ({})", c.name, c.engine);
    }
}

async fn run(client: &DbClient, command: Command) -> Result<()> {
    match command {
        Command::Query { sql } => {
            let query = client.query(&sql)?;
            let handle = query.cancel_handle();
            let canceler = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() && handle.cancel() {
                    eprintln!("Canceling...");
                }
            });
            let outcome = query.run().await;
            canceler.abort();
            match outcome {
                Ok(Outcome::Completed(results)) => {
                    for result in &results {
                        print_result(result);
                    }
                }
                Ok(Outcome::Canceled) => eprintln!("Query canceled"),
                Err(e) => {
                    if let Some(structured) = e.statement_error() {
                        bail!("{}", structured.display_full());
                    }
                    return Err(e.into());
                }
            }
        }
        Command::Tables { schema } => {
            let filter = ListFilter {
                schema,
                ..ListFilter::default()
            };
            let mut entities = client.list_tables(&filter).await?;
            entities.extend(client.list_views(&filter).await?);
            entities.extend(client.list_materialized_views(&filter).await?);
            for e in entities {
                println!("{:<6} {}.{}", e.entity_type.label(), e.schema, e.name);
            }
        }
        Command::Columns { table, schema } => {
            for c in client.list_columns(schema.as_deref(), Some(&table)).await? {
                println!(
                    "{:<30} {:<20} {}{}",
                    c.column_name,
                    c.data_type,
                    if c.nullable { "NULL" } else { "NOT NULL" },
                    c.default_value
                        .map(|d| format!(" DEFAULT {}", d))
                        .unwrap_or_default()
                );
            }
        }
        Command::Keys { table, schema } => {
            let schema = schema.as_deref();
            let keys = client.get_primary_keys(schema, &table).await?;
            let names: Vec<&str> = keys.iter().map(|k| k.column_name.as_str()).collect();
            println!("Primary key: ({})", names.join(", "));
            for fk in client.list_foreign_keys(schema, &table).await? {
                println!(
                    "  {} -> {}.{}({})  [{}]",
                    fk.from_column, fk.to_schema, fk.to_table, fk.to_column, fk.constraint_name
                );
            }
            for fk in client.list_incoming_keys(schema, &table).await? {
                println!(
                    "  {} <- {}.{}({})  [{}]",
                    fk.to_column, fk.from_schema, fk.from_table, fk.from_column, fk.constraint_name
                );
            }
        }
        Command::Select {
            table,
            schema,
            limit,
            offset,
            order,
            filter,
            where_clause,
        } => {
            let mut request = SelectRequest::new(schema.as_deref(), table).page(offset, limit);
            request.order_by = order.iter().map(|o| parse_order(o)).collect();
            request.filters = match where_clause {
                Some(raw) => Some(Filters::Raw(raw)),
                None if filter.is_empty() => None,
                None => Some(Filters::all(
                    filter.iter().map(|f| parse_filter(f)).collect::<Result<_>>()?,
                )),
            };
            print_result(&client.select_top(&request).await?);
        }
        Command::Export {
            table,
            schema,
            sql,
            format,
            chunk,
        } => {
            let stdout = io::stdout();
            let out = stdout.lock();
            let dialect = client.dialect();
            let target = table.as_deref().unwrap_or("exported");
            let mut sink: Box<dyn RowSink> = match format {
                Format::Csv => Box::new(CsvSink::new(out)),
                Format::Tsv => Box::new(CsvSink::tsv(out)),
                Format::Json => Box::new(JsonLinesSink::new(out)),
                Format::Sql => {
                    Box::new(SqlInsertSink::new(out, dialect, schema.as_deref(), target))
                }
            };

            let streaming = client.supported_features().cursors;
            let written = match (sql, table) {
                (Some(sql), _) if streaming => {
                    let mut stream = client.query_stream(&sql, chunk).await?;
                    export_stream(&mut stream, sink.as_mut()).await?
                }
                (Some(sql), _) => {
                    export_result(&client.execute_single(&sql).await?, sink.as_mut())?
                }
                (None, Some(table)) if streaming => {
                    let request = SelectRequest::new(schema.as_deref(), table);
                    let mut stream = client.select_top_stream(&request, chunk).await?;
                    if let Some(total) = stream.total_rows {
                        eprintln!("Exporting {} rows", total);
                    }
                    export_stream(&mut stream, sink.as_mut()).await?
                }
                (None, Some(table)) => {
                    let request = SelectRequest::new(schema.as_deref(), table);
                    export_result(&client.select_top(&request).await?, sink.as_mut())?
                }
                (None, None) => bail!("export needs a table or --sql"),
            };
            eprintln!("{} rows written", written);
        }
        Command::Apply { changes } => {
            let text = std::fs::read_to_string(&changes)
                .with_context(|| format!("Failed to read {}", changes.display()))?;
            let changes: TableChanges =
                serde_json::from_str(&text).context("Change set is not valid JSON")?;
            let updated = client.apply_changes(&changes).await?;
            eprintln!(
                "Applied {} inserts, {} updates, {} deletes",
                changes.inserts.iter().map(|i| i.data.len()).sum::<usize>(),
                changes.updates.len(),
                changes.deletes.len()
            );
            for result in &updated {
                print_result(result);
            }
        }
    }
    Ok(())
}

fn parse_order(arg: &str) -> OrderBy {
    match arg.rsplit_once(':') {
        Some((field, dir)) if dir.eq_ignore_ascii_case("desc") => OrderBy::Spec {
            field: field.to_string(),
            direction: SortDirection::Desc,
        },
        Some((field, dir)) if dir.eq_ignore_ascii_case("asc") => OrderBy::Field(field.to_string()),
        _ => OrderBy::Field(arg.to_string()),
    }
}

fn parse_filter(arg: &str) -> Result<Filter> {
    let Some((field, value)) = arg.split_once('=') else {
        bail!("filter {:?} is not column=value", arg);
    };
    Ok(Filter::new(field.trim(), FilterOp::Eq, value.trim()))
}

fn print_result(result: &QueryResult) {
    if result.fields.is_empty() {
        println!(
            "{} ({} rows affected, {:.1?})",
            result.command,
            result.affected_rows.unwrap_or(0),
            result.execution_time
        );
        return;
    }

    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(CellValue::display).collect())
        .collect();
    let widths: Vec<usize> = result
        .fields
        .iter()
        .enumerate()
        .map(|(i, f)| {
            cells
                .iter()
                .map(|row| row.get(i).map_or(0, |c| c.chars().count()))
                .chain(std::iter::once(f.name.chars().count()))
                .max()
                .unwrap_or(0)
                .min(60)
        })
        .collect();

    let mut out = io::stdout().lock();
    let line = |values: Vec<&str>| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<w$}", truncate(v, *w), w = *w))
            .collect::<Vec<_>>()
            .join(" | ")
    };
    let _ = writeln!(out, "{}", line(result.fields.iter().map(|f| f.name.as_str()).collect()));
    let _ = writeln!(
        out,
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-")
    );
    for row in &cells {
        let _ = writeln!(out, "{}", line(row.iter().map(String::as_str).collect()));
    }
    let _ = writeln!(out, "({} rows, {:.1?})", result.row_count, result.execution_time);
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(width.saturating_sub(1)).collect();
        t.push('~');
        t
    }
}
