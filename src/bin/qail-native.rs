//! qail-native: run a query or ping a server over the native protocol.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use qail_native::{ConnectOptions, Connection, Value};

#[derive(Parser, Debug)]
#[command(name = "qail-native", version, about = "Native protocol client", long_about = None)]
struct Cli {
    /// Options file (defaults to <config dir>/qail/native.toml)
    #[arg(short, long, env = "QAIL_NATIVE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "QAIL_HOST")]
    host: Option<String>,

    #[arg(short, long, env = "QAIL_PORT")]
    port: Option<u16>,

    #[arg(short, long, env = "QAIL_USER")]
    user: Option<String>,

    #[arg(long, env = "QAIL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long, env = "QAIL_TENANT")]
    tenant: Option<String>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a statement and print its rows
    Query {
        sql: String,
        /// Rows per round trip
        #[arg(long)]
        fetch_size: Option<u32>,
        /// Print rows as JSON objects
        #[arg(long)]
        json: bool,
    },
    /// Connect, ping and report server details
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut options = load_options(&cli)?;
    match &cli.command {
        Command::Query {
            sql,
            fetch_size,
            json,
        } => {
            if let Some(rows) = fetch_size {
                options.fetch_size = *rows;
            }
            run_query(&options, sql, *json).await
        }
        Command::Ping => run_ping(&options).await,
    }
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// File (explicit or default) first, then flags and environment on top.
fn load_options(cli: &Cli) -> Result<ConnectOptions> {
    let mut options = match &cli.config {
        Some(path) => ConnectOptions::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConnectOptions::load_default().context("Failed to load default options")?,
    };
    if let Some(host) = &cli.host {
        options.host = host.clone();
    }
    if let Some(port) = cli.port {
        options.port = port;
    }
    if let Some(user) = &cli.user {
        options.user = user.clone();
    }
    if let Some(password) = &cli.password {
        options.password = password.clone();
    }
    if let Some(tenant) = &cli.tenant {
        options.tenant = Some(tenant.clone());
    }
    options.validate().context("Invalid connection options")?;
    Ok(options)
}

async fn run_ping(options: &ConnectOptions) -> Result<()> {
    let started = std::time::Instant::now();
    let mut conn = Connection::connect(options)
        .await
        .with_context(|| format!("Failed to connect to {}", options.address()))?;
    conn.ping().await.context("Ping failed")?;
    let elapsed = started.elapsed();

    let info = conn.server_info();
    println!("{} {}", "✓".green(), options.address().cyan());
    println!("  Banner:   {}", info.banner);
    println!("  Session:  {}", info.session_id);
    println!("  Protocol: {}", info.protocol_version);
    println!("  Charset:  {}", conn.charset().name());
    println!("  Elapsed:  {:?}", elapsed);
    conn.close().await.context("Failed to close connection")?;
    Ok(())
}

async fn run_query(options: &ConnectOptions, sql: &str, json: bool) -> Result<()> {
    let mut conn = Connection::connect(options)
        .await
        .with_context(|| format!("Failed to connect to {}", options.address()))?;

    let mut stmt = conn.statement();
    let mut rs = stmt.execute_query(sql).await.context("Query failed")?;
    let names: Vec<String> = rs.columns().iter().map(|f| f.name.clone()).collect();

    let mut rows: Vec<Vec<Value>> = Vec::new();
    while rs.next().await.context("Fetch failed")? {
        rows.push(rs.values()?);
    }
    let affected = rs.affected();
    drop(rs);
    stmt.close().await.context("Failed to release statement")?;
    drop(stmt);
    conn.close().await.context("Failed to close connection")?;

    if names.is_empty() {
        println!("{} {} row(s) affected", "✓".green(), affected);
    } else if json {
        print_json(&names, &rows)?;
    } else {
        print_table(&names, &rows);
    }
    Ok(())
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => serde_json::Value::Bool(*v),
        Value::Int(v) => serde_json::Value::from(*v),
        Value::UInt(v) => serde_json::Value::from(*v),
        Value::Float(v) => serde_json::Value::from(*v),
        other => serde_json::Value::String(other.to_string()),
    }
}

fn print_json(names: &[String], rows: &[Vec<Value>]) -> Result<()> {
    let objects: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            let map = names
                .iter()
                .cloned()
                .zip(row.iter().map(json_value))
                .collect::<serde_json::Map<_, _>>();
            serde_json::Value::Object(map)
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&objects)?);
    Ok(())
}

fn print_table(names: &[String], rows: &[Vec<Value>]) {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(ToString::to_string).collect())
        .collect();
    let widths: Vec<usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .filter_map(|row| row.get(i))
                .map(|c| c.chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header: Vec<String> = names
        .iter()
        .zip(&widths)
        .map(|(n, w)| format!("{:<w$}", n, w = *w))
        .collect();
    println!("{}", header.join(" | ").bold());
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("{}", rule.join("-+-").dimmed());
    for row in &cells {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect();
        println!("{}", line.join(" | "));
    }
    println!();
    println!("{} {} row(s)", "✓".green(), cells.len());
}
