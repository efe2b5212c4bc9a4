//! remoteq: serve and inspect portable queries
//!
//! # Usage
//!
//! ```bash
//! # Serve a JSON data file
//! remoteq serve --data shop.json
//!
//! # Send a serialized AST to a server
//! remoteq run query.json --stream
//!
//! # Inspect an AST without running it
//! remoteq explain query.json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use remoteq::config::{DataFile, RemoteConfig};
use remoteq::prelude::*;
use remoteq::remote;
use remoteq::value;

#[derive(Parser)]
#[command(name = "remoteq")]
#[command(version)]
#[command(about = "Serve and inspect portable queries", long_about = None)]
#[command(after_help = "EXAMPLES:
    remoteq serve --data shop.json --bind 0.0.0.0:7070
    remoteq run query.json --format json
    remoteq parse-type 'core.Sequence<shop.Person>[]'")]
struct Cli {
    /// Configuration file (defaults to <config dir>/remoteq/config.toml)
    #[arg(short, long, global = true, env = "REMOTEQ_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a JSON data file
    Serve {
        /// Data file (overrides `data_path`)
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Bind address (overrides `bind_address`)
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Send a serialized AST to a server and print the result
    Run {
        /// JSON file holding the AST
        ast: PathBuf,

        /// Server address (defaults to `bind_address`)
        #[arg(short, long)]
        address: Option<String>,

        /// Request the result as a stream of records
        #[arg(short, long)]
        stream: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Show an AST, its result type and its include paths
    Explain {
        /// JSON file holding the AST
        ast: PathBuf,
    },
    /// Parse a type descriptor and show its parts
    ParseType {
        /// Descriptor text, e.g. `shop.Person?`
        text: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => RemoteConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RemoteConfig::load_default()?,
    };
    init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::Serve { data, bind } => serve(config, data, bind).await,
        Commands::Run {
            ast,
            address,
            stream,
            format,
        } => run_query(&config, &ast, address, stream, format).await,
        Commands::Explain { ast } => explain(&ast),
        Commands::ParseType { text } => parse_type(&text),
    }
}

fn init_tracing(config: &RemoteConfig, verbose: bool) {
    let fallback = if verbose { "debug" } else { config.log_filter.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(config: RemoteConfig, data: Option<PathBuf>, bind: Option<String>) -> Result<()> {
    let data_path = data
        .or_else(|| config.data_path.clone())
        .context("no data file; pass --data or set data_path")?;
    let (catalog, source) = DataFile::load(&data_path)
        .and_then(DataFile::into_parts)
        .with_context(|| format!("loading {}", data_path.display()))?;
    let executor = ExpressionExecutor::new(Arc::new(catalog), Arc::new(source));

    let address = bind.unwrap_or_else(|| config.bind_address.clone());
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;
    println!("{} {}", "Serving".green().bold(), data_path.display());

    let shutdown = Cancellation::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    remote::serve(listener, executor, config.codec(), shutdown).await?;
    Ok(())
}

fn load_ast(path: &Path) -> Result<Expr> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

async fn run_query(
    config: &RemoteConfig,
    ast: &Path,
    address: Option<String>,
    stream: bool,
    format: OutputFormat,
) -> Result<()> {
    let expr = load_ast(ast)?;
    let address = address.unwrap_or_else(|| config.bind_address.clone());
    tracing::debug!("Sending {} to {}", expr, address);

    let client = RemoteClient::new(TcpConnector::new(address)).with_codec(config.codec());
    let cancel = Cancellation::new();
    let result = if stream {
        let items: Vec<Value> = client.execute_stream(expr, cancel).try_collect().await?;
        Value::List(items)
    } else {
        client.execute_async(expr, cancel).await?
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&value::to_json(&result))?);
        }
        OutputFormat::Table => print_table(&result),
    }
    Ok(())
}

fn print_table(result: &Value) {
    let rows: Vec<&Value> = match result {
        Value::List(items) => items.iter().collect(),
        Value::Null => vec![],
        other => vec![other],
    };
    let Some(first) = rows.first() else {
        println!("{}", "(no rows)".dimmed());
        return;
    };

    let Some(columns) = first.as_record().map(|r| r.fields.keys().cloned().collect::<Vec<_>>())
    else {
        for row in &rows {
            println!("{}", row);
        }
        return;
    };

    println!(
        "{}",
        columns
            .iter()
            .map(|c| c.cyan().bold().to_string())
            .collect::<Vec<_>>()
            .join(" | ")
    );
    for row in &rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| match row.as_record().and_then(|r| r.get(c)) {
                Some(v) => v.to_string(),
                None => "NULL".dimmed().to_string(),
            })
            .collect();
        println!("{}", cells.join(" | "));
    }
    println!("{}", format!("({} rows)", rows.len()).dimmed());
}

fn explain(path: &Path) -> Result<()> {
    let expr = load_ast(path)?;
    println!("{}", "Expression:".green().bold());
    println!("  {}", expr.to_string().white());
    println!("{}", "Result type:".green().bold());
    println!("  {}", expr.ty().to_string().yellow());

    let includes = expr.include_paths();
    if !includes.is_empty() {
        println!("{}", "Includes:".green().bold());
        for path in includes {
            println!("  {}", path.cyan());
        }
    }
    Ok(())
}

fn parse_type(text: &str) -> Result<()> {
    let ty: TypeDescriptor = text.parse()?;
    println!("{} {}", "Type:".green().bold(), ty.to_string().yellow());
    println!("  {:<12} {}", "name".dimmed(), ty.qualified_name());
    println!("  {:<12} {}", "fingerprint".dimmed(), format!("{:016x}", ty.fingerprint()));
    println!("  {:<12} {}", "collection".dimmed(), ty.is_collection);
    println!("  {:<12} {}", "enum".dimmed(), ty.is_enum);
    println!("  {:<12} {}", "nullable".dimmed(), ty.is_nullable);
    for arg in &ty.generic_args {
        println!("  {:<12} {}", "generic".dimmed(), arg);
    }
    for member in &ty.members {
        println!("  {:<12} {}: {}", "member".dimmed(), member.name, member.ty);
    }
    Ok(())
}
