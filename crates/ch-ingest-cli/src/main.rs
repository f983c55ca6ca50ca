//! ch-ingest CLI - transfers between ClickHouse and flat files.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use ch_ingest::{Config, IngestEngine, IngestError, ProgressReport, TransferState};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "ch-ingest")]
#[command(about = "Schema-aware transfers between ClickHouse and flat files")]
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

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tables the source can read
    Tables,

    /// Resolve and print the source schema
    Schema,

    /// Print a sample of the selected columns with type warnings
    Preview {
        /// Maximum rows to sample (default: engine.sample_size)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run a transfer session from source to target
    Transfer {
        /// Progress poll interval in milliseconds
        #[arg(long, default_value = "500")]
        poll_ms: u64,
    },

    /// Test source and target connections
    HealthCheck,
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

async fn run() -> Result<(), IngestError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(IngestError::Config)?;

    let mut config = Config::load(&cli.config)?;
    info!(
        "Loaded configuration from {:?} ({})",
        cli.config,
        &config.hash()[..12]
    );

    match cli.command {
        Commands::Tables => {
            let engine = IngestEngine::from_config(&config);
            let tables = engine.list_tables(&config.source).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                println!("Tables in {}:", config.source.describe());
                for table in &tables {
                    println!("  {}", table);
                }
            }
        }

        Commands::Schema => {
            let engine = IngestEngine::from_config(&config);
            let columns = engine
                .resolve_schema(&config.source, config.join.as_ref())
                .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&columns)?);
            } else {
                println!("Schema of {}:", config.source.describe());
                for column in &columns {
                    println!(
                        "  {:<32} {}{}",
                        column.name,
                        column.source_type,
                        if column.nullable { " (nullable)" } else { "" }
                    );
                }
            }
        }

        Commands::Preview { limit } => {
            if let Some(limit) = limit {
                if limit == 0 {
                    return Err(IngestError::invalid("--limit must be at least 1"));
                }
                config.engine.sample_size = limit;
            }
            let engine = IngestEngine::from_config(&config);
            let columns: Vec<String> = if config.columns.is_empty() {
                engine
                    .resolve_schema(&config.source, config.join.as_ref())
                    .await?
                    .into_iter()
                    .map(|c| c.name)
                    .collect()
            } else {
                config.columns.clone()
            };
            let preview = engine
                .preview_for_target(
                    &config.source,
                    &columns,
                    config.join.as_ref(),
                    config.target.system(),
                )
                .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&preview)?);
            } else {
                let header: Vec<&str> = preview.columns.iter().map(|c| c.name.as_str()).collect();
                println!("{}", header.join("\t"));
                for row in &preview.rows {
                    let fields: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                    println!("{}", fields.join("\t"));
                }
                println!("\n{} rows sampled", preview.rows.len());
                if !preview.warnings.is_empty() {
                    println!("\nType warnings:");
                    for warning in &preview.warnings {
                        println!("  {}", warning);
                    }
                }
            }
        }

        Commands::Transfer { poll_ms } => {
            let cancel_token = setup_signal_handler().await?;
            let engine = IngestEngine::from_config(&config);
            let id = engine
                .start_transfer(
                    config.source.clone(),
                    config.target.clone(),
                    config.columns.clone(),
                    config.join.clone(),
                )
                .await?;
            info!("Session {} started", id);

            let mut ticker = tokio::time::interval(Duration::from_millis(poll_ms.max(10)));
            let mut cancel_requested = false;
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled(), if !cancel_requested => {
                        cancel_requested = true;
                        if let Err(e) = engine.cancel(&id).await {
                            warn!("Cancel not applied: {}", e);
                        }
                    }
                    _ = ticker.tick() => {
                        let report = engine.get_progress(&id).await?;
                        if cli.progress {
                            eprintln!("{}", report.to_json()?);
                        }
                        if report.state.is_terminal() {
                            break;
                        }
                    }
                }
            }

            let report = engine.release(&id).await?;
            print_report(&report, cli.output_json)?;

            match report.state {
                TransferState::Completed => {}
                TransferState::Cancelled => return Err(IngestError::Cancelled),
                _ => {
                    return Err(match report.error {
                        Some(error) => IngestError::Classified(error),
                        None => IngestError::Config(format!("session ended {}", report.state)),
                    })
                }
            }
        }

        Commands::HealthCheck => {
            let engine = IngestEngine::from_config(&config);
            let result = engine
                .check_connections(&config.source, &config.target)
                .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    config.source.system(),
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target ({}): {} ({}ms)",
                    config.target.system(),
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if let Some(report) = result.source_error.or(result.target_error) {
                return Err(IngestError::Classified(report));
            }
        }
    }

    Ok(())
}

fn print_report(report: &ProgressReport, json: bool) -> Result<(), IngestError> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("\nTransfer {}:", report.state);
    println!("  Session: {}", report.session_id);
    println!("  Records: {}", report.records_processed);
    println!("  Bytes: {}", report.bytes_transferred);
    println!("  Duration: {:.2}s", report.elapsed_seconds);
    if !report.warnings.is_empty() {
        println!("  Type warnings:");
        for warning in &report.warnings {
            println!("    {}", warning);
        }
    }
    Ok(())
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

/// Cancel the running session on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, IngestError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => eprintln!("\nReceived SIGINT. Cancelling transfer..."),
            _ = sigterm.recv() => eprintln!("\nReceived SIGTERM. Cancelling transfer..."),
        }
        token.cancel();
    });

    Ok(cancel_token)
}

/// Cancel the running session on Ctrl-C.
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, IngestError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Cancelling transfer...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
