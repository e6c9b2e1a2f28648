//! dbf-pg-migrate CLI - dBase/FoxPro to PostgreSQL migration.

use clap::{Parser, Subcommand};
use dbf_pg_migrate::config::DEFAULT_EXTENSION;
use dbf_pg_migrate::{
    inspect, Config, MigrateError, MigrationHandle, MigrationJob, MigrationResult, Orchestrator,
    PgPool, RunState, TableStatus, TargetPool,
};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "dbf-pg-migrate")]
#[command(about = "Migrate dBase/FoxPro .dbf tables into PostgreSQL")]
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

    /// Print progress events as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every .dbf file of the source directory
    Run {
        /// Override source directory
        #[arg(long)]
        source_dir: Option<PathBuf>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,
    },

    /// List source files and the tables they would create (no database needed)
    Inspect {
        /// Source directory (defaults to source.dir from the config file)
        #[arg(long)]
        source_dir: Option<PathBuf>,
    },

    /// Validate row counts between source files and target tables
    Validate,

    /// Test the database connection
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

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    // Inspect works from a bare directory; the config file is optional then.
    if let Commands::Inspect {
        source_dir: Some(dir),
    } = &cli.command
    {
        let extension = if cli.config.is_file() {
            Config::load(&cli.config)?.source.extension
        } else {
            DEFAULT_EXTENSION.to_string()
        };
        return run_inspect(dir, &extension, cli.output_json);
    }

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            source_dir,
            target_schema,
        } => {
            if let Some(dir) = source_dir {
                config.source.dir = dir;
            }
            if let Some(schema) = target_schema {
                config.target.schema = schema;
            }
            config.validate()?;

            let cancel_token = setup_signal_handler()?;
            let job = MigrationJob::from_config(&config)?.with_cancel(cancel_token);
            let (handle, mut events) = MigrationHandle::start(job);

            while let Some(event) = events.recv().await {
                if cli.progress {
                    eprintln!("{}", serde_json::to_string(&event)?);
                }
            }

            let result = handle.join().await?;
            report(&result, cli.output_json)?;

            if result.status == RunState::Cancelled {
                return Err(MigrateError::Cancelled);
            }
            if result.tables_failed > 0 {
                return Err(MigrateError::TablesFailed {
                    failed: result.tables_failed,
                    total: result.tables_total,
                });
            }
        }

        Commands::Inspect { source_dir: None } => {
            run_inspect(&config.source.dir, &config.source.extension, cli.output_json)?;
        }

        Commands::Inspect { source_dir: Some(_) } => unreachable!(), // Handled above

        Commands::Validate => {
            // Read-only: no run log.
            config.migration.log_file = None;
            let orchestrator = Orchestrator::new(MigrationJob::from_config(&config)?);
            let checks = orchestrator.validate().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                for check in &checks {
                    println!(
                        "  {} {}: source={} target={}",
                        if check.matches { "OK" } else { "MISMATCH" },
                        check.table,
                        check.source_rows,
                        check.target_rows
                    );
                }
            }

            let mismatched = checks.iter().filter(|c| !c.matches).count();
            if mismatched > 0 {
                return Err(MigrateError::TablesFailed {
                    failed: mismatched,
                    total: checks.len(),
                });
            }
            if !cli.output_json {
                println!("Validation completed successfully");
            }
        }

        Commands::HealthCheck => {
            let pool = PgPool::connect(&config.target, config.migration.insert_batch_rows).await?;
            let latency = pool.ping().await?;
            pool.close().await;

            if cli.output_json {
                let result = json!({
                    "connected": true,
                    "host": config.target.host,
                    "port": config.target.port,
                    "database": config.target.database,
                    "latency_ms": latency.as_millis() as u64,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Target (PostgreSQL {}:{}/{}): OK ({}ms)",
                    config.target.host,
                    config.target.port,
                    config.target.database,
                    latency.as_millis()
                );
            }
        }
    }

    Ok(())
}

fn run_inspect(dir: &std::path::Path, extension: &str, output_json: bool) -> Result<(), MigrateError> {
    let entries = inspect(dir, extension)?;

    if output_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("{} source files in {}", entries.len(), dir.display());
    for entry in &entries {
        match &entry.error {
            Some(err) => println!("\n  {} -> {}: unreadable ({})", entry.file, entry.table, err),
            None => {
                println!(
                    "\n  {} -> {} ({} records, {} active)",
                    entry.file, entry.table, entry.record_count, entry.active_records
                );
                for col in &entry.columns {
                    println!("    {} {}", col.name, col.data_type);
                }
            }
        }
    }
    Ok(())
}

fn report(result: &MigrationResult, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    let status_msg = match result.status {
        RunState::Cancelled => "Migration cancelled!",
        _ => "Migration completed!",
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!(
        "  Tables: {}/{} ({} skipped)",
        result.tables_success, result.tables_total, result.tables_skipped
    );
    println!("  Rows: {}", result.rows_transferred);
    println!("  Throughput: {} rows/sec", result.rows_per_second);
    for table in result
        .tables
        .iter()
        .filter(|t| t.status == TableStatus::Failed)
    {
        println!(
            "  Failed: {} ({})",
            table.table,
            table.error.as_deref().unwrap_or("unknown error")
        );
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

    // Logs go to stderr so --output-json keeps stdout clean.
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

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// The migration stops before the next table once the token is cancelled.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => eprintln!("\nReceived SIGINT. Stopping after the current table..."),
            _ = sigterm.recv() => eprintln!("\nReceived SIGTERM. Stopping after the current table..."),
        }
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current table...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
