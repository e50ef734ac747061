//! mssql-key-migrate CLI - SQL Server table migration with identity and FK remapping.

use clap::{Parser, Subcommand};
use mssql_key_migrate::{Config, MigrateError, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "mssql-key-migrate")]
#[command(about = "SQL Server table migration with identity and foreign key remapping")]
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

#[derive(Subcommand)]
enum Commands {
    /// Run the migration wave by wave
    Run {
        /// Dry run: validate waves and classify tables without touching data
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the wave plan with table classifications and wave order findings
    Plan,

    /// Test database connections
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

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let orchestrator = Orchestrator::new(config).await?;

    let outcome = match cli.command {
        Commands::Run { dry_run } => run_migration(&orchestrator, dry_run, cli.output_json).await,
        Commands::Plan => show_plan(&orchestrator, cli.output_json).await,
        Commands::HealthCheck => health_check(&orchestrator, cli.output_json).await,
    };

    orchestrator.close().await;
    outcome
}

async fn run_migration(
    orchestrator: &Orchestrator,
    dry_run: bool,
    output_json: bool,
) -> Result<(), MigrateError> {
    let result = orchestrator.run(dry_run).await?;

    if output_json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    let status_msg = if dry_run { "Dry run completed!" } else { "Migration completed!" };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Tables: {}", result.tables_total);
    println!("  Rows staged: {}", result.rows_staged);
    println!("  Rows inserted: {}", result.rows_inserted);
    for table in &result.tables {
        println!(
            "    [wave {}] {} ({}): staged {}, inserted {}, skipped {}, keys remapped {}",
            table.wave,
            table.table,
            table.table_type,
            table.rows_staged,
            table.rows_inserted,
            table.rows_skipped,
            table.keys_remapped
        );
        if table.assumed_existing > 0 {
            println!(
                "      {} rows assumed pre-existing at the destination",
                table.assumed_existing
            );
        }
    }
    if !result.warnings.is_empty() {
        println!("  Warnings:");
        for w in &result.warnings {
            println!("    {}", w);
        }
    }
    Ok(())
}

async fn show_plan(orchestrator: &Orchestrator, output_json: bool) -> Result<(), MigrateError> {
    let plan = orchestrator.plan().await?;

    if output_json {
        println!("{}", plan.to_json()?);
        return Ok(());
    }

    println!("Migration plan:");
    for table in &plan.tables {
        println!(
            "  [wave {}] {} - {} ({:?})",
            table.wave, table.table, table.table_type, table.strategy
        );
        if !table.shadow_columns.is_empty() {
            println!("      shadows: {}", table.shadow_columns.join(", "));
        }
    }
    if !plan.dependencies.is_empty() {
        println!("\nDependencies:");
        for dep in &plan.dependencies {
            println!("  {}", dep);
        }
    }
    for w in &plan.report.warnings {
        println!("Warning: {}", w);
    }
    for v in &plan.report.violations {
        println!("Violation: {}", v);
    }
    if !plan.report.is_clean() {
        return Err(MigrateError::WaveOrder(plan.report.violations.clone()));
    }
    Ok(())
}

async fn health_check(orchestrator: &Orchestrator, output_json: bool) -> Result<(), MigrateError> {
    let result = orchestrator.health_check().await?;

    if output_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Health Check Results:");
        println!(
            "  Source: {} ({}ms)",
            if result.source_connected { "OK" } else { "FAILED" },
            result.source_latency_ms
        );
        if let Some(ref err) = result.source_error {
            println!("    Error: {}", err);
        }
        println!(
            "  Destination: {} ({}ms)",
            if result.destination_connected { "OK" } else { "FAILED" },
            result.destination_latency_ms
        );
        if let Some(ref err) = result.destination_error {
            println!("    Error: {}", err);
        }
        println!(
            "\n  Overall: {}",
            if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
        );
    }

    if !result.healthy {
        return Err(MigrateError::pool("Health check failed", "health-check"));
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
