//! datamove CLI - run and inspect dependency-aware data transfers.

use clap::{Parser, Subcommand};
use datamove::core::{Column, Definition, LogicalType, Value};
use datamove::drivers::{CoupledGenerator, MemoryStore};
use datamove::transfer::SharedBuffer;
use datamove::{
    EngineConfig, MetricsSink, PathRef, RunSummary, TransferEngine, TransferError,
    TransferListener,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "datamove")]
#[command(about = "Dependency-aware, backpressured tabular data transfers")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

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
    /// Move generated rows between in-memory stores
    Bench {
        /// Rows per source table
        #[arg(long, default_value = "10000")]
        rows: usize,

        /// Number of source tables
        #[arg(long, default_value = "1")]
        tables: usize,

        /// Override number of consumer workers
        #[arg(long)]
        workers: Option<usize>,

        /// Generate the tables from one coupled stream and run them in lockstep
        #[arg(long)]
        lockstep: bool,
    },

    /// Load and validate the configuration file
    CheckConfig,
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

async fn run() -> Result<(), TransferError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = match &cli.config {
        Some(path) => {
            let config = EngineConfig::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::CheckConfig => {
            if cli.config.is_none() {
                return Err(TransferError::Config(
                    "--config is required for check-config".to_string(),
                ));
            }
            print_effective_config(&config, cli.output_json)?;
        }

        Commands::Bench {
            rows,
            tables,
            workers,
            lockstep,
        } => {
            let mut config = config;
            if let Some(w) = workers {
                config.properties.workers = Some(w);
            }
            config.validate()?;

            let mut engine = TransferEngine::from_config(&config);
            if cli.output_json && config.properties.metrics_path.is_none() {
                // Keep stdout for the JSON document.
                engine = engine.with_metrics_sink(MetricsSink::Buffer(SharedBuffer::new()));
            }

            let target = MemoryStore::new("target");
            let sources = if lockstep {
                generated_sources(rows, tables)
            } else {
                seeded_sources(rows, tables)
            };
            for source in sources {
                let name = source.name().to_string();
                engine.register_transfer(source, target.path(&name));
            }

            let listeners = tokio::select! {
                result = engine.run() => result?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, abandoning run");
                    return Err(TransferError::Cancelled);
                }
            };
            let summary = RunSummary::from_listeners(&listeners);

            if cli.output_json {
                println!("{}", summary.to_json()?);
            } else {
                print_results(&listeners, &summary, &target);
            }

            if !summary.is_success() {
                return Err(TransferError::transfer(
                    "bench",
                    format!(
                        "{} of {} transfers failed",
                        summary.transfers_failed, summary.transfers_total
                    ),
                ));
            }
        }
    }

    Ok(())
}

fn bench_definition() -> Definition {
    Definition::new(vec![
        Column::new("id", LogicalType::BigInt).not_null(),
        Column::new("label", LogicalType::Text),
        Column::new("amount", LogicalType::Double),
    ])
}

/// Tables `t0..tN` in a `bench` store, `rows` rows each.
fn seeded_sources(rows: usize, tables: usize) -> Vec<PathRef> {
    let store = MemoryStore::new("bench");
    (0..tables)
        .map(|t| {
            let name = format!("t{}", t);
            let data = (0..rows)
                .map(|i| {
                    vec![
                        Value::I64(i as i64),
                        Value::Text(format!("{}-{}", name, i)),
                        Value::F64(i as f64 * 0.5),
                    ]
                })
                .collect();
            store.insert_table(&name, bench_definition(), data);
            store.path(&name)
        })
        .collect()
}

/// Coupled streams `t0..tN`; stream `t` produces `rows - t` rows so the
/// lockstep group has members that finish early.
fn generated_sources(rows: usize, tables: usize) -> Vec<PathRef> {
    let names: Vec<String> = (0..tables).map(|t| format!("t{}", t)).collect();
    let streams: Vec<(&str, usize)> = names
        .iter()
        .enumerate()
        .map(|(t, name)| (name.as_str(), rows.saturating_sub(t)))
        .collect();
    CoupledGenerator::new("bench", &streams).paths()
}

fn print_results(listeners: &[Arc<TransferListener>], summary: &RunSummary, target: &MemoryStore) {
    println!("\nTransfer results:");
    for listener in listeners {
        let status = if listener.is_success() { "OK" } else { "FAILED" };
        println!(
            "  [{}] {}: {} rows, {} batches, {} commits in {:.2}s",
            status,
            listener.name(),
            listener.row_count(),
            listener.batch_count(),
            listener.commit_count(),
            listener.elapsed().as_secs_f64()
        );
        for error in listener.exceptions() {
            println!("      Error: {}", error);
        }
    }

    println!("\n{}", summary.summary());
    println!("  Run ID: {}", summary.run_id);
    println!("  Target tables: {}", target.table_names().join(", "));
}

fn print_effective_config(config: &EngineConfig, as_json: bool) -> Result<(), TransferError> {
    let props = &config.properties;
    let effective = serde_json::json!({
        "dependency_resolution": config.dependency_resolution,
        "workers": props.get_workers(),
        "queue_capacity": props.get_queue_capacity(),
        "fetch_size": props.get_fetch_size(),
        "batch_size": props.get_batch_size(),
        "commit_frequency": props.get_commit_frequency(),
        "timeout_secs": props.get_timeout().as_secs_f64(),
        "sample_interval_secs": props.get_sample_interval().as_secs_f64(),
        "metrics_path": props.metrics_path,
        "target_policy": props.get_target_policy(),
        "source_policy": props.get_source_policy(),
        "unsupported_types": props.get_unsupported_types(),
    });

    if as_json {
        println!("{}", serde_json::to_string_pretty(&effective)?);
    } else {
        println!("Configuration is valid. Effective properties:");
        if let Some(map) = effective.as_object() {
            for (key, value) in map {
                println!("  {}: {}", key, value);
            }
        }
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

    // Logs go to stderr so stdout stays machine-readable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
