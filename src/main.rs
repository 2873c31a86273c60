//! Enginewatch CLI
//!
//! Command-line front end for the monitoring data core:
//! - Stream live readings for devices
//! - Run cached historical queries
//! - Export historical data
//! - Generate a default config file

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use enginewatch::config::generate_default_config;
use enginewatch::telemetry::init_tracing;
use enginewatch::{
    Aggregation, Config, CredentialProvider, ExportFormat, Granularity, MonitoringService, Query,
    SubscribeOptions, TimeRange,
};

#[derive(Parser)]
#[command(name = "enginewatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Engine-room monitoring data client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Auth token (falls back to ENGINEWATCH_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream live readings
    Watch {
        /// Device IDs (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        devices: Vec<String>,
        /// Metric types (comma-separated, empty = all)
        #[arg(short, long, value_delimiter = ',')]
        metrics: Vec<String>,
        /// Update frequency in milliseconds
        #[arg(short, long)]
        frequency: Option<u64>,
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Query historical data
    Query {
        /// Device ID
        device: String,
        /// Metric types (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        metrics: Vec<String>,
        /// Window length in minutes, ending now
        #[arg(short, long, default_value = "60")]
        last: i64,
        /// Granularity (raw, minute, hour, day)
        #[arg(short, long, default_value = "raw")]
        granularity: Granularity,
        /// Aggregation (avg, min, max, sum, count)
        #[arg(short, long, default_value = "avg")]
        aggregation: Aggregation,
    },

    /// Export historical data
    Export {
        /// Device ID
        device: String,
        /// Metric types (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        metrics: Vec<String>,
        /// Window length in minutes, ending now
        #[arg(short, long, default_value = "1440")]
        last: i64,
        /// Format (csv, excel, json)
        #[arg(short, long, default_value = "csv")]
        format: ExportFormat,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Config written to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_tracing(&config.logging);

    tracing::info!("Enginewatch v{}", env!("CARGO_PKG_VERSION"));

    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("ENGINEWATCH_TOKEN").ok());
    let credentials: Option<CredentialProvider> = token.clone().map(|t| {
        let provider: CredentialProvider = Arc::new(move || Some(t.clone()));
        provider
    });

    let service = MonitoringService::from_config(config, credentials).await?;

    match cli.command {
        Commands::Watch {
            devices,
            metrics,
            frequency,
            duration,
        } => {
            let token = token.as_deref().unwrap_or_default();
            watch(&service, token, devices, metrics, frequency, duration).await?;
        }
        Commands::Query {
            device,
            metrics,
            last,
            granularity,
            aggregation,
        } => {
            let query = build_query(&device, metrics, last)?
                .granularity(granularity)
                .aggregation(aggregation);
            let result = service.execute_query(&query).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Export {
            device,
            metrics,
            last,
            format,
            output,
        } => {
            let query = build_query(&device, metrics, last)?;
            let blob = service.export(&query, format).await?;
            std::fs::write(&output, &blob)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Exported {} bytes to {}", blob.len(), output.display());
        }
        Commands::Config { .. } => {}
    }

    service.shutdown().await;
    Ok(())
}

fn build_query(device: &str, metrics: Vec<String>, last_minutes: i64) -> anyhow::Result<Query> {
    let range = TimeRange::last_minutes(last_minutes);
    Ok(Query::new(device, range.start, range.end)?.metrics(metrics))
}

async fn watch(
    service: &MonitoringService,
    token: &str,
    devices: Vec<String>,
    metrics: Vec<String>,
    frequency: Option<u64>,
    duration: Option<u64>,
) -> anyhow::Result<()> {
    service.connect(token).await?;

    let mut updates = service.live().subscribe();
    let mut events = service.events();

    let subscription = service
        .subscribe(
            &devices,
            &metrics,
            SubscribeOptions {
                frequency_ms: frequency,
                ..SubscribeOptions::default()
            },
        )
        .await?;
    tracing::info!(
        subscription_id = subscription.subscription_id.as_deref().unwrap_or_default(),
        devices = devices.len(),
        "Watching"
    );

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => {
                    for reading in update.readings.iter() {
                        println!("{}", serde_json::to_string(reading)?);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Output lagging, readings skipped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            event = events.recv() => {
                if let Ok(event) = event {
                    if !matches!(event, enginewatch::MonitorEvent::DataUpdate { .. }) {
                        eprintln!("{}", serde_json::to_string(&event)?);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
        }
    }

    service.unsubscribe(None).await.ok();

    let metrics = service.performance().snapshot().await;
    tracing::info!(
        messages = metrics.messages_processed,
        dropped = metrics.messages_dropped,
        throughput = metrics.throughput,
        average_latency_ms = metrics.average_latency_ms,
        "Watch finished"
    );
    Ok(())
}
