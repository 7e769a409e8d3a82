use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use swirl::config::{StoreBackend, StoreSettings, SwirlConfig};
use swirl::store::BucketStore;
use swirl::{Decision, Limiter, MemoryStore};

/// Sliding window rate limiter operator tool.
#[derive(Debug, Parser)]
#[command(name = "swirl", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record usage for a key and print the resulting status
    Increment {
        /// Rate limit key
        key: String,

        /// Units of usage per call
        #[arg(short, long, default_value_t = 1)]
        amount: i64,

        /// Number of calls to make
        #[arg(short, long, default_value_t = 1)]
        repeat: u32,

        /// Pause between calls in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
    /// Print the effective configuration
    Config,
}

/// One line of `increment` output.
#[derive(Debug, Serialize)]
struct DecisionReport<'a> {
    key: &'a str,
    exceeded: bool,
    remaining: u64,
    limit: u64,
    period_secs: u64,
    reset_at: DateTime<Utc>,
}

impl<'a> DecisionReport<'a> {
    fn new(key: &'a str, decision: &Decision) -> Self {
        let status = decision.status();
        Self {
            key,
            exceeded: decision.is_exceeded(),
            remaining: status.remaining,
            limit: status.limit,
            period_secs: status.period.as_secs(),
            reset_at: status.reset_at,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = match &cli.config {
        Some(path) => SwirlConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SwirlConfig::default(),
    };

    match cli.command {
        Command::Config => {
            print!("{}", config.to_yaml()?);
        }
        Command::Increment {
            key,
            amount,
            repeat,
            interval_ms,
        } => {
            let store = build_store(&config.store).await?;
            let limiter = Limiter::new(store, config.limiter.to_limiter_config())?;
            info!(
                limit = limiter.config().limit,
                period = ?limiter.config().period,
                bucket_width = ?limiter.config().bucket_width,
                "Rate limiter initialized"
            );

            let interval = Duration::from_millis(interval_ms);
            let run = async {
                for call in 0..repeat {
                    if call > 0 && !interval.is_zero() {
                        tokio::time::sleep(interval).await;
                    }
                    let decision = limiter.increment(&key, amount).await?;
                    if decision.is_exceeded() {
                        warn!("{}", decision.status());
                    }
                    println!("{}", serde_json::to_string(&DecisionReport::new(&key, &decision))?);
                }
                Ok::<_, anyhow::Error>(())
            };

            tokio::select! {
                result = run => result?,
                _ = shutdown_signal() => {}
            }
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_store(settings: &StoreSettings) -> anyhow::Result<Arc<dyn BucketStore>> {
    match settings.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let mut store = swirl::store::RedisStore::connect(&settings.redis_url).await?;
            if let Some(prefix) = &settings.key_prefix {
                store = store.with_key_prefix(prefix.clone());
            }
            store.ping().await?;
            info!("Using Redis store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => anyhow::bail!("swirl was built without the `redis` feature"),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_increment() {
        let cli = Cli::try_parse_from(["swirl", "increment", "user:1", "-a", "3", "-r", "5"]).unwrap();
        match cli.command {
            Command::Increment {
                key,
                amount,
                repeat,
                interval_ms,
            } => {
                assert_eq!(key, "user:1");
                assert_eq!(amount, 3);
                assert_eq!(repeat, 5);
                assert_eq!(interval_ms, 0);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["swirl", "config", "--config", "swirl.yaml", "--json-logs"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("swirl.yaml")));
        assert!(cli.json_logs);
    }

    #[tokio::test]
    async fn test_memory_store_selected_by_default() {
        let store = build_store(&StoreSettings::default()).await.unwrap();
        assert_eq!(store.increment_field("k", "1", 2).await.unwrap(), 2);
    }
}
