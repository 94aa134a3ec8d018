use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::{LoggingConfig, TurnstileConfig};
use turnstile::ratelimit::{IdleReaper, RateLimiter};

#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about = "Sliding-window rate limiting engine")]
struct Cli {
    /// Path to the Turnstile configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Path to a rules file, overriding the configured one
    #[arg(short, long, global = true)]
    rules: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate admissions for a key and print its final status
    Check {
        /// Fully-qualified key, e.g. user:login:alice@example.com
        key: String,
        /// Number of admission attempts
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective rule table
    Limits,
    /// Read keys from stdin, one per line, and print a decision for each
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TurnstileConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => TurnstileConfig::default(),
    };
    if let Some(rules) = &cli.rules {
        config.rate_limiting.rules_path = Some(rules.clone());
    }

    init_tracing(&config.logging);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let limiter = config
        .build_limiter()
        .context("failed to build rate limiter")?;
    info!(rules = limiter.limits()?.len(), "Rate limiter initialized");

    match cli.command {
        Command::Check { key, count, json } => check(&limiter, &key, count, json)?,
        Command::Limits => print_limits(&limiter)?,
        Command::Run => run(Arc::new(limiter), &config).await?,
    }

    Ok(())
}

/// Initialize tracing. Logs go to stderr; stdout carries decisions.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn check(limiter: &RateLimiter, key: &str, count: u32, json: bool) -> anyhow::Result<()> {
    let pattern = limiter.resolve_pattern(key);
    for attempt in 1..=count {
        let allowed = limiter.allow(key)?;
        println!("{:>4} {} {}", attempt, decision(allowed), key);
    }

    let status = limiter.status(key)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else if status.is_unbounded() {
        println!("pattern={} limit=unbounded", pattern);
    } else {
        println!(
            "pattern={} limit={} remaining={} window={} retry_after={} reset_time={}",
            pattern,
            status.limit,
            status.remaining,
            humantime::format_duration(status.window),
            humantime::format_duration(status.retry_after),
            status.reset_time.to_rfc3339(),
        );
    }
    Ok(())
}

fn print_limits(limiter: &RateLimiter) -> anyhow::Result<()> {
    for (pattern, config) in limiter.limits()? {
        println!(
            "{:<28} {:>6} per {}",
            pattern,
            config.limit,
            humantime::format_duration(config.window)
        );
    }
    Ok(())
}

async fn run(limiter: Arc<RateLimiter>, config: &TurnstileConfig) -> anyhow::Result<()> {
    let reaper_config = &config.rate_limiting.reaper;
    let reaper = reaper_config.enabled.then(|| {
        IdleReaper::spawn(
            Arc::clone(&limiter),
            reaper_config.interval(),
            reaper_config.max_idle(),
        )
    });

    let reload = match (
        &config.rate_limiting.rules_path,
        config.rate_limiting.rules_reload_interval_secs,
    ) {
        (Some(path), secs) if secs > 0 => Some(spawn_rules_reload(
            Arc::clone(&limiter),
            path.clone(),
            Duration::from_secs(secs),
        )),
        _ => None,
    };

    info!("Reading keys from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Failed to read from stdin");
                        break;
                    }
                };
                let key = line.trim();
                if key.is_empty() {
                    continue;
                }
                if let Err(e) = answer(&limiter, key) {
                    warn!(key = %key, error = %e, "Rate limit check failed");
                }
            }
            _ = &mut shutdown => break,
        }
    }

    if let Some(reload) = reload {
        reload.abort();
    }
    if let Some(reaper) = reaper {
        reaper.shutdown().await;
    }

    info!(counters = limiter.counter_count(), "Turnstile stopped");
    Ok(())
}

/// Print the decision for one key read from stdin.
fn answer(limiter: &RateLimiter, key: &str) -> turnstile::error::Result<()> {
    if limiter.allow(key)? {
        println!("{} {}", decision(true), key);
    } else {
        let status = limiter.status(key)?;
        println!(
            "{} {} retry_after={}",
            decision(false),
            key,
            humantime::format_duration(status.retry_after)
        );
    }
    Ok(())
}

/// Periodically re-read the rules file and apply it to the limiter.
fn spawn_rules_reload(limiter: Arc<RateLimiter>, path: String, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match limiter.reload_from_file(&path) {
                Ok(rules) => info!(path = %path, rules, "Rate limit rules reloaded"),
                Err(e) => warn!(path = %path, error = %e, "Keeping previous rate limit rules"),
            }
        }
    })
}

fn decision(allowed: bool) -> &'static str {
    if allowed {
        "ALLOW"
    } else {
        "DENY "
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
