use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use callgate::config::GateConfig;
use callgate::error::PerformError;
use callgate::ratelimit::{action_fn, RateLimiter, RuleSet, SystemClock};

/// Issue a burst of concurrent calls through a multi-rule rate limiter.
#[derive(Debug, Parser)]
#[command(name = "callgate", version, about)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// Rule file (YAML); overrides `rules_path` from the configuration
    #[arg(short, long)]
    rules: Option<String>,

    /// Number of concurrent calls
    #[arg(short = 'n', long)]
    requests: Option<usize>,

    /// Simulated call latency in milliseconds
    #[arg(long)]
    latency_ms: Option<u64>,

    /// Log filter directive, e.g. `debug` or `callgate=trace`
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = GateConfig::load(cli.config.as_deref())?;
    if let Some(rules) = cli.rules {
        config.rules_path = Some(rules);
    }
    if let Some(requests) = cli.requests {
        config.demo.requests = requests;
    }
    if let Some(latency) = cli.latency_ms {
        config.demo.action_latency_ms = latency;
    }
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    config.log.json |= cli.json;

    init_tracing(&config);

    info!("Starting Callgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let rule_set = match &config.rules_path {
        Some(path) => RuleSet::from_file(path)?,
        None => RuleSet::default(),
    };
    for rule in &rule_set.rules {
        info!(
            max_calls = rule.max_calls,
            window_ms = rule.window_ms,
            name = rule.name.as_deref().unwrap_or("unnamed"),
            "Rule loaded"
        );
    }

    let latency = Duration::from_millis(config.demo.action_latency_ms);
    let action = action_fn(move |request_id: usize| async move {
        info!(
            "Running call to {} at {}",
            request_id,
            chrono::Local::now().format("%H:%M:%S%.3f")
        );
        tokio::time::sleep(latency).await;
        Ok::<(), std::convert::Infallible>(())
    });

    let clock = SystemClock::new();
    let limiter = Arc::new(
        RateLimiter::builder()
            .action(action)
            .rules(rule_set.trackers(clock))
            .clock(clock)
            .build()?,
    );
    info!(rules = limiter.rules().len(), "Rate limiter initialized");

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = cancel_tx.send(true);
    });

    let calls = (0..config.demo.requests).map(|request_id| {
        let limiter = Arc::clone(&limiter);
        let mut cancel_rx = cancel_rx.clone();
        tokio::spawn(async move {
            let cancelled = async move {
                while !*cancel_rx.borrow_and_update() {
                    if cancel_rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            };
            limiter.perform_with_cancel(request_id, cancelled).await
        })
    });

    let mut completed = 0usize;
    let mut cancelled = 0usize;
    for outcome in futures::future::join_all(calls).await {
        match outcome? {
            Ok(()) => completed += 1,
            Err(PerformError::Cancelled) => cancelled += 1,
            Err(e) => warn!(error = %e, "Call failed"),
        }
    }

    info!(completed, cancelled, "All calls finished");
    Ok(())
}

fn init_tracing(config: &GateConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if config.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
            info!("Received Ctrl+C, cancelling waiting calls");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling waiting calls");
        }
    }
}
