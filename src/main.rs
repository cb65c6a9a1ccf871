use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use quotapool::config::LimiterOptions;
use quotapool::{ErrData, FuncPool, LimiterRegistry, QuotaPoolConfig, TaskContext};

/// Run a batch of jobs through a rate-limited worker pool.
#[derive(Parser, Debug)]
#[command(name = "quotapool", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Redis URL; overrides the configuration file
    #[arg(long)]
    redis_url: Option<String>,

    /// Limiter key to run the jobs under
    #[arg(long, default_value = "demo")]
    key: String,

    /// Jobs allowed per period when the key is not configured
    #[arg(long, default_value_t = 1)]
    limit: u64,

    /// Period in milliseconds when the key is not configured
    #[arg(long, default_value_t = 1000)]
    period_ms: u64,

    /// Concurrent workers; overrides the configuration file
    #[arg(long)]
    workers: Option<usize>,

    /// Number of jobs to submit
    #[arg(long, default_value_t = 3)]
    tasks: usize,

    /// Give up on jobs not admitted within this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let cli = Cli::parse();
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => QuotaPoolConfig::from_file(path)?,
        None => QuotaPoolConfig::default(),
    };
    if cli.redis_url.is_some() {
        config.store.redis_url = cli.redis_url.clone();
    }

    let store = config.connect_store().await?;
    let registry = LimiterRegistry::global();
    config.register_all(registry, store.clone())?;
    if !registry.contains(&cli.key) {
        registry.register(
            cli.key.clone(),
            LimiterOptions::new()
                .with_store(store)
                .with_limit(cli.limit)
                .with_period(Duration::from_millis(cli.period_ms)),
        )?;
    }

    let succeeded = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let done = succeeded.clone();
    let errors = failed.clone();
    let pool = FuncPool::with_options(
        registry,
        &cli.key,
        cli.workers.unwrap_or(config.pool.workers),
        config.pool.worker_options(),
        move |job: String| {
            let done = done.clone();
            async move {
                info!(job = %job, "done");
                done.fetch_add(1, Ordering::SeqCst);
            }
        },
        move |data: ErrData<String>| {
            warn!(job = %data.arg, error = %data.err, "job failed");
            errors.fetch_add(1, Ordering::SeqCst);
        },
    )?;

    let ctx = match cli.timeout_ms {
        Some(ms) => TaskContext::with_timeout(Duration::from_millis(ms)),
        None => TaskContext::background(),
    };
    let canceller = ctx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        canceller.cancel();
    });

    let start = Instant::now();
    for i in 1..=cli.tasks {
        pool.invoke(ctx.clone(), format!("job{}", i)).await?;
    }
    pool.wait().await;
    pool.release();

    info!(
        succeeded = succeeded.load(Ordering::SeqCst),
        failed = failed.load(Ordering::SeqCst),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "All jobs resolved"
    );
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling pending jobs");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling pending jobs");
        }
    }
}
