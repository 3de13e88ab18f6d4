use anyhow::Result;
use clap::Parser;
use metron_agent::config::{AgentConfig, Args};
use metron_agent::shipper::Shipper;
use metron_collector::runtime::{RuntimeSampler, TrackingAllocator};
use metron_collector::schedule::{run_sampler, SharedSnapshot};
use metron_collector::system::SystemSampler;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("metron=info".parse()?))
        .init();

    let args = Args::parse();
    let config = AgentConfig::load(&args, |name| std::env::var(name).ok())?;
    tracing::info!(
        server = %config.address,
        report_interval = config.report_interval,
        poll_interval = config.poll_interval,
        rate_limit = config.rate_limit,
        send_size = config.send_size,
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        "metron-agent starting"
    );

    let shipper = Shipper::new(&config)?;
    let snapshot = SharedSnapshot::default();
    let cancel = CancellationToken::new();
    let poll = Duration::from_secs(config.poll_interval);
    let report = Duration::from_secs(config.report_interval);

    let mut tasks = JoinSet::new();
    tasks.spawn(run_sampler(
        Box::new(RuntimeSampler::new()),
        snapshot.clone(),
        poll,
        cancel.clone(),
    ));
    tasks.spawn(run_sampler(
        Box::new(SystemSampler::new()),
        snapshot.clone(),
        poll,
        cancel.clone(),
    ));
    {
        let cancel = cancel.clone();
        tasks.spawn(async move { shipper.run(snapshot, report, cancel).await });
    }

    shutdown_signal().await;
    tracing::info!("Shutting down gracefully");
    cancel.cancel();

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Agent task failed");
        }
    }
    tracing::info!("metron-agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
