use anyhow::{Context, Result};
use clap::Parser;
use metron_server::app::build_http_app;
use metron_server::config::{Args, ServerConfig, SHUTDOWN_TIMEOUT};
use metron_server::shutdown::ShutdownPlan;
use metron_server::state::AppState;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("metron=info".parse()?))
        .init();

    let args = Args::parse();
    let config = ServerConfig::load(&args, |name| std::env::var(name).ok())?;
    tracing::info!(
        address = %config.address,
        store_interval = config.file_store_interval,
        file_storage_path = %config.file_storage_path,
        restore = config.restore,
        database = !config.database_dsn.is_empty(),
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        trusted_subnet = config.trusted_subnet.as_deref().unwrap_or("-"),
        "metron-server starting"
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        });
    }

    let state = AppState::from_config(&config, shutdown.clone()).await?;
    let service = state.service.clone();

    if config.restore && service.storage().is_memory() {
        service
            .restore()
            .await
            .context("failed to restore metrics snapshot")?;
    }

    let snapshot_cancel = CancellationToken::new();
    let snapshot_task = if config.snapshot_path().is_some()
        && !config.store_interval().is_zero()
        && service.storage().is_memory()
    {
        let service = service.clone();
        let every = config.store_interval();
        let cancel = snapshot_cancel.clone();
        Some(tokio::spawn(async move {
            service.run_periodic_save(every, cancel).await
        }))
    } else {
        None
    };

    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");

    let app = build_http_app(state);
    let mut web = {
        let stop = shutdown.clone().cancelled_owned();
        tokio::spawn(async move { axum::serve(listener, app).with_graceful_shutdown(stop).await })
    };

    let early_exit = tokio::select! {
        _ = shutdown.cancelled() => None,
        joined = &mut web => Some(joined),
    };
    shutdown.cancel();
    tracing::info!("Shutting down gracefully");

    let plan = ShutdownPlan::new(SHUTDOWN_TIMEOUT)
        .step("web", async move {
            let joined = match early_exit {
                Some(joined) => joined,
                None => web.await,
            };
            joined
                .context("HTTP server task panicked")?
                .context("HTTP server failed")
        })
        .step("snapshot-task", async move {
            snapshot_cancel.cancel();
            if let Some(task) = snapshot_task {
                task.await.context("snapshot task panicked")?;
            }
            Ok(())
        })
        .step("final-save", {
            let service = service.clone();
            async move { Ok(service.final_save().await?) }
        })
        .step("storage", {
            let service = service.clone();
            async move { Ok(service.close().await?) }
        });

    let report = plan.run().await;
    if !report.success() {
        anyhow::bail!("shutdown did not complete cleanly");
    }
    tracing::info!("metron-server stopped");
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
