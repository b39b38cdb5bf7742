use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use loyalty_api::app::{self, services::AppServices};
use loyalty_auth::Hs256Jwt;
use loyalty_infra::accrual::HttpAccrualClient;
use loyalty_infra::config::Config;
use loyalty_infra::jobs::{self, AccrualProcessor, OrderQueue, QueueConfig, Shutdown};
use loyalty_infra::storage::Stores;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.validate()?;
    loyalty_observability::init(&config.log_level);

    let stores = Stores::connect(config.database_uri.as_deref())
        .await
        .context("failed to open storage")?;

    let shutdown = Shutdown::new();
    let client = HttpAccrualClient::new(&config.accrual_system_address, config.job_timeout())
        .context("failed to build accrual client")?;
    let processor = Arc::new(AccrualProcessor::new(stores.orders.clone(), Arc::new(client)));

    let queue = OrderQueue::arc(QueueConfig::from(&config));
    let workers = queue.spawn_workers(config.workers, processor, shutdown.signal());

    {
        let orders = stores.orders.clone();
        let queue = queue.clone();
        let signal = shutdown.signal();
        tokio::spawn(async move {
            if let Err(e) = jobs::requeue_unfinished(orders.as_ref(), &queue, &signal).await {
                tracing::error!(error = %e, "failed to load unfinished orders");
            }
        });
    }

    let jwt = Hs256Jwt::new(config.jwt_secret_key.as_bytes());
    let services = Arc::new(AppServices::new(stores, queue.clone(), jwt, shutdown.signal()));
    let router = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.run_address.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.run_address))?;
    tracing::info!(address = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_requested())
        .await
        .context("http server failed")?;

    tracing::info!("http server stopped; draining workers");
    shutdown.trigger();
    workers.join(config.shutdown_timeout()).await;
    queue.stop();

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_requested() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
    tracing::info!("shutdown requested");
}
