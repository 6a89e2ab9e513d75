use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use push_delivery_service::config::Settings;
use push_delivery_service::dispatch::DispatchStrategy;
use push_delivery_service::retry::RetrySweeper;
use push_delivery_service::server::{create_app, AppState};
use push_delivery_service::shutdown::{wait_for_signal, GracefulShutdown};
use push_delivery_service::telemetry::init_telemetry;
use push_delivery_service::worker::spawn_workers;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing (keep guard alive for the whole process)
    let _telemetry_guard = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    let state = AppState::new(settings.clone()).await?;
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut shutdown = GracefulShutdown::new(shutdown_tx.clone());

    // Delivery workers only matter when events go through the commit log
    if state.sender.strategy() == DispatchStrategy::Queued {
        let handles = spawn_workers(
            state.commit_log.as_ref(),
            state.worker_context(),
            &settings.worker,
            &shutdown_tx,
        )
        .await?;
        for (index, handle) in handles.into_iter().enumerate() {
            shutdown.register(format!("worker-{}", index), handle);
        }
    } else {
        tracing::info!("Direct dispatch active, delivery workers not started");
    }

    let sweeper = RetrySweeper::new(
        state.retry_store.clone(),
        state.gateway.clone(),
        state.escalator.clone(),
        settings.retry.clone(),
        shutdown_tx.subscribe(),
    );
    tracing::info!(claimer = %sweeper.claimer(), "Starting retry sweeper");
    shutdown.register("retry-sweeper", tokio::spawn(sweeper.run()));

    let postgres_pool = state.postgres_pool.clone();
    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Ops server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    shutdown.execute("signal received").await;

    if let Some(pool) = postgres_pool {
        pool.close().await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}
