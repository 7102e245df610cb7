//! Saga worker entry point.

use std::sync::Arc;

use event_bus::{InMemoryDeadLetterSink, InMemoryEventBus};
use orchestrator::order_fulfillment;
use orchestrator::{InMemoryIdempotencyStore, Orchestrator, Worker};
use saga_store::InMemorySagaStore;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::config::Config;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let config = Config::from_env();

    // 3. Build the step registry. An ambiguous registry must abort here,
    //    before a single message is consumed.
    let registry = Arc::new(
        order_fulfillment::registry(config.step_timeout())
            .expect("invalid step registry configuration"),
    );

    // 4. Wire the collaborators
    let store = InMemorySagaStore::new();
    let bus = InMemoryEventBus::new();
    let dead_letters = InMemoryDeadLetterSink::new();
    let idempotency = InMemoryIdempotencyStore::default();

    let orchestrator = Arc::new(
        Orchestrator::new(
            registry,
            order_fulfillment::codec(),
            store.clone(),
            bus.clone(),
            dead_letters,
            idempotency,
        )
        .with_max_cas_retries(config.max_cas_retries),
    );

    // 5. Start the worker loop and the deadline monitor
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let consumer = Worker::new(orchestrator.clone(), bus.clone());
    let consumer_shutdown = shutdown_rx.clone();
    let consumer_task = tokio::spawn(async move { consumer.run(consumer_shutdown).await });

    let monitor = orchestrator.clone();
    let monitor_shutdown = shutdown_rx.clone();
    let tick = config.deadline_tick();
    let monitor_task =
        tokio::spawn(async move { monitor.run_deadline_monitor(tick, monitor_shutdown).await });

    // 6. Serve the operator API
    let state = Arc::new(worker::AppState { store });
    let app = worker::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting saga worker");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Stop the background tasks
    shutdown_tx.send(true).expect("shutdown channel closed");
    if let Err(err) = consumer_task.await.expect("worker task panicked") {
        tracing::error!(error = %err, "worker loop exited with error");
    }
    monitor_task.await.expect("deadline monitor task panicked");

    tracing::info!("worker shut down gracefully");
}
