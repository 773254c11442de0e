//! Cadence Billing API server

use std::net::SocketAddr;

use axum::extract::connect_info::IntoMakeServiceWithConnectInfo;
use axum::Router;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use billing_api::{build_router, AppState, Config};
use cadence_billing_core::BillingService;
use cadence_db::{create_pool, Stores, MIGRATOR};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let fmt_layer = if config.json_logs {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("billing_api=debug".parse()?)
                .add_directive("cadence_billing_core=debug".parse()?),
        )
        .with(fmt_layer)
        .init();

    tracing::info!(http_port = config.http_port, "Starting Cadence Billing API");

    // Initialize metrics
    let metrics_handle = if config.metrics_enabled {
        Some(setup_metrics()?)
    } else {
        None
    };

    // Storage
    let (stores, pool) = match config.database_url.as_deref() {
        Some(url) => {
            let pool = create_pool(url).await?;
            MIGRATOR.run(&pool).await?;
            tracing::info!("Database migrations applied");
            (Stores::postgres(pool.clone()), Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; state is kept in memory and lost on restart");
            (Stores::in_memory(), None)
        }
    };

    let billing = BillingService::new(stores, config.billing.clone())?;
    let state = AppState::new(billing, pool, config.clone());

    let sweeper = tokio::spawn(run_cancellation_sweep(state.clone()));

    let app = build_router(state, metrics_handle);
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));

    if let Err(e) = run_http_server(app, http_addr).await {
        tracing::error!(error = ?e, "HTTP server error");
    }

    sweeper.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_http_server(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("HTTP server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let service: IntoMakeServiceWithConnectInfo<Router, SocketAddr> =
        app.into_make_service_with_connect_info();

    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Periodically finalize deferred cancellations whose date has passed.
///
/// Reads apply the same rule lazily, so a missed tick only delays the
/// stored status.
async fn run_cancellation_sweep(state: AppState) {
    let mut ticker = tokio::time::interval(state.sweep_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match state.billing.sweep_due_cancellations().await {
            Ok(finalized) if !finalized.is_empty() => {
                tracing::info!(count = finalized.len(), "Finalized due cancellations");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = ?e, "Cancellation sweep failed"),
        }
    }
}

fn setup_metrics() -> anyhow::Result<PrometheusHandle> {
    // Most ops complete well under 100ms; platform calls dominate the tail
    let billing_latency_buckets = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.2, 0.5, 1.0, 2.5, 10.0];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("billing_operation_duration_seconds".to_string()),
            billing_latency_buckets,
        )?
        .install_recorder()?;

    metrics::describe_counter!(
        "billing_subscriptions_created_total",
        "Total subscriptions opened by platform"
    );
    metrics::describe_counter!(
        "billing_subscriptions_canceled_total",
        "Total user-initiated cancellations by mode"
    );
    metrics::describe_counter!(
        "billing_subscription_superseded_total",
        "Total subscriptions superseded by a newer entitlement"
    );
    metrics::describe_counter!(
        "billing_platform_cancel_failures_total",
        "Total platform-side cancellations that failed after the local cancel"
    );
    metrics::describe_counter!(
        "billing_webhooks_processed_total",
        "Total platform notifications by platform and outcome"
    );
    metrics::describe_counter!(
        "billing_usage_recorded_total",
        "Total usage increments by counter"
    );
    metrics::describe_histogram!(
        "billing_operation_duration_seconds",
        "Billing operation latency in seconds by operation type"
    );

    Ok(handle)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
