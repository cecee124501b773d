use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::Utc;
use tokio::signal;
use tracing::{error, info, warn};

use storefront_billing as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);
    api::handlers::health::init_start_time();

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    if cfg.payment.webhook_secret().is_none() {
        warn!("No payment webhook secret configured; webhook signatures will not be verified");
    }
    let provider: Arc<dyn api::services::payments::PaymentProvider> = Arc::new(
        api::services::payments::StripeProvider::new(&cfg.payment)
            .context("failed to build payment provider client")?,
    );

    let app_state = Arc::new(api::AppState::new(db_arc.clone(), cfg.clone(), provider));

    if cfg.stale_order_sweep_interval_secs > 0 {
        tokio::spawn(sweep_stale_orders(
            app_state.clone(),
            Duration::from_secs(cfg.stale_order_sweep_interval_secs),
        ));
    } else {
        info!("Stale order sweep disabled");
    }

    let app = api::build_router(app_state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("storefront-billing listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shut down");
    Ok(())
}

/// Periodically cancels pending orders older than the configured TTL
async fn sweep_stale_orders(state: Arc<api::AppState>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let cutoff = Utc::now() - state.config.stale_order_ttl();
        match state.services.orders.cancel_stale_pending(cutoff).await {
            Ok(0) => {}
            Ok(cancelled) => info!(cancelled, "stale order sweep finished"),
            Err(e) => error!(error = %e, "stale order sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
