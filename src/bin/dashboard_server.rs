use std::{net::SocketAddr, sync::Arc};

use jobdash::{
    api_config_from_env, dashboard_router, init_logging, lifecycle_config_from_env, log_app_bind,
    log_app_start, log_app_stop, log_source_selected, logging_config_from_env, DashboardHandle,
    DashboardSource, DataOrchestrator, FetchError, InMemoryMockFetcher, LifecycleConfig,
    ReqwestAnalyticsFetcher,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let addr: SocketAddr = std::env::var("JOBDASH_DASHBOARD_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;

    let source = source_from_env(lifecycle_config_from_env())?;
    let app = dashboard_router(Arc::clone(&source));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    source.shutdown();
    log_app_stop("signal");

    Ok(())
}

fn source_from_env(lifecycle: LifecycleConfig) -> Result<Arc<dyn DashboardSource>, FetchError> {
    let use_demo = std::env::var("JOBDASH_USE_DEMO")
        .map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if use_demo {
        log_source_selected("demo", None, lifecycle.gated_tick_ms);
        let orchestrator = Arc::new(DataOrchestrator::new(InMemoryMockFetcher::demo()));
        return Ok(Arc::new(DashboardHandle::mount(orchestrator, lifecycle)));
    }

    let api_cfg = api_config_from_env();
    log_source_selected(
        "analytics_api",
        Some(&api_cfg.base_url),
        lifecycle.gated_tick_ms,
    );
    let fetcher = ReqwestAnalyticsFetcher::new(api_cfg)?;
    let orchestrator = Arc::new(DataOrchestrator::new(fetcher));
    Ok(Arc::new(DashboardHandle::mount(orchestrator, lifecycle)))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(
            component = "dashboard_server",
            event = "app.signal_error",
            error = %err
        );
    }
}
