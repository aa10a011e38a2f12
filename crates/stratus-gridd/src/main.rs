mod config;
mod local;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use stratus_api::{GridApiAdapter, HttpApi};
use stratus_core::{
    ClientFactory, CommandHost, EventBus, GridSearch, Registry, Subscribe, Task, TaskContext,
};
use stratus_exec::local::LocalInvoker;
use stratus_messenger::Messenger;
use stratus_model::TaskId;
use stratus_observe::{Journal, logger_init};
use stratus_prometheus::PrometheusMetrics;

use crate::{
    config::GriddConfig,
    local::{LocalConnector, LocalCoordinator, LocalHost},
};

const DEFAULT_CONFIG: &str = "stratus.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Config + logger
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = GriddConfig::load(&path)?;
    logger_init(&cfg.logger)?;
    info!(config = %path, "logger initialized");

    // 2) Event subscribers
    let metrics = PrometheusMetrics::new().context("registering metrics")?;
    let subscribers: Vec<Arc<dyn Subscribe>> =
        vec![Arc::new(Journal::new()), Arc::new(metrics.clone())];
    let events = EventBus::new(subscribers);

    // 3) Local execution backend
    let invoker = Arc::new(
        LocalInvoker::new(cfg.worker_proc(), cfg.worker.max_running)
            .with_nonce_window(cfg.worker.nonce_window),
    );
    let clients = Arc::new(ClientFactory::new(Arc::new(LocalConnector::new(
        Arc::clone(&invoker),
    ))));
    let ctx = TaskContext::new(Arc::new(Messenger::new(cfg.messenger_config())), Arc::clone(&clients))
        .with_events(events.clone())
        .with_settings(cfg.task_settings());

    // 4) Experiments, one local coordinator each
    let host = Arc::new(LocalHost::new("localhost"));
    let specs = cfg.grid.expand();
    let mut tasks = Vec::with_capacity(specs.len());
    for (i, spec) in specs.into_iter().enumerate() {
        let id = TaskId(u32::try_from(i)?);
        let port = cfg.coordinator.base_port + u16::try_from(i)?;
        let coordinator = Arc::new(LocalCoordinator::new(
            cfg.coordinator.ip,
            port,
            cfg.coordinator_proc(),
            Arc::clone(&host),
        ));
        let name = spec.name.clone();
        tasks.push(
            Task::new(id, spec, coordinator, ctx.clone())
                .with_context(|| format!("experiment {name}"))?,
        );
    }
    info!(experiments = tasks.len(), "grid expanded");

    let registry = Registry::new();
    let grid = Arc::new(
        GridSearch::new(tasks, clients, cfg.grid_config())
            .with_hosts(vec![host as Arc<dyn CommandHost>])
            .with_events(events)
            .with_registry(registry.clone()),
    );

    // 5) HTTP API + /metrics
    let router = HttpApi::new(Arc::new(GridApiAdapter::new(Arc::clone(&grid))))
        .router()
        .merge(metrics_router(metrics));
    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("binding {}", cfg.listen))?;
    info!(listen = %cfg.listen, "http api listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "http server stopped");
        }
    });

    // 6) Start the search; Ctrl+C during startup still stops everything
    let mut startup = tokio::spawn({
        let grid = Arc::clone(&grid);
        async move { grid.run().await }
    });
    let interrupted = tokio::select! {
        joined = &mut startup => {
            joined
                .context("grid startup aborted")?
                .context("starting grid search")?;
            false
        }
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for Ctrl+C")?;
            true
        }
    };

    // 7) Run until every experiment is dead or Ctrl+C
    if interrupted {
        info!("interrupted during startup, shutting down...");
        // Halts a startup that has not registered the search yet.
        if let Err(e) = grid.kill_all().await {
            warn!(error = %e, "grid search did not stop cleanly");
        }
        match startup.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "grid startup failed"),
            Err(e) => warn!(error = %e, "grid startup aborted"),
        }
    } else {
        info!("press Ctrl+C to stop");
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("waiting for Ctrl+C")?;
                info!("shutting down...");
            }
            _ = all_dead(&grid) => info!("every experiment finished"),
        }
    }

    let stopped = registry.stop_everything().await;
    invoker.shutdown();
    info!(stopped, total_cost = grid.total_cost(), "stratus-gridd exiting");
    Ok(())
}

async fn all_dead(grid: &GridSearch) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        if grid.tasks().iter().all(|t| t.is_dead()) {
            return;
        }
    }
}

fn metrics_router(metrics: PrometheusMetrics) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .with_state(metrics)
}

async fn serve_metrics(State(metrics): State<PrometheusMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", metrics.content_type())],
            text,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "encoding metrics failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}
