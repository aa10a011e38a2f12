use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use stratus_model::TaskSnapshot;
use tracing::info;

use crate::{
    error::ApiError,
    handler::{ApiHandler, CostSummary},
};

/// HTTP API service builder.
pub struct HttpApi<H> {
    handler: Arc<H>,
}

impl<H> HttpApi<H>
where
    H: ApiHandler,
{
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Build axum router with mounted endpoints.
    ///
    /// Routes:
    /// - GET /api/v1/experiments - All experiment snapshots
    /// - GET /api/v1/experiments/{index} - One experiment
    /// - POST /api/v1/experiments/{index}/kill - Stop one experiment
    /// - GET /api/v1/top?n= - Ranked by latest loss
    /// - GET /api/v1/cost - Spend summary
    /// - POST /api/v1/kill-all - Stop the whole grid search
    pub fn router(self) -> Router {
        Router::new()
            .route("/api/v1/experiments", get(experiments::<H>))
            .route("/api/v1/experiments/{index}", get(experiment::<H>))
            .route("/api/v1/experiments/{index}/kill", post(kill::<H>))
            .route("/api/v1/top", get(top::<H>))
            .route("/api/v1/cost", get(cost::<H>))
            .route("/api/v1/kill-all", post(kill_all::<H>))
            .with_state(self.handler)
    }
}

#[derive(Debug, Default, Deserialize)]
struct TopQuery {
    #[serde(default)]
    n: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct KillResponse {
    killed: Vec<usize>,
}

async fn experiments<H: ApiHandler>(
    State(handler): State<Arc<H>>,
) -> Result<Json<Vec<TaskSnapshot>>, ApiError> {
    Ok(Json(handler.experiments().await?))
}

async fn experiment<H: ApiHandler>(
    State(handler): State<Arc<H>>,
    Path(index): Path<usize>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    Ok(Json(handler.experiment(index).await?))
}

async fn kill<H: ApiHandler>(
    State(handler): State<Arc<H>>,
    Path(index): Path<usize>,
) -> Result<Json<KillResponse>, ApiError> {
    info!(index, "kill requested over http");
    handler.kill(index).await?;
    Ok(Json(KillResponse {
        killed: vec![index],
    }))
}

async fn top<H: ApiHandler>(
    State(handler): State<Arc<H>>,
    Query(q): Query<TopQuery>,
) -> Result<Json<Vec<TaskSnapshot>>, ApiError> {
    Ok(Json(handler.top(q.n).await?))
}

async fn cost<H: ApiHandler>(
    State(handler): State<Arc<H>>,
) -> Result<Json<CostSummary>, ApiError> {
    Ok(Json(handler.cost().await?))
}

async fn kill_all<H: ApiHandler>(
    State(handler): State<Arc<H>>,
) -> Result<Json<KillResponse>, ApiError> {
    info!("kill-all requested over http");
    let killed = handler.kill_all().await?;
    Ok(Json(KillResponse { killed }))
}
