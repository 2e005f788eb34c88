use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use snafu::ResultExt as _;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::instrument;

mod error;
mod state;

pub use error::*;
pub use state::App;

use crate::refresh::{RefreshSummary, Refreshed};

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

pub fn create_router(app: App) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/refresh-stats", post(refresh_stats))
        .route("/check-video", post(check_video))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app)
}

async fn liveness(State(app): State<App>) -> String {
    app.liveness()
}

#[derive(Debug, Serialize)]
struct Success<T> {
    status: &'static str,
    #[serde(flatten)]
    body: T,
}

impl<T> From<T> for Success<T> {
    fn from(body: T) -> Self {
        Success {
            status: "success",
            body,
        }
    }
}

#[instrument(skip(app))]
async fn refresh_stats(State(app): State<App>) -> Result<Json<Success<RefreshSummary>>> {
    let summary = app.refresh_all().await?;
    Ok(Json(summary.into()))
}

/// Both fields are optional here so a missing one is reported as a client error
/// rather than a body rejection.
#[derive(Debug, Default, Deserialize)]
pub struct CheckVideo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[instrument(skip(app, payload))]
async fn check_video(
    State(app): State<App>,
    payload: Result<Json<CheckVideo>, JsonRejection>,
) -> Result<Json<Success<Refreshed>>> {
    let Json(request) = payload.context(InvalidBodySnafu)?;

    let id = request.id.as_deref().unwrap_or_default();
    let url = request.url.as_deref().unwrap_or_default();

    let refreshed = app.refresh_one(id, url).await?;
    Ok(Json(refreshed.into()))
}
