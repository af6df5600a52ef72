//! Hub REST API
//!
//! Thin axum handlers over the event producer, the event log, the rule
//! registry and the consequence lifecycle.

mod consequences;
mod events;
mod rules;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use hub_automation::{ConsequenceLifecycle, LifecycleError};
use hub_config::HubConfig;
use hub_event_queue::EventProducer;
use hub_recorder::SharedEventStore;
use hub_registries::RuleRegistry;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HubConfig>,
    /// Ingestion path onto the event queue
    pub producer: EventProducer,
    /// Events the reactor has consumed
    pub events: SharedEventStore,
    pub rules: Arc<RuleRegistry>,
    pub consequences: ConsequenceLifecycle,
}

/// API status response
#[derive(Serialize)]
struct ApiStatus {
    message: &'static str,
    name: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

/// Handler error: status code plus `{ "message": ... }` body
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
        }),
    )
}

impl From<LifecycleError> for ErrorResponse {
    fn from(err: LifecycleError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// Map a lifecycle error to its HTTP status
pub(crate) fn lifecycle_error(err: LifecycleError) -> ApiError {
    let status = match &err {
        LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::InvalidTransition(_) => StatusCode::CONFLICT,
        LifecycleError::Persistence(e) => {
            error!(error = %e, "Consequence storage failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(err.into()))
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/", get(api_status))
        .route("/api/health", get(health_check))
        // Ingestion and event log
        .route(
            "/api/events",
            get(events::list_events).post(events::post_event),
        )
        .route("/api/events/:event_id", get(events::get_event))
        // Rule administration
        .route("/api/rules", get(rules::list_rules).post(rules::create_rule))
        .route(
            "/api/rules/:rule_id",
            get(rules::get_rule).delete(rules::delete_rule),
        )
        // Consequences
        .route("/api/consequences", get(consequences::list_consequences))
        .route(
            "/api/consequences/:consequence_id",
            get(consequences::get_consequence),
        )
        .route(
            "/api/consequences/:consequence_id/execute",
            put(consequences::execute_consequence),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server, returning when `shutdown` resolves
pub async fn start_server(
    state: AppState,
    addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// GET /api/ - Returns API status
async fn api_status(State(state): State<AppState>) -> Json<ApiStatus> {
    Json(ApiStatus {
        message: "API running.",
        name: state.config.hub.name.clone(),
    })
}

/// GET /api/health - Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
