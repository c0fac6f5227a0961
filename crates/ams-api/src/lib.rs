//! Auto Message Sender HTTP API
//!
//! - Message submission and listing under `/api/v1/messages`
//! - Dispatcher start/stop/status
//! - Health probes
//! - OpenAPI document and Swagger UI

use std::sync::Arc;

use ams_dispatch::DispatchControl;
use ams_store::MessageStore;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error;
pub mod health;
pub mod messages;
pub mod model;
pub mod validation;

pub use error::ApiError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub dispatcher: Arc<dyn DispatchControl>,
    /// Reported by the health endpoints
    pub version: String,
}

impl AppState {
    pub fn new(store: Arc<dyn MessageStore>, dispatcher: Arc<dyn DispatchControl>) -> Self {
        Self {
            store,
            dispatcher,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Auto Message Sender API",
        version = "0.1.0",
        description = "Queue outbound messages and control the background webhook dispatcher"
    ),
    paths(
        messages::create_message,
        messages::list_messages,
        messages::start_sending,
        messages::stop_sending,
        messages::dispatcher_status,
        health::health_handler,
        health::readiness_probe,
        health::liveness_probe,
    ),
    components(schemas(
        model::CreateMessageRequest,
        model::CreateMessageResponse,
        model::MessageItem,
        model::MessageListResponse,
        model::SuccessResponse,
        model::DispatcherStatusResponse,
        model::ErrorResponse,
        health::HealthResponse,
        health::ServiceHealth,
        ams_common::MessageStatus,
    )),
    tags(
        (name = "messages", description = "Message submission and listing"),
        (name = "dispatcher", description = "Background dispatcher control"),
        (name = "health", description = "Health probes")
    )
)]
pub struct ApiDoc;

/// Build the full router with tracing and permissive CORS
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        // Health probes
        .route("/health", get(health::health_handler))
        .route("/health/ready", get(health::readiness_probe))
        .route("/health/live", get(health::liveness_probe))
        // Messages
        .route(
            "/api/v1/messages",
            get(messages::list_messages).post(messages::create_message),
        )
        // Dispatcher control
        .route("/api/v1/messages/start", post(messages::start_sending))
        .route("/api/v1/messages/stop", post(messages::stop_sending))
        .route("/api/v1/messages/dispatcher", get(messages::dispatcher_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
