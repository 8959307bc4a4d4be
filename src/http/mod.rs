//! HTTP surface. Handlers are thin: extract the principal, call the service,
//! let `Error` pick the status code.

mod notifications;
mod trips;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::notifications::NotificationStore;
use crate::stream::StreamGateway;
use crate::trips::TripLifecycleManager;

#[derive(Clone)]
pub struct AppState {
    pub trips: Arc<TripLifecycleManager>,
    pub notifications: Arc<NotificationStore>,
    pub gateway: Arc<StreamGateway>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(trips::routes())
        .merge(notifications::routes())
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}
