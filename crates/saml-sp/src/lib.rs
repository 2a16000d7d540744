pub mod attributes;
pub mod binding;
pub mod config;
pub mod crypto;
pub mod error;
pub mod request_tracker;
pub mod schema;
pub mod security;
pub mod service_provider;
pub mod sp;
pub mod state;

use axum::Router;
use state::AppState;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/saml", sp::router(state.clone()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
