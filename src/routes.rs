// routes.rs
use std::time::Duration;

use axum::{
    routing::{get, post, MethodRouter},
    Router,
};
use http::{header::CONTENT_TYPE, HeaderValue, Method};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::handlers;
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors_allowed_origins.as_deref());

    let api = Router::new()
        .merge(route(
            "/polls",
            get(handlers::list_polls).post(handlers::create_poll),
        ))
        .merge(route(
            "/polls/{id}",
            get(handlers::get_poll)
                .patch(handlers::update_poll)
                .delete(handlers::delete_poll),
        ))
        .merge(route("/polls/{id}/vote", post(handlers::vote)))
        .merge(route("/polls/{id}/results", get(handlers::poll_results)));

    Router::new()
        .route("/", get(handlers::index))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serves `path` both with and without a trailing slash.
fn route(path: &str, handler: MethodRouter<AppState>) -> Router<AppState> {
    Router::new()
        .route(path, handler.clone())
        .route(&format!("{path}/"), handler)
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let allow_origin = match origins {
        Some(origins) => AllowOrigin::list(origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| warn!(origin = %origin, "ignoring malformed CORS origin"))
                .ok()
        })),
        None => AllowOrigin::from(Any),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60))
}
