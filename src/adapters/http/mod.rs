//! REST API (axum). All routes live under `/api`.
//!
//! `/api/status` is public. Everything else requires an API token, and token management
//! additionally requires the admin role. Middleware order (outermost first): CORS, request
//! tracing, token validation, admin check.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use state::{AppState, CoreSettings};

use axum::Router;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{delete, get, post};
use routes::{archives, events, groups, monitoring, operations, system, tokens, users};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let admin = Router::new()
        .route("/tokens", post(tokens::create_token))
        .route("/tokens/:username", delete(tokens::revoke_token))
        .route_layer(middleware::from_fn(auth::require_admin));

    let protected = Router::new()
        .route("/users", get(users::list_users).post(users::add_user))
        .route("/users/:nickname", delete(users::delete_user))
        .route("/users/authenticate", post(users::start_authentication))
        .route("/users/authenticate/:auth_id/code", post(users::submit_code))
        .route(
            "/users/authenticate/:auth_id/status",
            get(users::authentication_status),
        )
        .route("/groups", get(groups::list_groups))
        .route("/groups/:group_id/link", get(groups::group_link))
        .route(
            "/archives",
            get(archives::list_archives).post(archives::start_archive),
        )
        .route(
            "/monitoring",
            get(monitoring::list_monitoring).post(monitoring::start_monitoring),
        )
        .route("/monitoring/:instance_id", delete(monitoring::stop_monitoring))
        .route("/operations", get(operations::list_operations))
        .route("/operations/:id", get(operations::get_operation))
        .route("/events", get(events::event_stream))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_token,
        ));

    let api = Router::new()
        .route("/status", get(system::status))
        .merge(protected);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(cors_origins))
        .with_state(state)
}

/// `*` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Serve the API on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    cors_origins: &[String],
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = listener.local_addr()?;
    let app = create_router(state, cors_origins);
    info!(address = %addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("API server stopped");
    Ok(())
}

#[cfg(test)]
mod tests;
