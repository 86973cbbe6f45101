pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{Method, header::{AUTHORIZATION, CONTENT_TYPE}},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::history;
use parley_api::middleware::require_auth;
use parley_db::Database;
use parley_gateway::connection;
use parley_gateway::{Hub, IngestHandler};

use crate::config::{Config, CorsOrigin};

#[derive(Clone)]
struct GatewayState {
    ingest: IngestHandler,
}

/// Assemble the HTTP API and the WebSocket gateway around one database
/// and one hub.
pub fn build_router(config: &Config, db: Arc<Database>, hub: Hub) -> Router {
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: config.jwt_secret.clone(),
    });
    let gateway_state = GatewayState {
        ingest: IngestHandler::new(db, hub, config.sender_policy),
    };

    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/api/messages", get(history::get_history))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway_state);

    let mut app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route);

    if let Some(dir) = &config.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(cors_layer(&config.cors_origin))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origin: &CorsOrigin) -> CorsLayer {
    match origin {
        CorsOrigin::Any => CorsLayer::permissive(),
        CorsOrigin::Exact(origin) => CorsLayer::new()
            .allow_origin(origin.clone())
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE]),
    }
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.ingest))
}
