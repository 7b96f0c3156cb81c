use crate::controller::health_check_controller;
use crate::ws::handler;
use axum::{routing::get, Router};
use service::AppState;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(ws_routes(app_state))
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn ws_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(handler::ws_handler))
        .route("/ws/:user_type/:user_id", get(handler::subscriber_ws_handler))
        .with_state(app_state)
}
