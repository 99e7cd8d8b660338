pub mod cities;
pub mod trips;
pub mod users;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(trips::router())
        .merge(users::router())
        .merge(cities::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
