pub mod health;
pub mod login;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/api", login::router())
        .with_state(state)
}
