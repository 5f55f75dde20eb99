use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::tag_routes())
        .merge(handlers::ingredient_routes())
        .merge(handlers::recipe_routes())
}
