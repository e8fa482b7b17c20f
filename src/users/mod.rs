pub mod account;
pub mod dto;
pub mod handlers;
pub mod memory;
mod nickname;
pub mod repo;
pub mod repo_types;
pub mod search;
pub mod services;
pub mod validation;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::staff_routes()
}
