//! Biblion loan server
//!
//! REST API for reserving, borrowing and returning library books. Stock is
//! kept exact under concurrent reservations by row locks in Postgres;
//! reservations are queued on a Redis stream and applied by a background
//! worker; logins are rate limited by a token bucket shared through Redis.

use std::sync::Arc;

use sqlx::{Pool, Postgres};

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod queue;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
    pub pool: Pool<Postgres>,
}
