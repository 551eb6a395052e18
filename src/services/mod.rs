//! Business logic services

pub mod auth;
pub mod books;
pub mod loans;
pub mod rate_limit;
pub mod redis;
pub mod reservations;

use std::sync::Arc;

use crate::{config::AppConfig, queue::ReservationQueue, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub auth: auth::AuthService,
    pub books: books::BooksService,
    pub loans: loans::LoansService,
    pub reservations: reservations::ReservationIntake,
    pub redis: redis::RedisService,
}

impl Services {
    /// Wire services over shared infrastructure. The limiter and queue are
    /// passed in so that callers choose their backing store.
    pub fn new(
        repository: Repository,
        config: &AppConfig,
        redis: redis::RedisService,
        limiter: Arc<dyn rate_limit::RateLimiter>,
        queue: Arc<dyn ReservationQueue>,
    ) -> Self {
        Self {
            auth: auth::AuthService::new(repository.clone(), config.auth.clone(), limiter, &config.rate_limit),
            books: books::BooksService::new(repository.clone()),
            loans: loans::LoansService::new(repository, config.loans.clone()),
            reservations: reservations::ReservationIntake::new(queue),
            redis,
        }
    }
}
