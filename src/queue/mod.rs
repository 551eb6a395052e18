//! Reservation queue.
//!
//! Intake appends a [`ReservationMessage`] to a durable stream and returns;
//! a single [`worker::ReservationWorker`] per process reads entries one at a
//! time, applies them through a [`ReservationProcessor`] and either
//! acknowledges or dead-letters each entry.
//!
//! Delivery is at-least-once: an entry read but not yet acknowledged when a
//! worker dies is handed out again on restart. Processors must therefore be
//! idempotent per [`IdempotencyKey`].

pub mod memory;
pub mod redis_stream;
pub mod worker;

use async_trait::async_trait;

use crate::{
    error::AppResult,
    models::reservation::{IdempotencyKey, ReservationMessage, ReserveOutcome},
};

pub use memory::InMemoryQueue;
pub use redis_stream::RedisStreamQueue;
pub use worker::ReservationWorker;

/// One entry handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue-assigned id, stable across redeliveries
    pub id: String,
    pub payload: Vec<u8>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReservationQueue: Send + Sync {
    /// Durably append a message. Returns the entry id once the store has
    /// accepted it.
    async fn publish(&self, message: &ReservationMessage) -> AppResult<String>;

    /// Wait for the next entry. `Ok(None)` means the wait timed out with
    /// nothing to do.
    async fn next(&self) -> AppResult<Option<Delivery>>;

    /// Remove a processed entry for good
    async fn ack(&self, delivery: &Delivery) -> AppResult<()>;

    /// Negative acknowledgement without requeue: the entry is removed from
    /// the work queue and copied to the dead-letter destination with
    /// `reason`.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> AppResult<()>;
}

/// Applies one decoded reservation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReservationProcessor: Send + Sync {
    async fn process(&self, message: &ReservationMessage, key: &IdempotencyKey) -> AppResult<ReserveOutcome>;
}
