//! Reservation consumer loop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::{Delivery, ReservationProcessor, ReservationQueue};
use crate::{
    config::QueueConfig,
    error::AppError,
    models::reservation::{ReservationMessage, ReserveOutcome},
};

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Acked(ReserveOutcome),
    DeadLettered(String),
    /// Neither ack nor dead-letter reached the queue; the entry stays
    /// pending and will be redelivered.
    Unsettled,
}

pub struct ReservationWorker<P> {
    queue: Arc<dyn ReservationQueue>,
    processor: Arc<P>,
    config: QueueConfig,
}

impl<P: ReservationProcessor + 'static> ReservationWorker<P> {
    pub fn new(queue: Arc<dyn ReservationQueue>, processor: Arc<P>, config: QueueConfig) -> Self {
        Self {
            queue,
            processor,
            config,
        }
    }

    /// Consume until `shutdown` flips to true. An entry being processed when
    /// the signal arrives is finished first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            stream = %self.config.stream,
            consumer = %self.config.consumer,
            "Reservation worker started"
        );

        while !*shutdown.borrow() {
            let next = tokio::select! {
                _ = shutdown.changed() => break,
                next = self.queue.next() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    self.handle(delivery).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read reservation queue");
                    let backoff = Duration::from_millis(self.config.error_backoff_ms);
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        tracing::info!("Reservation worker stopped");
    }

    /// Process one delivery. Never panics and never returns an error: every
    /// failure is settled here so the loop moves on to the next entry.
    pub async fn handle(&self, delivery: Delivery) -> Disposition {
        let message = match ReservationMessage::decode(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(delivery_id = %delivery.id, error = %e, "Dropping malformed reservation");
                return self.dead_letter(&delivery, &e).await;
            }
        };
        let key = message.idempotency_key(&delivery.id);
        let max_attempts = self.config.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.processor.process(&message, &key).await {
                Ok(outcome) => {
                    match outcome {
                        ReserveOutcome::Reserved { loan_id } => tracing::info!(
                            delivery_id = %delivery.id,
                            user_id = message.user_id,
                            book_id = message.book_id,
                            loan_id,
                            "Reservation applied"
                        ),
                        ReserveOutcome::AlreadyProcessed { loan_id } => tracing::info!(
                            delivery_id = %delivery.id,
                            user_id = message.user_id,
                            book_id = message.book_id,
                            ?loan_id,
                            "Duplicate reservation delivery ignored"
                        ),
                    }
                    return match self.queue.ack(&delivery).await {
                        Ok(()) => Disposition::Acked(outcome),
                        Err(e) => {
                            tracing::error!(delivery_id = %delivery.id, error = %e, "Failed to ack reservation");
                            Disposition::Unsettled
                        }
                    };
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!(
                        delivery_id = %delivery.id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Transient failure applying reservation, retrying"
                    );
                    let backoff = self.config.retry_backoff_ms * u64::from(attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => {
                    tracing::warn!(
                        delivery_id = %delivery.id,
                        user_id = message.user_id,
                        book_id = message.book_id,
                        attempt,
                        error = %e,
                        "Reservation failed"
                    );
                    return self.dead_letter(&delivery, &e).await;
                }
            }
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &AppError) -> Disposition {
        let reason = error.to_string();
        match self.queue.dead_letter(delivery, &reason).await {
            Ok(()) => Disposition::DeadLettered(reason),
            Err(e) => {
                tracing::error!(delivery_id = %delivery.id, error = %e, "Failed to dead-letter reservation");
                Disposition::Unsettled
            }
        }
    }
}
