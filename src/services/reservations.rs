//! Reservation intake: accept a request and put it on the queue

use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    models::reservation::{ReservationMessage, ReservationReceipt},
    queue::ReservationQueue,
};

#[derive(Clone)]
pub struct ReservationIntake {
    queue: Arc<dyn ReservationQueue>,
}

impl ReservationIntake {
    pub fn new(queue: Arc<dyn ReservationQueue>) -> Self {
        Self { queue }
    }

    /// Queue a reservation. Returns once the queue has accepted the entry;
    /// the stock change happens later in the worker.
    pub async fn submit(&self, user_id: i64, book_id: i64) -> AppResult<ReservationReceipt> {
        let message = ReservationMessage::new(user_id, book_id);
        let request_id = message
            .request_id
            .ok_or_else(|| AppError::Internal("Reservation without request id".to_string()))?;

        let entry_id = self.queue.publish(&message).await.map_err(|e| match e {
            AppError::Unavailable(_) => e,
            other => AppError::Unavailable(format!("Reservation queue rejected request: {}", other)),
        })?;

        tracing::info!(user_id, book_id, %request_id, entry_id = %entry_id, "Reservation queued");

        Ok(ReservationReceipt {
            request_id,
            message: "Reservation accepted for processing".to_string(),
        })
    }
}
