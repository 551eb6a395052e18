//! Reservation queue payload and idempotency key

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Message appended to the reservation stream, one per user request.
///
/// Wire form: `{"user_id": 7, "book_id": 1, "request_id": "..."}`.
/// `request_id` is optional so that bare `{user_id, book_id}` payloads are
/// still accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationMessage {
    pub user_id: i64,
    pub book_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl ReservationMessage {
    pub fn new(user_id: i64, book_id: i64) -> Self {
        Self {
            user_id,
            book_id,
            request_id: Some(Uuid::new_v4()),
        }
    }

    pub fn encode(&self) -> AppResult<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("Failed to encode reservation: {}", e)))
    }

    /// Parse a payload read from the queue. Malformed input is a
    /// `BadRequest`, never retried.
    pub fn decode(payload: &[u8]) -> AppResult<Self> {
        let message: ReservationMessage = serde_json::from_slice(payload)
            .map_err(|e| AppError::BadRequest(format!("Malformed reservation payload: {}", e)))?;
        if message.user_id <= 0 || message.book_id <= 0 {
            return Err(AppError::BadRequest(format!(
                "Reservation ids must be positive (user={}, book={})",
                message.user_id, message.book_id
            )));
        }
        Ok(message)
    }

    /// Deterministic key for this reservation intent.
    ///
    /// `delivery_id` is the queue's id for the entry; it is only used when
    /// the publisher did not attach a `request_id`.
    pub fn idempotency_key(&self, delivery_id: &str) -> IdempotencyKey {
        let discriminator = match self.request_id {
            Some(id) => id.to_string(),
            None => format!("delivery:{}", delivery_id),
        };
        let mut hasher = Sha256::new();
        hasher.update(format!("reservation:{}:{}:{}", self.user_id, self.book_id, discriminator));
        IdempotencyKey(hex::encode(hasher.finalize()))
    }
}

/// Hex SHA-256 identifying one reservation intent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of applying a queued reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved { loan_id: i64 },
    /// The key was seen before; the earlier loan (if it still exists) is
    /// returned and stock is left alone.
    AlreadyProcessed { loan_id: Option<i64> },
}

/// Reservation request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReserveRequest {
    pub book_id: i64,
}

/// Returned by the intake endpoint once the request is queued
#[derive(Debug, Serialize, ToSchema)]
pub struct ReservationReceipt {
    pub request_id: Uuid,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bare_payload_without_request_id() {
        let msg = ReservationMessage::decode(br#"{"user_id": 7, "book_id": 1}"#).unwrap();
        assert_eq!(msg.user_id, 7);
        assert_eq!(msg.book_id, 1);
        assert_eq!(msg.request_id, None);
    }

    #[test]
    fn rejects_garbage_and_non_positive_ids() {
        assert!(matches!(ReservationMessage::decode(b"not json"), Err(AppError::BadRequest(_))));
        assert!(matches!(
            ReservationMessage::decode(br#"{"user_id": 0, "book_id": 1}"#),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            ReservationMessage::decode(br#"{"user_id": -3, "book_id": 1}"#),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn key_is_stable_for_a_request_regardless_of_delivery() {
        let msg = ReservationMessage::new(7, 1);
        assert_eq!(msg.idempotency_key("1-0"), msg.idempotency_key("2-0"));
    }

    #[test]
    fn separate_clicks_get_separate_keys() {
        let a = ReservationMessage::new(7, 1);
        let b = ReservationMessage::new(7, 1);
        assert_ne!(a.idempotency_key("1-0"), b.idempotency_key("1-0"));
    }

    #[test]
    fn bare_payload_falls_back_to_delivery_id() {
        let msg = ReservationMessage { user_id: 7, book_id: 1, request_id: None };
        assert_eq!(msg.idempotency_key("5-0"), msg.idempotency_key("5-0"));
        assert_ne!(msg.idempotency_key("5-0"), msg.idempotency_key("6-0"));
        assert_eq!(msg.idempotency_key("5-0").as_str().len(), 64);
    }

    #[test]
    fn encoded_message_uses_snake_case_ids() {
        let msg = ReservationMessage { user_id: 7, book_id: 1, request_id: None };
        assert_eq!(msg.encode().unwrap(), r#"{"user_id":7,"book_id":1}"#);
    }
}
