//! Book model and stock arithmetic

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

/// Availability flag mirrored from `stock` for cheap filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Available,
    Reserved,
}

impl ReservationStatus {
    /// The only valid status for a given stock value
    pub fn for_stock(stock: i32) -> Self {
        if stock > 0 {
            ReservationStatus::Available
        } else {
            ReservationStatus::Reserved
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationStatus::Available => write!(f, "available"),
            ReservationStatus::Reserved => write!(f, "reserved"),
        }
    }
}

/// Book model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    /// Copies owned by the library
    pub total_copies: i32,
    /// Copies currently free for new reservations
    pub stock: i32,
    pub reservation_status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create book request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 150, message = "Author must be 1-150 characters"))]
    pub author: String,
    #[validate(length(max = 20, message = "ISBN must be at most 20 characters"))]
    pub isbn: Option<String>,
    #[validate(range(min = 0, max = 10000, message = "Copies must be between 0 and 10000"))]
    pub copies: i32,
}

/// Stock of one title at a point in time.
///
/// `take` and `put_back` return the next level or `None` when the move would
/// leave `0 <= stock <= total_copies`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevel {
    pub stock: i32,
    pub total_copies: i32,
}

impl StockLevel {
    pub fn take(self) -> Option<StockLevel> {
        if self.stock <= 0 {
            return None;
        }
        Some(StockLevel {
            stock: self.stock - 1,
            ..self
        })
    }

    pub fn put_back(self) -> Option<StockLevel> {
        if self.stock >= self.total_copies {
            return None;
        }
        Some(StockLevel {
            stock: self.stock + 1,
            ..self
        })
    }

    pub fn reservation_status(&self) -> ReservationStatus {
        ReservationStatus::for_stock(self.stock)
    }
}
