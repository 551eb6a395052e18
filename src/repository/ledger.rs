//! Stock ledger: the only writer of `books.stock` and
//! `books.reservation_status`.
//!
//! Every call runs on the caller's transaction and takes the book row lock
//! (`SELECT ... FOR UPDATE`) before reading stock, so two concurrent
//! reservations of the last copy serialize on the row and the second one
//! observes `stock = 0`. Nothing here commits.

use sqlx::PgConnection;

use crate::{
    error::{AppError, AppResult},
    models::book::StockLevel,
};

pub struct StockLedger;

impl StockLedger {
    /// Take one copy off the shelf
    pub async fn reserve(conn: &mut PgConnection, book_id: i64) -> AppResult<StockLevel> {
        let level = Self::lock(conn, book_id).await?;
        let next = level.take().ok_or(AppError::NoStockAvailable(book_id))?;
        Self::write(conn, book_id, next).await?;

        tracing::debug!(book_id, stock = next.stock, "Copy reserved");
        Ok(next)
    }

    /// Put one copy back on the shelf
    pub async fn release(conn: &mut PgConnection, book_id: i64) -> AppResult<StockLevel> {
        let level = Self::lock(conn, book_id).await?;
        let next = level.put_back().ok_or_else(|| {
            AppError::Internal(format!(
                "Stock ledger drift: book {} already has all {} copies on the shelf",
                book_id, level.total_copies
            ))
        })?;
        Self::write(conn, book_id, next).await?;

        tracing::debug!(book_id, stock = next.stock, "Copy released");
        Ok(next)
    }

    async fn lock(conn: &mut PgConnection, book_id: i64) -> AppResult<StockLevel> {
        let row: Option<(i32, i32)> =
            sqlx::query_as("SELECT stock, total_copies FROM books WHERE id = $1 FOR UPDATE")
                .bind(book_id)
                .fetch_optional(&mut *conn)
                .await?;

        row.map(|(stock, total_copies)| StockLevel { stock, total_copies })
            .ok_or(AppError::BookNotFound(book_id))
    }

    async fn write(conn: &mut PgConnection, book_id: i64, level: StockLevel) -> AppResult<()> {
        sqlx::query(
            "UPDATE books SET stock = $1, reservation_status = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(level.stock)
        .bind(level.reservation_status())
        .bind(book_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
