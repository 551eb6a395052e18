//! Loans repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{loan::Loan, reservation::IdempotencyKey},
};

const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get loan by ID
    pub async fn get_by_id(&self, id: i64) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::LoanNotFound(id))
    }

    /// All loans of a user, newest first
    pub async fn list_for_user(&self, user_id: i64) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE user_id = $1 ORDER BY reserved_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(loans)
    }

    /// Number of active loans on a title
    pub async fn count_active_for_book(&self, book_id: i64) -> AppResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE book_id = $1 AND is_active")
                .bind(book_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Lock a loan row for the rest of the transaction
    pub async fn lock_by_id(conn: &mut PgConnection, id: i64) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(AppError::LoanNotFound(id))
    }

    /// Insert a fresh reservation
    pub async fn insert_reserved(
        conn: &mut PgConnection,
        user_id: i64,
        book_id: i64,
        key: Option<&IdempotencyKey>,
        now: DateTime<Utc>,
    ) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (user_id, book_id, status, is_active, reserved_at, idempotency_key, created_at, updated_at)
            VALUES ($1, $2, 'reserved', TRUE, $3, $4, $3, $3)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .bind(now)
        .bind(key.map(IdempotencyKey::as_str))
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                AppError::NotFound(format!("User {} not found", user_id))
            }
            _ => AppError::Database(e),
        })
    }

    /// Persist the status and timestamps produced by `Loan::transition`
    pub async fn save_transition(conn: &mut PgConnection, loan: &Loan) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE loans
            SET status = $1, is_active = $2, borrowed_at = $3, due_date = $4,
                returned_at = $5, cancelled_at = $6, updated_at = $7
            WHERE id = $8
            "#,
        )
        .bind(loan.status)
        .bind(loan.is_active)
        .bind(loan.borrowed_at)
        .bind(loan.due_date)
        .bind(loan.returned_at)
        .bind(loan.cancelled_at)
        .bind(loan.updated_at)
        .bind(loan.id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Record a reservation intent. Returns false if the key already exists.
    ///
    /// A concurrent transaction holding the same key makes this wait on the
    /// unique index until that transaction ends.
    pub async fn claim_key(conn: &mut PgConnection, key: &IdempotencyKey) -> AppResult<bool> {
        let result = sqlx::query(
            "INSERT INTO processed_reservations (idempotency_key) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(key.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn attach_loan_to_key(conn: &mut PgConnection, key: &IdempotencyKey, loan_id: i64) -> AppResult<()> {
        sqlx::query("UPDATE processed_reservations SET loan_id = $1 WHERE idempotency_key = $2")
            .bind(loan_id)
            .bind(key.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn loan_for_key(conn: &mut PgConnection, key: &IdempotencyKey) -> AppResult<Option<i64>> {
        let loan_id: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT loan_id FROM processed_reservations WHERE idempotency_key = $1",
        )
        .bind(key.as_str())
        .fetch_optional(&mut *conn)
        .await?;
        Ok(loan_id.flatten())
    }
}
