//! Books repository for database operations

use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::book::{Book, CreateBook, ReservationStatus},
};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get book by ID
    pub async fn get_by_id(&self, id: i64) -> AppResult<Book> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::BookNotFound(id))
    }

    /// Create a title with all its copies on the shelf
    pub async fn create(&self, book: &CreateBook) -> AppResult<Book> {
        sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (title, author, isbn, total_copies, stock, reservation_status)
            VALUES ($1, $2, $3, $4, $4, $5)
            RETURNING *
            "#,
        )
        .bind(book.title.trim())
        .bind(book.author.trim())
        .bind(book.isbn.as_deref())
        .bind(book.copies)
        .bind(ReservationStatus::for_stock(book.copies))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                AppError::Conflict("A book with this ISBN already exists".to_string())
            }
            _ => AppError::Database(e),
        })
    }
}
