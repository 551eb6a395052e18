//! Loan lifecycle service.
//!
//! Every operation that touches stock is a single transaction: the stock
//! ledger call and the loan row write commit together or not at all. Each
//! operation also runs under one overall deadline; when it expires the
//! in-flight transaction is dropped uncommitted and Postgres rolls it back.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgConnection;

use crate::{
    config::LoansConfig,
    error::{is_retryable_tx_error, AppError, AppResult},
    models::{
        loan::{Loan, LoanAction},
        reservation::{IdempotencyKey, ReservationMessage, ReserveOutcome},
    },
    queue::ReservationProcessor,
    repository::{loans::LoansRepository, Repository, StockLedger},
};

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
    config: LoansConfig,
}

impl LoansService {
    pub fn new(repository: Repository, config: LoansConfig) -> Self {
        Self { repository, config }
    }

    /// Reserve a copy for a user right away
    pub async fn reserve(&self, user_id: i64, book_id: i64) -> AppResult<Loan> {
        let loan = self
            .run("reserve", move || async move {
                let mut tx = self.repository.pool.begin().await?;
                let loan = reserve_in(&mut tx, user_id, book_id, None).await?;
                tx.commit().await?;
                Ok::<_, AppError>(loan)
            })
            .await?;

        tracing::info!(loan_id = loan.id, user_id, book_id, "Book reserved");
        Ok(loan)
    }

    /// Apply a queued reservation at most once per key.
    ///
    /// The key is recorded in the same transaction as the stock change, so
    /// a rolled back attempt leaves no trace and may be retried.
    pub async fn reserve_once(&self, message: &ReservationMessage, key: &IdempotencyKey) -> AppResult<ReserveOutcome> {
        let (user_id, book_id) = (message.user_id, message.book_id);

        self.run("reserve", move || async move {
            let mut tx = self.repository.pool.begin().await?;

            if !LoansRepository::claim_key(&mut tx, key).await? {
                let loan_id = LoansRepository::loan_for_key(&mut tx, key).await?;
                tx.rollback().await?;
                return Ok(ReserveOutcome::AlreadyProcessed { loan_id });
            }

            let loan = reserve_in(&mut tx, user_id, book_id, Some(key)).await?;
            LoansRepository::attach_loan_to_key(&mut tx, key, loan.id).await?;
            tx.commit().await?;

            Ok::<_, AppError>(ReserveOutcome::Reserved { loan_id: loan.id })
        })
        .await
    }

    /// Hand a reserved copy to the member
    pub async fn confirm_borrow(&self, loan_id: i64) -> AppResult<Loan> {
        let loan = self.transition(loan_id, LoanAction::ConfirmBorrow).await?;
        tracing::info!(loan_id, due_date = ?loan.due_date, "Loan borrowed");
        Ok(loan)
    }

    pub async fn return_book(&self, loan_id: i64) -> AppResult<Loan> {
        let loan = self.transition(loan_id, LoanAction::Return).await?;
        tracing::info!(loan_id, book_id = loan.book_id, "Book returned");
        Ok(loan)
    }

    pub async fn cancel_reservation(&self, loan_id: i64) -> AppResult<Loan> {
        let loan = self.transition(loan_id, LoanAction::Cancel).await?;
        tracing::info!(loan_id, book_id = loan.book_id, "Reservation cancelled");
        Ok(loan)
    }

    pub async fn get_loan(&self, loan_id: i64) -> AppResult<Loan> {
        let mut loan = self.repository.loans.get_by_id(loan_id).await?;
        loan.refresh_overdue(Utc::now());
        Ok(loan)
    }

    /// Loans of a user, newest first, with overdue ones flagged
    pub async fn list_loans_for_user(&self, user_id: i64) -> AppResult<Vec<Loan>> {
        // Verify user exists
        self.repository.users.get_by_id(user_id).await?;
        let mut loans = self.repository.loans.list_for_user(user_id).await?;
        let now = Utc::now();
        for loan in &mut loans {
            loan.refresh_overdue(now);
        }
        Ok(loans)
    }

    /// Lock the loan, move it along the state machine and give the copy
    /// back when the new status ends the loan. Locks loan before book.
    async fn transition(&self, loan_id: i64, action: LoanAction) -> AppResult<Loan> {
        let loan_period = chrono::Duration::days(self.config.loan_period_days);

        self.run(action.verb(), move || async move {
            let mut tx = self.repository.pool.begin().await?;

            let mut loan = LoansRepository::lock_by_id(&mut tx, loan_id).await?;
            loan.transition(action, Utc::now(), loan_period)?;
            if action.releases_stock() {
                StockLedger::release(&mut tx, loan.book_id).await?;
            }
            LoansRepository::save_transition(&mut tx, &loan).await?;

            tx.commit().await?;
            Ok::<_, AppError>(loan)
        })
        .await
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, attempt: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        run_bounded(
            operation,
            self.config.operation_timeout(),
            self.config.max_tx_retries,
            attempt,
        )
        .await
    }
}

/// Take a copy off the shelf and record the reservation. Locks book before
/// inserting the loan.
async fn reserve_in(
    conn: &mut PgConnection,
    user_id: i64,
    book_id: i64,
    key: Option<&IdempotencyKey>,
) -> AppResult<Loan> {
    StockLedger::reserve(&mut *conn, book_id).await?;
    LoansRepository::insert_reserved(conn, user_id, book_id, key, Utc::now()).await
}

/// Run `attempt` until it succeeds or fails for a reason other than a
/// serialization failure or deadlock, at most `max_retries + 1` times, all
/// within `deadline`.
async fn run_bounded<T, F, Fut>(
    operation: &'static str,
    deadline: Duration,
    max_retries: u32,
    mut attempt: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let attempts = async {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(AppError::Database(e)) if is_retryable_tx_error(&e) => {
                    if retries >= max_retries {
                        return Err(AppError::Conflict(format!(
                            "{} aborted after {} concurrent update conflicts",
                            operation,
                            retries + 1
                        )));
                    }
                    retries += 1;
                    tracing::warn!(operation, retries, error = %e, "Transaction conflict, retrying");
                }
                other => return other,
            }
        }
    };

    match tokio::time::timeout(deadline, attempts).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, deadline_ms = deadline.as_millis() as u64, "Operation deadline exceeded");
            Err(AppError::Timeout)
        }
    }
}

#[async_trait]
impl ReservationProcessor for LoansService {
    async fn process(&self, message: &ReservationMessage, key: &IdempotencyKey) -> AppResult<ReserveOutcome> {
        self.reserve_once(message, key).await
    }
}
