//! Loan model and its state machine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};

/// Loan status.
///
/// ```text
/// reserved -> borrowed -> returned
///     \
///      `----> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Reserved,
    Borrowed,
    Returned,
    Cancelled,
}

/// Transitions a member can request on an existing loan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanAction {
    ConfirmBorrow,
    Return,
    Cancel,
}

impl LoanAction {
    pub fn verb(self) -> &'static str {
        match self {
            LoanAction::ConfirmBorrow => "confirm",
            LoanAction::Return => "return",
            LoanAction::Cancel => "cancel",
        }
    }

    /// Whether the action hands the copy back to the shelf
    pub fn releases_stock(self) -> bool {
        matches!(self, LoanAction::Return | LoanAction::Cancel)
    }
}

impl LoanStatus {
    /// Next status for `action`, or `None` if the transition is illegal
    pub fn apply(self, action: LoanAction) -> Option<LoanStatus> {
        match (self, action) {
            (LoanStatus::Reserved, LoanAction::ConfirmBorrow) => Some(LoanStatus::Borrowed),
            (LoanStatus::Reserved, LoanAction::Cancel) => Some(LoanStatus::Cancelled),
            (LoanStatus::Borrowed, LoanAction::Return) => Some(LoanStatus::Returned),
            _ => None,
        }
    }

    /// Active loans hold a copy out of stock
    pub fn is_active(self) -> bool {
        matches!(self, LoanStatus::Reserved | LoanStatus::Borrowed)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LoanStatus::Reserved => "reserved",
            LoanStatus::Borrowed => "borrowed",
            LoanStatus::Returned => "returned",
            LoanStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

/// Loan model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Loan {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub status: LoanStatus,
    pub is_active: bool,
    pub reserved_at: DateTime<Utc>,
    pub borrowed_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Borrowed and past its due date, as of the read
    #[sqlx(skip)]
    #[serde(default)]
    pub is_overdue: bool,
    #[serde(skip_serializing)]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Apply `action` at `now`, stamping the timestamp that belongs to the
    /// new status. Earlier timestamps are never touched.
    pub fn transition(&mut self, action: LoanAction, now: DateTime<Utc>, loan_period: Duration) -> AppResult<()> {
        let next = self.status.apply(action).ok_or(AppError::InvalidTransition {
            loan_id: self.id,
            from: self.status,
            action: action.verb(),
        })?;

        match next {
            LoanStatus::Borrowed => {
                self.borrowed_at = Some(now);
                self.due_date = Some(now + loan_period);
            }
            LoanStatus::Returned => self.returned_at = Some(now),
            LoanStatus::Cancelled => self.cancelled_at = Some(now),
            LoanStatus::Reserved => {}
        }
        self.status = next;
        self.is_active = next.is_active();
        self.updated_at = now;
        Ok(())
    }

    /// Whether a borrowed loan is past its due date at `now`
    pub fn overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LoanStatus::Borrowed && self.due_date.map(|d| d < now).unwrap_or(false)
    }

    /// Recompute `is_overdue` before handing the loan out
    pub fn refresh_overdue(&mut self, now: DateTime<Utc>) {
        self.is_overdue = self.overdue_at(now);
    }
}

#[cfg(test)]
pub(crate) fn reserved_loan(id: i64, reserved_at: DateTime<Utc>) -> Loan {
    Loan {
        id,
        user_id: 7,
        book_id: 1,
        status: LoanStatus::Reserved,
        is_active: true,
        reserved_at,
        borrowed_at: None,
        due_date: None,
        returned_at: None,
        cancelled_at: None,
        is_overdue: false,
        idempotency_key: None,
        created_at: reserved_at,
        updated_at: reserved_at,
    }
}
