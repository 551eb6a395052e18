//! Data models for Biblion

pub mod book;
pub mod loan;
pub mod reservation;
pub mod user;

// Re-export commonly used types
pub use book::{Book, ReservationStatus, StockLevel};
pub use loan::{Loan, LoanAction, LoanStatus};
pub use reservation::{IdempotencyKey, ReservationMessage, ReserveOutcome};
pub use user::{User, UserClaims, UserRole};
