//! Loan endpoints
//!
//! Members may only act on their own loans; administrators on any.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::AppResult,
    models::{
        loan::Loan,
        reservation::{ReservationReceipt, ReserveRequest},
        user::UserClaims,
    },
    AppState,
};

use super::AuthenticatedUser;

/// Queue a reservation for the caller
#[utoipa::path(
    post,
    path = "/loans/reserve",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = ReserveRequest,
    responses(
        (status = 202, description = "Reservation queued", body = ReservationReceipt),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
        (status = 503, description = "Reservation queue unavailable", body = crate::error::ErrorResponse)
    )
)]
pub async fn reserve(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<ReserveRequest>,
) -> AppResult<(StatusCode, Json<ReservationReceipt>)> {
    if request.book_id <= 0 {
        return Err(crate::error::AppError::Validation("book_id must be positive".to_string()));
    }

    let receipt = state
        .services
        .reservations
        .submit(claims.user_id, request.book_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// Hand over a reserved copy
#[utoipa::path(
    post,
    path = "/loans/{id}/confirm",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan borrowed", body = Loan),
        (status = 404, description = "Loan not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Loan is not reserved", body = crate::error::ErrorResponse)
    )
)]
pub async fn confirm_borrow(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i64>,
) -> AppResult<Json<Loan>> {
    authorize(&state, &claims, loan_id).await?;
    let loan = state.services.loans.confirm_borrow(loan_id).await?;
    Ok(Json(loan))
}

/// Return a borrowed copy
#[utoipa::path(
    post,
    path = "/loans/{id}/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Book returned", body = Loan),
        (status = 404, description = "Loan not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Loan is not borrowed", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_book(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i64>,
) -> AppResult<Json<Loan>> {
    authorize(&state, &claims, loan_id).await?;
    let loan = state.services.loans.return_book(loan_id).await?;
    Ok(Json(loan))
}

/// Cancel a reservation
#[utoipa::path(
    post,
    path = "/loans/{id}/cancel",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Reservation cancelled", body = Loan),
        (status = 404, description = "Loan not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Loan is not reserved", body = crate::error::ErrorResponse)
    )
)]
pub async fn cancel_reservation(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i64>,
) -> AppResult<Json<Loan>> {
    authorize(&state, &claims, loan_id).await?;
    let loan = state.services.loans.cancel_reservation(loan_id).await?;
    Ok(Json(loan))
}

#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan details", body = Loan),
        (status = 404, description = "Loan not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i64>,
) -> AppResult<Json<Loan>> {
    let loan = authorize(&state, &claims, loan_id).await?;
    Ok(Json(loan))
}

/// Get loans for a specific user
#[utoipa::path(
    get,
    path = "/users/{id}/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User's loans, newest first", body = Vec<Loan>),
        (status = 403, description = "Not the caller's account", body = crate::error::ErrorResponse),
        (status = 404, description = "User not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_user_loans(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i64>,
) -> AppResult<Json<Vec<Loan>>> {
    claims.require_self_or_admin(user_id)?;

    let loans = state.services.loans.list_loans_for_user(user_id).await?;
    Ok(Json(loans))
}

/// Fetch the loan and check the caller may act on it. A loan's owner never
/// changes, so the check stays valid for the transition that follows.
async fn authorize(state: &AppState, claims: &UserClaims, loan_id: i64) -> AppResult<Loan> {
    let loan = state.services.loans.get_loan(loan_id).await?;
    claims.require_self_or_admin(loan.user_id)?;
    Ok(loan)
}
