//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{auth, books, health, loans};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Biblion API",
        version = "1.0.0",
        description = "Library loan server REST API"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Auth
        auth::signup,
        auth::login,
        // Books
        books::create_book,
        books::get_book,
        // Loans
        loans::reserve,
        loans::confirm_borrow,
        loans::return_book,
        loans::cancel_reservation,
        loans::get_loan,
        loans::get_user_loans,
    ),
    components(
        schemas(
            // Auth
            crate::models::user::SignupRequest,
            crate::models::user::LoginRequest,
            crate::models::user::AuthResponse,
            crate::models::user::User,
            crate::models::user::UserRole,
            // Books
            crate::models::book::Book,
            crate::models::book::CreateBook,
            crate::models::book::ReservationStatus,
            // Loans
            crate::models::loan::Loan,
            crate::models::loan::LoanStatus,
            crate::models::reservation::ReserveRequest,
            crate::models::reservation::ReservationReceipt,
            // Health
            health::HealthResponse,
            health::ReadinessResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Signup and login"),
        (name = "books", description = "Book catalog"),
        (name = "loans", description = "Reservations and loans")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
