//! Integration tests
//!
//! Everything here needs live services and is `#[ignore]`d:
//! - `loan_lifecycle`: Postgres at `DATABASE_URL`
//! - `api_tests`: a running server at `BIBLION_TEST_URL` (default
//!   `http://localhost:8080/api/v1`)
//!
//! Run with: cargo test --test integration -- --ignored

mod api_tests;
mod loan_lifecycle;
