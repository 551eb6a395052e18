//! API integration tests

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

fn base_url() -> String {
    std::env::var("BIBLION_TEST_URL").unwrap_or_else(|_| "http://localhost:8080/api/v1".into())
}

/// Sign up a fresh member and return (user id, bearer token)
async fn signup(client: &Client) -> (i64, String) {
    let response = client
        .post(format!("{}/auth/signup", base_url()))
        .json(&json!({
            "name": "Smoke Test",
            "email": format!("{}@test.biblion", Uuid::new_v4()),
            "password": "Secret123",
            "role": "member"
        }))
        .send()
        .await
        .expect("Failed to send signup request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = response.json().await.expect("Failed to parse signup response");
    let id = body["user"]["id"].as_i64().expect("No user id in response");
    let token = body["access_token"].as_str().expect("No token in response").to_string();
    (id, token)
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", base_url()))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_readiness_reports_dependencies() {
    let client = Client::new();

    let response = client
        .get(format!("{}/ready", base_url()))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["database"], true);
    assert_eq!(body["redis"], true);
}

#[tokio::test]
#[ignore]
async fn test_signup_then_login() {
    let client = Client::new();
    let email = format!("{}@test.biblion", Uuid::new_v4());

    let response = client
        .post(format!("{}/auth/signup", base_url()))
        .json(&json!({
            "name": "Alice",
            "email": email,
            "password": "Secret123",
            "role": "student"
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = client
        .post(format!("{}/auth/login", base_url()))
        .json(&json!({ "email": email.to_uppercase(), "password": "Secret123" }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["access_token"].is_string());
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["user"]["password_hash"].is_null());
}

#[tokio::test]
#[ignore]
async fn test_login_is_rate_limited_per_email() {
    let client = Client::new();
    let email = format!("{}@test.biblion", Uuid::new_v4());

    for _ in 0..5 {
        let response = client
            .post(format!("{}/auth/login", base_url()))
            .json(&json!({ "email": email, "password": "wrong" }))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = client
        .post(format!("{}/auth/login", base_url()))
        .json(&json!({ "email": email, "password": "wrong" }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 121);
}

#[tokio::test]
#[ignore]
async fn test_reservation_is_accepted_and_applied() {
    let client = Client::new();
    let (user_id, token) = signup(&client).await;

    // Book 1 is expected to exist in the test database
    let response = client
        .post(format!("{}/loans/reserve", base_url()))
        .bearer_auth(&token)
        .json(&json!({ "book_id": 1 }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["request_id"].is_string());

    // The worker applies the reservation asynchronously
    let mut loans = Vec::new();
    for _ in 0..50 {
        let response = client
            .get(format!("{}/users/{}/loans", base_url(), user_id))
            .bearer_auth(&token)
            .send()
            .await
            .expect("Failed to send request");
        loans = response.json::<Vec<Value>>().await.expect("Failed to parse response");
        if !loans.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if let Some(loan) = loans.first() {
        assert_eq!(loan["status"], "reserved");
        assert_eq!(loan["user_id"], user_id);
    }
}

#[tokio::test]
#[ignore]
async fn test_members_cannot_read_other_members_loans() {
    let client = Client::new();
    let (_, token) = signup(&client).await;
    let (other_id, _) = signup(&client).await;

    let response = client
        .get(format!("{}/users/{}/loans", base_url(), other_id))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
#[ignore]
async fn test_unauthorized_access() {
    let client = Client::new();

    let response = client
        .post(format!("{}/loans/reserve", base_url()))
        .json(&json!({ "book_id": 1 }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
