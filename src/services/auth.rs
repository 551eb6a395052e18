//! Signup and rate-limited login

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    config::{AuthConfig, RateLimitConfig},
    error::{AppError, AppResult},
    models::user::{normalize_email, AuthResponse, LoginRequest, SignupRequest, User, UserClaims},
    repository::Repository,
    services::rate_limit::RateLimiter,
};

/// Limiter key for login attempts against one mailbox
pub fn login_key(email: &str) -> String {
    format!("login:email:{}", normalize_email(email))
}

#[derive(Clone)]
pub struct AuthService {
    repository: Repository,
    config: AuthConfig,
    limiter: Arc<dyn RateLimiter>,
    fail_open: bool,
}

impl AuthService {
    pub fn new(
        repository: Repository,
        config: AuthConfig,
        limiter: Arc<dyn RateLimiter>,
        rate_limit: &RateLimitConfig,
    ) -> Self {
        Self {
            repository,
            config,
            limiter,
            fail_open: rate_limit.fail_open,
        }
    }

    /// Register a member or student and log them in
    pub async fn signup(&self, request: SignupRequest) -> AppResult<AuthResponse> {
        request.validate()?;
        request.check_password_policy()?;

        let email = normalize_email(&request.email);
        if self.repository.users.get_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict("Email already in use".to_string()));
        }

        let hash = hash_password(&request.password)?;
        let user = self
            .repository
            .users
            .create(&request.name, &email, &hash, request.role)
            .await?;

        tracing::info!(user_id = user.id, role = ?user.role, "User signed up");
        self.issue(user)
    }

    /// Check the limiter, then the credentials. Every attempt costs a token,
    /// successful or not.
    pub async fn login(&self, request: LoginRequest) -> AppResult<AuthResponse> {
        request.validate()?;

        let key = login_key(&request.email);
        match self.limiter.check_and_consume(&key).await {
            Ok(decision) if decision.blocked => {
                tracing::warn!(key = %key, retry_after_secs = decision.retry_after_secs, "Login rate limited");
                return Err(AppError::TooManyRequests {
                    retry_after_secs: decision.retry_after_secs,
                });
            }
            Ok(_) => {}
            Err(e) if self.fail_open => {
                tracing::warn!(error = %e, "Rate limiter unavailable, allowing login attempt");
            }
            Err(e) => return Err(e),
        }

        let email = normalize_email(&request.email);
        let user = self
            .repository
            .users
            .get_by_email(&email)
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid email or password".to_string()))?;

        if !verify_password(&user, &request.password)? {
            return Err(AppError::Authentication("Invalid email or password".to_string()));
        }

        tracing::info!(user_id = user.id, "User logged in");
        self.issue(user)
    }

    fn issue(&self, user: User) -> AppResult<AuthResponse> {
        let now = Utc::now().timestamp();
        let expires_in = (self.config.jwt_expiration_hours * 3600) as i64;
        let claims = UserClaims {
            sub: user.id.to_string(),
            user_id: user.id,
            role: user.role,
            exp: now + expires_in,
            iat: now,
        };
        let access_token = claims
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))?;

        Ok(AuthResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            user,
        })
    }
}

/// Hash a password using Argon2
fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

fn verify_password(user: &User, password: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
