//! Redis connections for the reservation stream and the login rate limiter

use redis::{
    aio::{ConnectionManager, MultiplexedConnection},
    Client,
};

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct RedisService {
    client: Client,
}

impl RedisService {
    /// Create a new Redis service and check the server answers
    pub async fn new(url: &str) -> AppResult<Self> {
        let service = Self::open(url)?;
        service.ping().await?;
        Ok(service)
    }

    /// Parse the URL without connecting
    pub fn open(url: &str) -> AppResult<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;
        Ok(Self { client })
    }

    /// Auto-reconnecting connection, cheap to clone. Each call opens a new
    /// one, so callers that block (XREADGROUP) do not stall others.
    pub async fn connection_manager(&self) -> AppResult<ConnectionManager> {
        ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| AppError::Unavailable(format!("Failed to connect to Redis: {}", e)))
    }

    /// One-off connection, not reconnected. Used by health checks.
    pub async fn dedicated_connection(&self) -> AppResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Unavailable(format!("Failed to connect to Redis: {}", e)))
    }

    pub async fn ping(&self) -> AppResult<()> {
        let mut conn = self.dedicated_connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Unavailable(format!("Redis connection test failed: {}", e)))?;
        Ok(())
    }
}
