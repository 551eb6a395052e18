//! Token bucket rate limiting for login attempts.
//!
//! Every call consumes a token if one is available. Buckets refill
//! continuously at `refill_tokens / refill_interval` tokens per second up to
//! `capacity`, and are forgotten after `idle_ttl` without calls.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::ConnectionManager, Script};

use crate::{
    config::RateLimitConfig,
    error::{AppError, AppResult},
    services::redis::RedisService,
};

/// Check, refill and consume in one round trip. State lives in a hash with
/// fields `tokens` (float) and `last_ms`.
const TOKEN_BUCKET_LUA: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local idle_ttl_ms = tonumber(ARGV[4])

local state = redis.call('HMGET', key, 'tokens', 'last_ms')
local tokens = tonumber(state[1])
local last = tonumber(state[2])

if tokens == nil or last == nil then
  tokens = capacity
  last = now_ms
elseif now_ms > last then
  tokens = math.min(capacity, tokens + (now_ms - last) / 1000.0 * refill_rate)
  last = now_ms
end

local allowed = 0
local retry_after_ms = 0
if tokens >= 1.0 then
  tokens = tokens - 1.0
  allowed = 1
else
  if refill_rate > 0 then
    retry_after_ms = math.ceil((1.0 - tokens) / refill_rate * 1000.0)
  else
    -- no refill: the bucket only comes back full once it idles out
    retry_after_ms = idle_ttl_ms
  end
end

redis.call('HSET', key, 'tokens', tostring(tokens), 'last_ms', tostring(last))
redis.call('PEXPIRE', key, idle_ttl_ms)

return {allowed, tostring(tokens), retry_after_ms}
"#;

/// Outcome of one rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub blocked: bool,
    /// Seconds until a token is available, 0 when allowed
    pub retry_after_secs: u64,
}

impl RateDecision {
    fn allowed() -> Self {
        Self {
            blocked: false,
            retry_after_secs: 0,
        }
    }

    fn blocked_for_ms(retry_after_ms: u64) -> Self {
        Self {
            blocked: true,
            retry_after_secs: retry_after_ms.div_ceil(1000),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consume one token for `key` if possible
    async fn check_and_consume(&self, key: &str) -> AppResult<RateDecision>;

    /// Forget all state for `key`
    async fn reset(&self, key: &str) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_ms: i64,
}

/// Token bucket arithmetic, kept identical to the Lua script
#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    idle_ttl_ms: u64,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            capacity: f64::from(config.capacity),
            refill_rate: config.refill_rate(),
            idle_ttl_ms: config.idle_ttl().as_millis() as u64,
        }
    }

    pub fn check_at(&self, state: Option<BucketState>, now_ms: i64) -> (BucketState, RateDecision) {
        let mut state = match state {
            None => BucketState {
                tokens: self.capacity,
                last_ms: now_ms,
            },
            Some(s) if now_ms > s.last_ms => BucketState {
                tokens: (s.tokens + (now_ms - s.last_ms) as f64 / 1000.0 * self.refill_rate).min(self.capacity),
                last_ms: now_ms,
            },
            Some(s) => s,
        };

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return (state, RateDecision::allowed());
        }

        let retry_after_ms = if self.refill_rate > 0.0 {
            ((1.0 - state.tokens) / self.refill_rate * 1000.0).ceil() as u64
        } else {
            self.idle_ttl_ms
        };
        (state, RateDecision::blocked_for_ms(retry_after_ms))
    }
}

/// Limiter shared by every instance through Redis
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    script: Script,
    config: RateLimitConfig,
}

impl RedisRateLimiter {
    pub async fn new(redis: &RedisService, config: RateLimitConfig) -> AppResult<Self> {
        Ok(Self {
            conn: redis.connection_manager().await?,
            script: Script::new(TOKEN_BUCKET_LUA),
            config,
        })
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check_and_consume(&self, key: &str) -> AppResult<RateDecision> {
        let mut conn = self.conn.clone();
        let idle_ttl_ms = self.config.idle_ttl().as_millis() as u64;

        let (allowed, _tokens, retry_after_ms): (i64, String, i64) = self
            .script
            .key(key)
            .arg(self.config.capacity)
            .arg(self.config.refill_rate())
            .arg(Utc::now().timestamp_millis())
            .arg(idle_ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        if allowed == 1 {
            Ok(RateDecision::allowed())
        } else {
            Ok(RateDecision::blocked_for_ms(retry_after_ms.max(0) as u64))
        }
    }

    async fn reset(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

/// Process-local limiter for single-instance deployments and tests
pub struct InMemoryRateLimiter {
    bucket: TokenBucket,
    idle_ttl_ms: i64,
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl InMemoryRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            bucket: TokenBucket::new(config),
            idle_ttl_ms: config.idle_ttl().as_millis() as i64,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Same as `check_and_consume` with an explicit clock
    pub fn check_and_consume_at(&self, key: &str, now_ms: i64) -> AppResult<RateDecision> {
        let mut buckets = self
            .buckets
            .lock()
            .map_err(|_| AppError::Internal("Rate limiter lock poisoned".to_string()))?;

        let ttl = self.idle_ttl_ms;
        buckets.retain(|_, s| now_ms - s.last_ms <= ttl);

        let (state, decision) = self.bucket.check_at(buckets.get(key).copied(), now_ms);
        buckets.insert(key.to_string(), state);
        Ok(decision)
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_and_consume(&self, key: &str) -> AppResult<RateDecision> {
        self.check_and_consume_at(key, Utc::now().timestamp_millis())
    }

    async fn reset(&self, key: &str) -> AppResult<()> {
        self.buckets
            .lock()
            .map_err(|_| AppError::Internal("Rate limiter lock poisoned".to_string()))?
            .remove(key);
        Ok(())
    }
}
