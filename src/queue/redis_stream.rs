//! Reservation queue on a Redis stream with a consumer group.
//!
//! - publish: `XADD <stream> * payload <json>`
//! - consume: `XREADGROUP GROUP <group> <consumer> COUNT 1 BLOCK <ms>`
//! - ack: `XACK`
//! - dead-letter: `XADD <stream>:dead ...` and `XACK` in one MULTI
//! - trim: `XTRIM <stream> MINID <id>` below the oldest unsettled entry
//!
//! On startup the consumer first re-reads its own pending entries (id `0`)
//! so that anything delivered before a crash is processed again. Entries
//! left pending by another consumer for longer than `claim_idle_ms` are
//! taken over with `XAUTOCLAIM` before new entries (id `>`) are read.
//!
//! Publishing never trims: an accepted entry is only removed once it has
//! been acked or dead-lettered. Durability of accepted entries relies on the
//! Redis server running with AOF enabled.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use redis::{
    aio::ConnectionManager,
    streams::{StreamId, StreamInfoGroupsReply, StreamPendingReply, StreamRangeReply, StreamReadOptions, StreamReadReply},
    AsyncCommands, Value,
};
use tokio::sync::Mutex;

use super::{Delivery, ReservationQueue};
use crate::{
    config::QueueConfig,
    error::{AppError, AppResult},
    models::reservation::ReservationMessage,
    services::redis::RedisService,
};

const PAYLOAD_FIELD: &str = "payload";
const CLAIM_START: &str = "0-0";

pub struct RedisStreamQueue {
    config: QueueConfig,
    dead_stream: String,
    publisher: ConnectionManager,
    // XREADGROUP BLOCK holds its connection, so the consumer gets its own.
    // Both managers reconnect after the server drops them.
    consumer: ConnectionManager,
    draining_pending: AtomicBool,
    claim_cursor: Mutex<String>,
    settled: AtomicU64,
}

fn into_delivery(entry: StreamId) -> Delivery {
    Delivery {
        // Pending entries whose body was deleted come back without fields;
        // an empty payload fails decoding and is dead-lettered.
        payload: entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default(),
        id: entry.id,
    }
}

impl RedisStreamQueue {
    /// Connect and make sure the stream and consumer group exist
    pub async fn new(redis: &RedisService, config: QueueConfig) -> AppResult<Self> {
        let publisher = redis.connection_manager().await?;
        let mut consumer = redis.connection_manager().await?;

        match consumer
            .xgroup_create_mkstream::<_, _, _, ()>(&config.stream, &config.group, "0")
            .await
        {
            Ok(()) => tracing::info!(stream = %config.stream, group = %config.group, "Created consumer group"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            dead_stream: format!("{}:dead", config.stream),
            config,
            publisher,
            consumer,
            draining_pending: AtomicBool::new(true),
            claim_cursor: Mutex::new(CLAIM_START.to_string()),
            settled: AtomicU64::new(0),
        })
    }

    async fn read(&self, id: &str, block: bool) -> AppResult<Option<Delivery>> {
        let mut opts = StreamReadOptions::default()
            .group(&self.config.group, &self.config.consumer)
            .count(1);
        if block {
            opts = opts.block(self.config.block_ms as usize);
        }

        let mut conn = self.consumer.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.config.stream], &[id], &opts)
            .await?;

        Ok(reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next())
            .map(into_delivery))
    }

    /// Take over one entry another consumer left pending for longer than
    /// `claim_idle_ms`. The scan cursor is kept between calls.
    async fn claim_abandoned(&self) -> AppResult<Option<Delivery>> {
        if self.config.claim_idle_ms == 0 {
            return Ok(None);
        }

        let mut cursor = self.claim_cursor.lock().await;
        let mut conn = self.consumer.clone();
        let reply: Vec<Value> = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream)
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg(self.config.claim_idle_ms)
            .arg(cursor.as_str())
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        // [next cursor, claimed entries, deleted ids (Redis 7+)]
        let mut parts = reply.into_iter();
        let next_cursor: String = match parts.next() {
            Some(v) => redis::from_redis_value(&v)?,
            None => CLAIM_START.to_string(),
        };
        let claimed: StreamRangeReply = match parts.next() {
            Some(v) => redis::from_redis_value(&v)?,
            None => StreamRangeReply::default(),
        };
        *cursor = next_cursor;

        Ok(claimed.ids.into_iter().next().map(into_delivery))
    }

    /// Remove entries that every consumer has settled: everything below the
    /// oldest pending entry, or below the group's last delivered id when
    /// nothing is pending. Entries not yet delivered are never touched.
    pub async fn trim_settled(&self) -> AppResult<usize> {
        let mut conn = self.consumer.clone();

        let pending: StreamPendingReply = conn.xpending(&self.config.stream, &self.config.group).await?;
        let min_id = match pending {
            StreamPendingReply::Data(data) => data.start_id,
            StreamPendingReply::Empty => {
                let info: StreamInfoGroupsReply = conn.xinfo_groups(&self.config.stream).await?;
                match info.groups.into_iter().find(|g| g.name == self.config.group) {
                    Some(group) => group.last_delivered_id,
                    None => return Ok(0),
                }
            }
        };

        let trimmed: usize = redis::cmd("XTRIM")
            .arg(&self.config.stream)
            .arg("MINID")
            .arg(&min_id)
            .query_async(&mut conn)
            .await?;
        if trimmed > 0 {
            tracing::debug!(stream = %self.config.stream, min_id = %min_id, trimmed, "Trimmed settled entries");
        }
        Ok(trimmed)
    }

    async fn after_settle(&self) {
        let every = self.config.trim_every;
        if every == 0 {
            return;
        }
        let settled = self.settled.fetch_add(1, Ordering::Relaxed) + 1;
        if settled % every == 0 {
            if let Err(e) = self.trim_settled().await {
                tracing::warn!(error = %e, stream = %self.config.stream, "Failed to trim reservation stream");
            }
        }
    }
}

#[async_trait]
impl ReservationQueue for RedisStreamQueue {
    async fn publish(&self, message: &ReservationMessage) -> AppResult<String> {
        let body = message.encode()?;
        let mut conn = self.publisher.clone();
        let id: String = conn.xadd(&self.config.stream, "*", &[(PAYLOAD_FIELD, body)]).await?;
        Ok(id)
    }

    async fn next(&self) -> AppResult<Option<Delivery>> {
        if self.draining_pending.load(Ordering::Acquire) {
            match self.read("0", false).await? {
                Some(delivery) => {
                    tracing::info!(delivery_id = %delivery.id, "Redelivering pending reservation");
                    return Ok(Some(delivery));
                }
                None => self.draining_pending.store(false, Ordering::Release),
            }
        }

        if let Some(delivery) = self.claim_abandoned().await? {
            tracing::info!(delivery_id = %delivery.id, "Claimed reservation abandoned by another consumer");
            return Ok(Some(delivery));
        }

        self.read(">", true).await
    }

    async fn ack(&self, delivery: &Delivery) -> AppResult<()> {
        let mut conn = self.consumer.clone();
        conn.xack::<_, _, _, i64>(&self.config.stream, &self.config.group, &[&delivery.id])
            .await?;
        self.after_settle().await;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> AppResult<()> {
        let payload = String::from_utf8_lossy(&delivery.payload).into_owned();
        let fields = [
            (PAYLOAD_FIELD, payload.as_str()),
            ("delivery_id", delivery.id.as_str()),
            ("consumer", self.config.consumer.as_str()),
            ("reason", reason),
        ];

        let mut conn = self.consumer.clone();
        redis::pipe()
            .atomic()
            .xadd(&self.dead_stream, "*", &fields)
            .ignore()
            .xack(&self.config.stream, &self.config.group, &[&delivery.id])
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::Unavailable(format!("Failed to dead-letter {}: {}", delivery.id, e)))?;
        self.after_settle().await;
        Ok(())
    }
}
