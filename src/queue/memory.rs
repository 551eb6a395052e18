//! In-process reservation queue.
//!
//! Same delivery contract as the Redis stream (entries stay in flight until
//! acked or dead-lettered, and `recover_in_flight` puts them back as a
//! restart would) but nothing survives the process. Used by tests and by
//! single-node development setups.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{Delivery, ReservationQueue};
use crate::{
    error::{AppError, AppResult},
    models::reservation::ReservationMessage,
};

#[derive(Default)]
struct State {
    ready: VecDeque<Delivery>,
    in_flight: HashMap<String, Delivery>,
    acked: Vec<String>,
    dead: Vec<(Delivery, String)>,
}

pub struct InMemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    seq: AtomicU64,
    wait: Duration,
}

impl InMemoryQueue {
    /// `wait` bounds how long `next` blocks on an empty queue
    pub fn new(wait: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            wait,
        }
    }

    /// Append a raw payload, bypassing encoding
    pub fn push_raw(&self, payload: &[u8]) -> AppResult<String> {
        let id = format!("{}-0", self.seq.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock()?.ready.push_back(Delivery {
            id: id.clone(),
            payload: payload.to_vec(),
        });
        self.notify.notify_one();
        Ok(id)
    }

    /// Return unacknowledged entries to the head of the queue
    pub fn recover_in_flight(&self) -> AppResult<usize> {
        let mut state = self.lock()?;
        let mut pending: Vec<Delivery> = state.in_flight.drain().map(|(_, d)| d).collect();
        // push_front reverses, so sort newest first
        pending.sort_by_key(|d| std::cmp::Reverse(sequence_of(&d.id)));
        let count = pending.len();
        for delivery in pending {
            state.ready.push_front(delivery);
        }
        drop(state);
        if count > 0 {
            self.notify.notify_one();
        }
        Ok(count)
    }

    pub fn acked(&self) -> Vec<String> {
        self.lock().map(|s| s.acked.clone()).unwrap_or_default()
    }

    /// Dead-lettered entry ids with their reasons
    pub fn dead_letters(&self) -> Vec<(String, String)> {
        self.lock()
            .map(|s| s.dead.iter().map(|(d, r)| (d.id.clone(), r.clone())).collect())
            .unwrap_or_default()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().map(|s| s.ready.len() + s.in_flight.len()).unwrap_or(0)
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("In-memory queue lock poisoned".to_string()))
    }

    fn pop(&self) -> AppResult<Option<Delivery>> {
        let mut state = self.lock()?;
        let Some(delivery) = state.ready.pop_front() else {
            return Ok(None);
        };
        state.in_flight.insert(delivery.id.clone(), delivery.clone());
        Ok(Some(delivery))
    }

    fn settle(&self, delivery: &Delivery) -> AppResult<Delivery> {
        self.lock()?
            .in_flight
            .remove(&delivery.id)
            .ok_or_else(|| AppError::NotFound(format!("Delivery {} is not in flight", delivery.id)))
    }
}

fn sequence_of(id: &str) -> u64 {
    id.split('-').next().and_then(|n| n.parse().ok()).unwrap_or(0)
}

#[async_trait]
impl ReservationQueue for InMemoryQueue {
    async fn publish(&self, message: &ReservationMessage) -> AppResult<String> {
        let body = message.encode()?;
        self.push_raw(body.as_bytes())
    }

    async fn next(&self) -> AppResult<Option<Delivery>> {
        if let Some(delivery) = self.pop()? {
            return Ok(Some(delivery));
        }
        let _ = tokio::time::timeout(self.wait, self.notify.notified()).await;
        self.pop()
    }

    async fn ack(&self, delivery: &Delivery) -> AppResult<()> {
        let settled = self.settle(delivery)?;
        self.lock()?.acked.push(settled.id);
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> AppResult<()> {
        let settled = self.settle(delivery)?;
        self.lock()?.dead.push((settled, reason.to_string()));
        Ok(())
    }
}
