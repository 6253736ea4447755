/*
 * Created on Mon Jul 26 2021
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2021, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! The embedded bucket store: a sharded, in-memory `(type, key) -> BucketState` map
//! with a background-flushed, checksummed on-disk mirror (see [`persist`]).
//!
//! Operations on the same key are linearizable (they share one shard's lock);
//! operations on distinct keys proceed independently whenever they land on different
//! shards.

pub mod persist;

use crate::util::error::{CrateResult, Error};
use crate::util::now_millis;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

const SHARD_COUNT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_drip: u64,
    pub before_drop: Option<f64>,
}

impl BucketState {
    fn full(size: u64, now: u64) -> Self {
        Self {
            tokens: size as f64,
            last_drip: now,
            before_drop: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StoreStatus {
    Ready = 0,
    Repairing = 1,
    Error = 2,
    Closed = 3,
}

impl From<u8> for StoreStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Repairing,
            2 => Self::Error,
            _ => Self::Closed,
        }
    }
}

/// Result of a TAKE/PUT/STATUS evaluation against one key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakeOutcome {
    pub conformant: bool,
    /// Wire-level remaining count (`tokens` floored).
    pub remaining: u64,
    pub limit: u64,
    pub reset: u64,
    /// Unfloored token count, kept for WAIT's retry-delay computation.
    pub tokens: f64,
}

type Key = (String, String);

fn shard_of(type_name: &str, key: &str) -> usize {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    type_name.hash(&mut h);
    key.hash(&mut h);
    (h.finish() as usize) % SHARD_COUNT
}

/// `reset` is the wall-clock second (unix epoch) at which `tokens` would reach
/// `size` at the current refill rate. Already-full buckets report `now`.
fn reset_at(tokens: f64, size: u64, per_interval: u64, interval: u64, now_ms: u64) -> u64 {
    let deficit = (size as f64 - tokens).max(0.0);
    let ms_needed = if deficit <= 0.0 {
        0.0
    } else {
        deficit * (interval as f64) / (per_interval as f64)
    };
    ((now_ms as f64 + ms_needed) / 1000.0).round() as u64
}

/// Drift-free refill: `tokens' = min(size, tokens + elapsed * per_interval / interval)`.
fn refill(tokens: f64, last_drip: u64, now: u64, size: u64, per_interval: u64, interval: u64) -> f64 {
    let delta = now.saturating_sub(last_drip) as f64;
    (tokens + delta * (per_interval as f64) / (interval as f64)).min(size as f64)
}

pub struct Store {
    shards: Vec<Mutex<HashMap<Key, BucketState>>>,
    status: AtomicU8,
    path: PathBuf,
}

impl Store {
    /// Construct, preload, and mark `ready`. Mirrors the `construct -> wait for ready`
    /// ordering the server performs before it binds its listener.
    pub fn open(path: impl Into<PathBuf>) -> CrateResult<Arc<Self>> {
        let path = path.into();
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect();
        let store = Arc::new(Self {
            shards,
            status: AtomicU8::new(StoreStatus::Repairing as u8),
            path,
        });
        let preloaded = persist::preload(&store.path).map_err(|e| {
            crate::registry::poison();
            store.status.store(StoreStatus::Error as u8, Ordering::Release);
            e
        })?;
        let count = preloaded.len();
        for (k, v) in preloaded {
            let shard = shard_of(&k.0, &k.1);
            store.shards[shard].lock().insert(k, v);
        }
        store.status.store(StoreStatus::Ready as u8, Ordering::Release);
        log::info!("bucket store ready ({count} entries preloaded from {})", store.path.display());
        Ok(store)
    }

    pub fn status(&self) -> StoreStatus {
        self.status.load(Ordering::Acquire).into()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn take(
        &self,
        type_name: &str,
        key: &str,
        count: u64,
        size: u64,
        per_interval: u64,
        interval: u64,
    ) -> TakeOutcome {
        let now = now_millis();
        let shard = shard_of(type_name, key);
        let mut guard = self.shards[shard].lock();
        let entry = guard
            .entry((type_name.to_string(), key.to_string()))
            .or_insert_with(|| BucketState::full(size, now));
        let refilled = refill(entry.tokens, entry.last_drip, now, size, per_interval, interval);
        entry.last_drip = now;
        entry.before_drop = Some(refilled);
        let conformant = refilled >= count as f64;
        entry.tokens = if conformant {
            (refilled - count as f64).clamp(0.0, size as f64)
        } else {
            refilled
        };
        TakeOutcome {
            conformant,
            remaining: entry.tokens.floor() as u64,
            limit: size,
            reset: reset_at(entry.tokens, size, per_interval, interval, now),
            tokens: entry.tokens,
        }
    }

    pub fn put(
        &self,
        type_name: &str,
        key: &str,
        count: u64,
        all: bool,
        size: u64,
        per_interval: u64,
        interval: u64,
    ) -> TakeOutcome {
        let now = now_millis();
        let shard = shard_of(type_name, key);
        let mut guard = self.shards[shard].lock();
        let entry = guard
            .entry((type_name.to_string(), key.to_string()))
            .or_insert_with(|| BucketState::full(size, now));
        let refilled = refill(entry.tokens, entry.last_drip, now, size, per_interval, interval);
        entry.tokens = if all {
            size as f64
        } else {
            (refilled + count as f64).clamp(0.0, size as f64)
        };
        entry.last_drip = now;
        TakeOutcome {
            conformant: true,
            remaining: entry.tokens.floor() as u64,
            limit: size,
            reset: reset_at(entry.tokens, size, per_interval, interval, now),
            tokens: entry.tokens,
        }
    }

    /// Read-only: applies refill for reporting purposes but persists nothing.
    pub fn peek(&self, type_name: &str, key: &str, size: u64, per_interval: u64, interval: u64) -> TakeOutcome {
        let now = now_millis();
        let shard = shard_of(type_name, key);
        let guard = self.shards[shard].lock();
        let (tokens, last_drip) = match guard.get(&(type_name.to_string(), key.to_string())) {
            Some(s) => (s.tokens, s.last_drip),
            None => (size as f64, now),
        };
        let refilled = refill(tokens, last_drip, now, size, per_interval, interval);
        TakeOutcome {
            conformant: true,
            remaining: refilled.floor() as u64,
            limit: size,
            reset: reset_at(refilled, size, per_interval, interval, now),
            tokens: refilled,
        }
    }

    pub fn reset(&self, type_name: &str, key: &str) {
        let shard = shard_of(type_name, key);
        self.shards[shard]
            .lock()
            .remove(&(type_name.to_string(), key.to_string()));
    }

    /// Keys of `type_name` whose instance name starts with `prefix`, capped at `limit`.
    /// Backs STATUS's bounded wildcard expansion.
    pub fn keys_with_prefix(&self, type_name: &str, prefix: &str, limit: usize) -> Vec<String> {
        let mut out = Vec::new();
        'shards: for shard in &self.shards {
            let guard = shard.lock();
            for (t, k) in guard.keys() {
                if t == type_name && k.starts_with(prefix) {
                    out.push(k.clone());
                    if out.len() >= limit {
                        break 'shards;
                    }
                }
            }
        }
        out
    }

    /// Serialize every entry to disk. Called periodically by the background flush
    /// task (see `crate::arbiter`) and once more during `close`.
    pub async fn flush(&self) -> CrateResult<()> {
        let mut all = Vec::with_capacity(self.len());
        for shard in &self.shards {
            let guard = shard.lock();
            all.extend(guard.iter().map(|(k, v)| (k.clone(), *v)));
        }
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || persist::flush(&path, &all))
            .await
            .map_err(|e| Error::StoreFatal(format!("flush task panicked: {e}")))?;
        if matches!(result, Err(Error::StoreFatal(_))) {
            self.status.store(StoreStatus::Error as u8, Ordering::Release);
            crate::registry::poison();
        }
        result
    }

    /// Drains in-flight single-key operations (implicit: each shard lock must be
    /// free) and persists a final snapshot before signalling `close`.
    pub async fn close(&self) -> CrateResult<()> {
        self.status.store(StoreStatus::Closed as u8, Ordering::Release);
        self.flush().await?;
        log::info!("bucket store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_store() -> Arc<Store> {
        let mut path = std::env::temp_dir();
        path.push(format!("ratelimitd-store-test-{}.bin", std::process::id()));
        let _ = std::fs::remove_file(&path);
        Store::open(path).unwrap()
    }

    #[test]
    fn take_drains_and_refill_is_bounded() {
        let store = fresh_store();
        for n in (0..10).rev() {
            let out = store.take("ip", "1.2.3.4", 1, 10, 10, 1000);
            assert!(out.conformant);
            assert_eq!(out.remaining, n);
        }
        let out = store.take("ip", "1.2.3.4", 1, 10, 10, 1000);
        assert!(!out.conformant);
        assert_eq!(out.remaining, 0);
    }

    #[test]
    fn put_all_refills_to_capacity() {
        let store = fresh_store();
        for _ in 0..10 {
            store.take("ip", "k", 1, 10, 10, 1000);
        }
        let out = store.put("ip", "k", 0, true, 10, 10, 1000);
        assert_eq!(out.remaining, 10);
        let out = store.take("ip", "k", 1, 10, 10, 1000);
        assert!(out.conformant);
        assert_eq!(out.remaining, 9);
    }

    #[test]
    fn reset_clears_state_to_full() {
        let store = fresh_store();
        store.take("ip", "k", 5, 10, 10, 1000);
        store.reset("ip", "k");
        let out = store.peek("ip", "k", 10, 10, 1000);
        assert_eq!(out.remaining, 10);
    }

    #[test]
    fn unrelated_keys_are_independent() {
        let store = fresh_store();
        store.take("ip", "a", 10, 10, 10, 1000);
        let out = store.take("ip", "b", 1, 10, 10, 1000);
        assert!(out.conformant);
        assert_eq!(out.remaining, 9);
    }
}
