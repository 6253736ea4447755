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

//! The stateless per-request dispatcher: looks up a bucket type, invokes the store,
//! and builds exactly one [`Response`] per [`Request`]. All state lives in
//! [`crate::store::Store`] and [`crate::registry::bucket::Registry`]; the handler
//! itself holds nothing but `Arc` handles to both.

use crate::registry::bucket::{BucketType, Registry};
use crate::protocol::{InstanceStatus, Method, Request, Response, ResponseBody};
use crate::store::Store;
use crate::util::error::Error;
use crate::util::now_millis;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Bound on how many instances a STATUS wildcard expands to in one response.
const MAX_STATUS_ITEMS: usize = 1000;

pub struct Handler {
    registry: Arc<Registry>,
    store: Arc<Store>,
}

impl Handler {
    pub fn new(registry: Arc<Registry>, store: Arc<Store>) -> Self {
        Self { registry, store }
    }

    pub async fn dispatch(&self, req: Request) -> Response {
        let snapshot = self.registry.snapshot();
        let bucket_type = match snapshot.get(&req.bucket_type) {
            Some(bt) => Arc::clone(bt),
            None => {
                log::info!(
                    "request {}: unknown bucket type `{}`",
                    req.id,
                    req.bucket_type
                );
                return Response::error(req.id, &Error::UnknownBucketType(req.bucket_type.clone()));
            }
        };
        if let Err(e) = validate(&req) {
            return Response::error(req.id, &e);
        }
        let body = match req.method {
            Method::Take => self.take(&bucket_type, &req),
            Method::Put => self.put(&bucket_type, &req),
            Method::Status => self.status(&bucket_type, &req),
            Method::Reset => self.reset(&bucket_type, &req),
            Method::Wait => self.wait(&bucket_type, &req).await,
        };
        Response { id: req.id, body }
    }

    fn take(&self, bt: &BucketType, req: &Request) -> ResponseBody {
        if bt.unlimited {
            // the store must not be touched at all for an unlimited bucket type
            return ResponseBody::Take {
                conformant: true,
                remaining: bt.size,
                limit: bt.size,
                reset: now_millis() / 1000,
            };
        }
        let (size, per_interval, interval) = bt.effective(&req.key);
        let out = self
            .store
            .take(&bt.name, &req.key, req.count, size, per_interval, interval);
        ResponseBody::Take {
            conformant: out.conformant,
            remaining: out.remaining,
            limit: out.limit,
            reset: out.reset,
        }
    }

    fn put(&self, bt: &BucketType, req: &Request) -> ResponseBody {
        if bt.unlimited {
            return ResponseBody::Put {
                remaining: bt.size,
                limit: bt.size,
                reset: now_millis() / 1000,
            };
        }
        let (size, per_interval, interval) = bt.effective(&req.key);
        let out = self
            .store
            .put(&bt.name, &req.key, req.count, req.all, size, per_interval, interval);
        ResponseBody::Put {
            remaining: out.remaining,
            limit: out.limit,
            reset: out.reset,
        }
    }

    fn status(&self, bt: &BucketType, req: &Request) -> ResponseBody {
        if let Some(prefix) = req.key.strip_suffix('*') {
            let keys = self.store.keys_with_prefix(&bt.name, prefix, MAX_STATUS_ITEMS);
            let mut items = BTreeMap::new();
            for key in keys {
                let (size, per_interval, interval) = bt.effective(&key);
                let out = self.store.peek(&bt.name, &key, size, per_interval, interval);
                items.insert(
                    key,
                    InstanceStatus {
                        remaining: out.remaining,
                        limit: out.limit,
                        reset: out.reset,
                    },
                );
            }
            return ResponseBody::Status { items };
        }
        let (size, per_interval, interval) = bt.effective(&req.key);
        let out = self.store.peek(&bt.name, &req.key, size, per_interval, interval);
        let mut items = BTreeMap::new();
        items.insert(
            req.key.clone(),
            InstanceStatus {
                remaining: out.remaining,
                limit: out.limit,
                reset: out.reset,
            },
        );
        ResponseBody::Status { items }
    }

    fn reset(&self, bt: &BucketType, req: &Request) -> ResponseBody {
        self.store.reset(&bt.name, &req.key);
        ResponseBody::Put {
            remaining: bt.size,
            limit: bt.size,
            reset: now_millis() / 1000,
        }
    }

    /// Same as TAKE on success. On failure, waits for the minimum duration after
    /// which `count` tokens will exist, then retries exactly once (§4.3, §9: "source
    /// permits at most one internal retry" — implementations MUST NOT loop).
    async fn wait(&self, bt: &BucketType, req: &Request) -> ResponseBody {
        if bt.unlimited {
            return self.take(bt, req);
        }
        let (size, per_interval, interval) = bt.effective(&req.key);
        let first = self
            .store
            .take(&bt.name, &req.key, req.count, size, per_interval, interval);
        if first.conformant {
            return ResponseBody::Take {
                conformant: true,
                remaining: first.remaining,
                limit: first.limit,
                reset: first.reset,
            };
        }
        let deficit = (req.count as f64 - first.tokens).max(0.0);
        let wait_ms = if per_interval == 0 {
            0.0
        } else {
            deficit * (interval as f64) / (per_interval as f64)
        };
        if wait_ms > 0.0 {
            tokio::time::sleep(Duration::from_millis(wait_ms.ceil() as u64)).await;
        }
        let second = self
            .store
            .take(&bt.name, &req.key, req.count, size, per_interval, interval);
        ResponseBody::Take {
            conformant: second.conformant,
            remaining: second.remaining,
            limit: second.limit,
            reset: second.reset,
        }
    }
}

fn validate(req: &Request) -> Result<(), Error> {
    if req.key.is_empty() {
        return Err(Error::Validation("key must not be empty".into()));
    }
    if req.count == 0 && matches!(req.method, Method::Take | Method::Wait) {
        return Err(Error::Validation("count must be positive for TAKE/WAIT".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::bucket::BucketTypeConfig;
    use std::collections::HashMap;

    fn fresh_handler() -> Handler {
        let mut path = std::env::temp_dir();
        path.push(format!("ratelimitd-handler-test-{}.bin", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let store = Store::open(path).unwrap();
        let registry = Arc::new(Registry::empty());
        let mut configs = HashMap::new();
        configs.insert(
            "ip".to_string(),
            BucketTypeConfig {
                size: 10,
                per_interval: 10,
                interval: 1000,
                unlimited: false,
                overrides: vec![],
            },
        );
        configs.insert(
            "unlimited_t".to_string(),
            BucketTypeConfig {
                size: 1,
                per_interval: 1,
                interval: 1000,
                unlimited: true,
                overrides: vec![],
            },
        );
        registry.replace(configs).unwrap();
        Handler::new(registry, store)
    }

    fn take_req(id: u64, bucket_type: &str, key: &str, count: u64) -> Request {
        Request {
            id,
            method: Method::Take,
            bucket_type: bucket_type.to_string(),
            key: key.to_string(),
            count,
            all: false,
        }
    }

    #[tokio::test]
    async fn unlimited_type_never_touches_store() {
        let handler = fresh_handler();
        let resp = handler
            .dispatch(take_req(1, "unlimited_t", "x", 1_000_000))
            .await;
        match resp.body {
            ResponseBody::Take {
                conformant,
                remaining,
                limit,
                ..
            } => {
                assert!(conformant);
                assert_eq!(remaining, limit);
            }
            _ => panic!("expected a TakeBody"),
        }
        assert_eq!(handler.store.len(), 0);
    }

    #[tokio::test]
    async fn unknown_bucket_type_is_an_error_response_and_keeps_going() {
        let handler = fresh_handler();
        let resp = handler.dispatch(take_req(5, "nope", "k", 1)).await;
        match resp.body {
            ResponseBody::Error { kind, .. } => assert_eq!(kind, "UNKNOWN_BUCKET_TYPE"),
            _ => panic!("expected an ErrorBody"),
        }
        // a subsequent valid request still succeeds
        let resp2 = handler.dispatch(take_req(6, "ip", "k", 1)).await;
        assert!(matches!(resp2.body, ResponseBody::Take { conformant: true, .. }));
    }

    #[tokio::test]
    async fn take_exhausts_then_denies() {
        let handler = fresh_handler();
        for n in (0..10).rev() {
            let resp = handler.dispatch(take_req(n, "ip", "1.2.3.4", 1)).await;
            match resp.body {
                ResponseBody::Take {
                    conformant,
                    remaining,
                    ..
                } => {
                    assert!(conformant);
                    assert_eq!(remaining, n);
                }
                _ => panic!(),
            }
        }
        let resp = handler.dispatch(take_req(99, "ip", "1.2.3.4", 1)).await;
        assert!(matches!(
            resp.body,
            ResponseBody::Take {
                conformant: false,
                remaining: 0,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn reset_then_status_reports_full() {
        let handler = fresh_handler();
        handler.dispatch(take_req(1, "ip", "k", 5)).await;
        let reset_req = Request {
            id: 2,
            method: Method::Reset,
            bucket_type: "ip".into(),
            key: "k".into(),
            count: 1,
            all: false,
        };
        handler.dispatch(reset_req).await;
        let status_req = Request {
            id: 3,
            method: Method::Status,
            bucket_type: "ip".into(),
            key: "k".into(),
            count: 1,
            all: false,
        };
        let resp = handler.dispatch(status_req).await;
        match resp.body {
            ResponseBody::Status { items } => {
                assert_eq!(items.get("k").unwrap().remaining, 10);
            }
            _ => panic!(),
        }
    }

    #[tokio::test]
    async fn empty_key_is_a_validation_error() {
        let handler = fresh_handler();
        let resp = handler.dispatch(take_req(1, "ip", "", 1)).await;
        assert!(matches!(resp.body, ResponseBody::Error { .. }));
    }

    /// Exhausts a one-token bucket that refills one token every 100ms, then issues
    /// a WAIT for one more token. Drives `tokio`'s paused clock forward instead of
    /// sleeping in real time, so the test asserts the retry actually waits for the
    /// scheduled refill rather than just happening to succeed immediately.
    #[tokio::test(start_paused = true)]
    async fn wait_retries_once_after_refill_then_succeeds() {
        let mut path = std::env::temp_dir();
        path.push(format!("ratelimitd-handler-wait-test-{}.bin", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let store = Store::open(path).unwrap();
        let registry = Arc::new(Registry::empty());
        let mut configs = HashMap::new();
        configs.insert(
            "slow".to_string(),
            BucketTypeConfig {
                size: 1,
                per_interval: 1,
                interval: 100,
                unlimited: false,
                overrides: vec![],
            },
        );
        registry.replace(configs).unwrap();
        let handler = Arc::new(Handler::new(registry, store));

        let exhaust = handler.dispatch(take_req(1, "slow", "k", 1)).await;
        match exhaust.body {
            ResponseBody::Take {
                conformant,
                remaining,
                ..
            } => {
                assert!(conformant);
                assert_eq!(remaining, 0);
            }
            _ => panic!("expected a TakeBody"),
        }

        let wait_req = Request {
            id: 2,
            method: Method::Wait,
            bucket_type: "slow".into(),
            key: "k".into(),
            count: 1,
            all: false,
        };
        let waiter = Arc::clone(&handler);
        let task = tokio::spawn(async move { waiter.dispatch(wait_req).await });
        // let the dispatched task reach its `sleep` and register with the paused clock
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(100)).await;
        let resp = task.await.unwrap();
        match resp.body {
            ResponseBody::Take {
                conformant,
                remaining,
                ..
            } => {
                assert!(conformant);
                assert_eq!(remaining, 0);
            }
            _ => panic!("expected a TakeBody"),
        }
    }
}
