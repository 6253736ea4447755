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

//! The remote configuration fetcher is an external collaborator: this module only
//! specifies its boundary and drives the periodic reload loop around it. A real
//! deployment supplies a [`RemoteConfigSource`] that calls out to whatever URI
//! `remoteConfigURI` names; none is implemented here.

use crate::dbnet::Terminator;
use crate::registry::bucket::{BucketTypeConfig, Registry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One fetch either yields a new bucket-type set, or signals that nothing changed.
pub enum FetchOutcome {
    Unchanged,
    Updated(HashMap<String, BucketTypeConfig>),
}

/// Contract for a remote configuration source (§1: "periodically returns either an
/// updated bucket-type set or an unchanged marker"). Out of scope to implement; the
/// reload loop below only depends on this trait.
#[allow(async_fn_in_trait)]
pub trait RemoteConfigSource: Send + Sync + 'static {
    async fn fetch(&self) -> Result<FetchOutcome, String>;
}

/// No-op placeholder source: always reports `Unchanged`. Keeps [`reload_loop`] wired
/// into the arbiter and exercised end-to-end ahead of a real fetcher (e.g. one that
/// polls `remoteConfigURI` over HTTP) being implemented.
pub struct NoopConfigSource {
    uri: String,
}

impl NoopConfigSource {
    pub fn new(uri: String) -> Self {
        log::warn!(
            "remoteConfigURI `{uri}` is configured but no remote fetcher is implemented; \
             the reload loop is running but will never publish an update"
        );
        Self { uri }
    }
}

impl RemoteConfigSource for NoopConfigSource {
    async fn fetch(&self) -> Result<FetchOutcome, String> {
        let _ = &self.uri;
        Ok(FetchOutcome::Unchanged)
    }
}

/// Polls `source` every `interval` and publishes successful, changed fetches to
/// `registry`. A failed fetch is logged and leaves the currently published registry
/// untouched (§4.7); it is never treated as a reason to stop the loop.
pub async fn reload_loop<S: RemoteConfigSource>(
    source: Arc<S>,
    registry: Arc<Registry>,
    interval: Duration,
    mut terminator: Terminator,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = terminator.receive_signal() => {
                log::debug!("remote config reload loop stopping");
                return;
            }
            _ = tick.tick() => {
                match source.fetch().await {
                    Ok(FetchOutcome::Unchanged) => {}
                    Ok(FetchOutcome::Updated(buckets)) => match registry.replace(buckets) {
                        Ok(()) => log::info!("published updated bucket-type set from remote config"),
                        Err(e) => log::error!("rejected remote config: {e}"),
                    },
                    Err(e) => log::error!("remote config fetch failed: {e}"),
                }
            }
        }
    }
}
