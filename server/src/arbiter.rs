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

//! Top-level server lifecycle: construct the store, wait for it to become ready,
//! bind the listener, accept connections, and coordinate a graceful shutdown across
//! every background task and in-flight connection.

use crate::config::{ConfigurationSet, ProtocolDialect};
use crate::dbnet::{BaseListener, ConnectionHandler, Terminator};
use crate::handler::Handler;
use crate::protocol::binary::BinarySchema;
use crate::protocol::json::TaggedJson;
use crate::protocol::Dialect;
use crate::registry::bucket::Registry;
use crate::remote::{self, NoopConfigSource};
use crate::store::Store;
use crate::util::error::CrateResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

/// Upper bound on concurrently open connections (§5).
const MAX_CONNECTIONS: usize = 50_000;
/// Grace period given to in-flight requests once a shutdown is requested (§4.7).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// How often the store's in-memory state is mirrored to disk.
const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run(config: ConfigurationSet) -> CrateResult<()> {
    match config.protocol {
        ProtocolDialect::BinarySchema => serve::<BinarySchema>(config).await,
        ProtocolDialect::TaggedJson => serve::<TaggedJson>(config).await,
    }
}

async fn serve<D: Dialect + Send + Sync + 'static>(config: ConfigurationSet) -> CrateResult<()> {
    let store = Store::open(config.db.clone())?;
    log::info!("store ready, binding listener on {}:{}", config.hostname, config.port);

    let registry = Arc::new(Registry::empty());
    registry.replace(config.buckets.clone())?;
    let handler = Arc::new(Handler::new(Arc::clone(&registry), Arc::clone(&store)));

    let climit = Arc::new(Semaphore::new(MAX_CONNECTIONS));
    let listener = BaseListener::bind(&config.hostname, config.port).await?;
    log::info!("listening on {}", listener.local_addr()?);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let flush_store = Arc::clone(&store);
    let flush_terminator = Terminator::new(shutdown_tx.subscribe());
    let flush_task = tokio::spawn(flush_loop(flush_store, FLUSH_INTERVAL, flush_terminator));

    let remote_task = config.remote_config_uri.as_ref().map(|uri| {
        let source = Arc::new(NoopConfigSource::new(uri.clone()));
        let remote_registry = Arc::clone(&registry);
        let remote_terminator = Terminator::new(shutdown_tx.subscribe());
        let interval = Duration::from_millis(config.remote_config_interval_ms);
        tokio::spawn(remote::reload_loop(
            source,
            remote_registry,
            interval,
            remote_terminator,
        ))
    });

    let accept_loop = async {
        loop {
            let permit = match Arc::clone(&climit).acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            let (socket, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("listener accept failed permanently: {e}");
                    return;
                }
            };
            let conn_handler = Arc::clone(&handler);
            let conn_terminator = Terminator::new(shutdown_tx.subscribe());
            let max_frame = crate::protocol::frame::DEFAULT_MAX_FRAME;
            tokio::spawn(async move {
                let conn: ConnectionHandler<D> = ConnectionHandler::new(
                    socket,
                    peer,
                    conn_handler,
                    max_frame,
                    conn_terminator,
                    permit,
                );
                conn.run().await;
            });
        }
    };

    tokio::select! {
        _ = accept_loop => {}
        _ = wait_for_shutdown_signal() => {
            log::info!("shutdown signal received, draining connections");
        }
        _ = wait_until_poisoned() => {
            log::error!("store reported an unrecoverable error, initiating shutdown");
        }
    }

    // stop accepting new work, then give in-flight connections a bounded grace period
    let _ = shutdown_tx.send(());
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    flush_task.abort();
    if let Some(remote_task) = remote_task {
        remote_task.abort();
    }

    store.close().await?;
    log::info!("close");
    Ok(())
}

async fn flush_loop(store: Arc<Store>, interval: Duration, mut terminator: Terminator) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = terminator.receive_signal() => return,
            _ = tick.tick() => {
                if let Err(e) = store.flush().await {
                    log::error!("periodic store flush failed: {e}");
                }
            }
        }
    }
}

/// Polls the process-wide health flag (see [`crate::registry`]) and returns once a
/// store operation has poisoned it, so `serve`'s select can treat an unrecoverable
/// store error the same as an OS shutdown signal.
async fn wait_until_poisoned() {
    loop {
        if !crate::registry::state_okay() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
