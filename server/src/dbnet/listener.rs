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

//! The TCP listener: binds the configured endpoint and hands accepted sockets to the
//! arbiter's accept loop, retrying transient `accept()` errors with [`NetBackoff`]
//! instead of spinning or dying outright.

use super::backoff::NetBackoff;
use crate::util::error::{CrateResult, Error};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

pub struct BaseListener {
    listener: TcpListener,
}

impl BaseListener {
    pub async fn bind(hostname: &str, port: u16) -> CrateResult<Self> {
        let listener = TcpListener::bind((hostname, port)).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> CrateResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts the next connection, retrying on transient errors. Gives up (and
    /// signals a fatal condition to the arbiter) only once backoff has maxed out,
    /// which in practice means the OS is refusing sockets outright (e.g. fd
    /// exhaustion) rather than one connection misbehaving.
    pub async fn accept(&self) -> CrateResult<(TcpStream, SocketAddr)> {
        let backoff = NetBackoff::new();
        loop {
            match self.listener.accept().await {
                Ok(accepted) => return Ok(accepted),
                Err(e) => {
                    if backoff.should_disconnect() {
                        return Err(Error::Io(e));
                    }
                    log::error!("accept error, retrying: {e}");
                    backoff.spin().await;
                }
            }
        }
    }
}
