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

//! The per-connection pipeline: socket-read -> frame-decode -> protocol-decode ->
//! handler -> protocol-encode -> frame-encode -> socket-write.
//!
//! Responses are emitted in arrival order: each connection finishes handling one
//! request's response before reading the next frame. This is the "serialize
//! per-connection" choice the source's stream composition left implicit; it keeps
//! per-connection state trivial at the cost of one connection's responses never
//! overtaking each other (see `SPEC_FULL.md` for the reasoning).

pub mod backoff;
pub mod listener;
pub mod terminator;

pub use listener::BaseListener;
pub use terminator::Terminator;

use crate::handler::Handler;
use crate::protocol::frame::{encode_frame, FrameDecoder};
use crate::protocol::{DecodeError, Dialect, Response};
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;

const READ_BUF_SIZE: usize = 4096;

/// One connection's worth of pipeline state. Generic over the wire dialect so the
/// read/decode/dispatch/encode/write loop is written once and monomorphized per
/// dialect rather than branching on it per frame.
pub struct ConnectionHandler<D> {
    socket: TcpStream,
    peer: SocketAddr,
    handler: Arc<Handler>,
    max_frame: usize,
    terminator: Terminator,
    /// Held for the lifetime of the connection; dropping it returns the slot to the
    /// listener's admission semaphore.
    _permit: OwnedSemaphorePermit,
    _dialect: PhantomData<D>,
}

impl<D: Dialect> ConnectionHandler<D> {
    pub fn new(
        socket: TcpStream,
        peer: SocketAddr,
        handler: Arc<Handler>,
        max_frame: usize,
        terminator: Terminator,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            socket,
            peer,
            handler,
            max_frame,
            terminator,
            _permit: permit,
            _dialect: PhantomData,
        }
    }

    /// Runs the pipeline until the peer closes, a fatal decode/framing error occurs,
    /// or the server signals shutdown.
    pub async fn run(mut self) {
        if let Err(e) = self.socket.set_nodelay(true) {
            log::debug!("{}: failed to set TCP_NODELAY: {e}", self.peer);
        }
        set_keepalive(&self.socket);
        let mut decoder = FrameDecoder::new(self.max_frame);
        let mut read_buf = [0u8; READ_BUF_SIZE];

        loop {
            tokio::select! {
                biased;
                _ = self.terminator.receive_signal() => {
                    log::debug!("{}: draining on shutdown signal", self.peer);
                    return;
                }
                result = self.socket.read(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            log::debug!("{}: peer closed the connection", self.peer);
                            return;
                        }
                        Ok(n) => {
                            decoder.fill(&read_buf[..n]);
                            loop {
                                match decoder.next_frame() {
                                    Ok(Some(payload)) => {
                                        if self.handle_one(&payload).await.is_err() {
                                            return;
                                        }
                                    }
                                    Ok(None) => break,
                                    Err(e) => {
                                        log::debug!("{}: {e}, closing connection", self.peer);
                                        return;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            log::debug!("{}: socket read error: {e}", self.peer);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Decodes, dispatches, encodes, and writes exactly one response. `Err(())`
    /// signals the caller to tear the connection down (a fatal decode error, or a
    /// failed write — the peer is gone either way).
    async fn handle_one(&mut self, payload: &[u8]) -> Result<(), ()> {
        let response = match D::decode_request(payload) {
            Ok(req) => self.handler.dispatch(req).await,
            Err(DecodeError::Fatal(e)) => {
                log::debug!("{}: {e}, closing connection", self.peer);
                return Err(());
            }
            Err(DecodeError::Recoverable { id, error }) => {
                log::info!("{}: request {id}: {error}", self.peer);
                Response::error(id, &error)
            }
        };
        let encoded = D::encode_response(&response);
        let frame = encode_frame(&encoded);
        if let Err(e) = self.socket.write_all(&frame).await {
            log::debug!("{}: socket write error: {e}", self.peer);
            return Err(());
        }
        Ok(())
    }
}

/// Enables `SO_KEEPALIVE` so dead peers (cable pulled, box rebooted) are eventually
/// noticed without waiting on an application-level timeout (§4.6 item 1). Tokio
/// doesn't expose this directly; go through the raw fd.
#[cfg(unix)]
fn set_keepalive(socket: &TcpStream) {
    use std::os::unix::io::AsRawFd;
    let fd = socket.as_raw_fd();
    let on: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of_val(&on) as libc::socklen_t,
        )
    };
    if ret != 0 {
        log::debug!("failed to set SO_KEEPALIVE: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn set_keepalive(_socket: &TcpStream) {}
