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

//! A cloneable shutdown signal, handed to every connection and every background task
//! so a single broadcast wakes them all for a coordinated drain.

use tokio::sync::broadcast;

pub struct Terminator {
    signal: broadcast::Receiver<()>,
}

impl Terminator {
    pub fn new(signal: broadcast::Receiver<()>) -> Self {
        Self { signal }
    }

    /// Resolves once the shutdown broadcast fires. A lagged receiver (the sender
    /// already fired and moved on) also resolves immediately — there is only ever
    /// one shutdown.
    pub async fn receive_signal(&mut self) {
        let _ = self.signal.recv().await;
    }
}

impl Clone for Terminator {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.resubscribe(),
        }
    }
}
