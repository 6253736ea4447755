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

//! Exponential backoff for the accept loop, so a run of `accept()` errors doesn't
//! spin the CPU while the underlying condition (e.g. too many open files) clears.

use std::cell::Cell;
use std::time::Duration;
use tokio::time;

const MAX_BACKOFF_MS: u64 = 64;

pub struct NetBackoff {
    current_ms: Cell<u64>,
}

impl NetBackoff {
    pub fn new() -> Self {
        Self {
            current_ms: Cell::new(1),
        }
    }

    pub async fn spin(&self) {
        time::sleep(Duration::from_millis(self.current_ms.get())).await;
        if self.current_ms.get() <= MAX_BACKOFF_MS / 2 {
            self.current_ms.set(self.current_ms.get() * 2);
        }
    }

    pub fn should_disconnect(&self) -> bool {
        self.current_ms.get() >= MAX_BACKOFF_MS
    }
}

impl Default for NetBackoff {
    fn default() -> Self {
        Self::new()
    }
}
