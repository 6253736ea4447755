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

mod arbiter;
mod config;
mod dbnet;
mod handler;
mod protocol;
mod registry;
mod remote;
mod store;
mod util;

use std::process;

fn main() {
    let args = match config::CliArgs::parse(std::env::args().skip(1)) {
        Ok(a) => a,
        Err(e) => {
            let _ = libsky::util::terminal::write_error(format!("{e}\n"));
            util::exit_error();
        }
    };
    let config = match config::load(args) {
        Ok(c) => c,
        Err(e) => {
            let _ = libsky::util::terminal::write_error(format!("{e}\n"));
            util::exit_error();
        }
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(match config.log_level.as_str() {
        "debug" => log::LevelFilter::Debug,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    });
    builder.init();

    if config.profile {
        log::info!("--profile was passed but CPU profiling is not implemented by this build");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("failed to start async runtime: {e}");
            util::exit_error();
        }
    };

    let result = runtime.block_on(arbiter::run(config));
    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            log::error!("{e}");
            util::exit_error();
        }
    }
}
