/*
 * Created on Sat Mar 26 2022
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2022, Sayan Nandan <ohsayan@outlook.com>
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

use std::{fmt, io::Error as IoError};

pub type CrateResult<T> = Result<T, Error>;

/// The error taxonomy of the service. Variant names track the disposition each one
/// carries (close the connection, emit an `ErrorResponse`, or abort).
#[derive(Debug)]
pub enum Error {
    /// Malformed length prefix or oversized frame. Closes the connection.
    Framing(String),
    /// Payload did not conform to the selected dialect's schema. Closes the connection.
    Decode(String),
    /// Method enumerant not recognized.
    UnknownMethod(String),
    /// Bucket type name not present in the registry.
    UnknownBucketType(String),
    /// Request fields out of range (negative count, empty key, ...).
    Validation(String),
    /// Store operation failed but the store itself remains healthy.
    StoreTransient(String),
    /// Store signalled it is unrecoverable; triggers shutdown.
    StoreFatal(String),
    /// Bad configuration, at load or at reload.
    Config(String),
    Io(IoError),
}

impl Error {
    /// The wire-level error type tag carried in an `ErrorBody`.
    pub fn wire_tag(&self) -> &'static str {
        match self {
            Self::Framing(_) => "FRAMING",
            Self::Decode(_) => "DECODE",
            Self::UnknownMethod(_) => "UNKNOWN_METHOD",
            Self::UnknownBucketType(_) => "UNKNOWN_BUCKET_TYPE",
            Self::Validation(_) => "VALIDATION",
            Self::StoreTransient(_) => "INTERNAL",
            Self::StoreFatal(_) => "INTERNAL",
            Self::Config(_) => "CONFIG",
            Self::Io(_) => "INTERNAL",
        }
    }

    /// Whether this error, observed by the connection pipeline, should close the
    /// connection rather than be reported as an `ErrorResponse`.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Framing(_) | Self::Decode(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Framing(m) => write!(f, "framing error: {m}"),
            Self::Decode(m) => write!(f, "decode error: {m}"),
            Self::UnknownMethod(m) => write!(f, "unknown method: {m}"),
            Self::UnknownBucketType(m) => write!(f, "unknown bucket type: {m}"),
            Self::Validation(m) => write!(f, "validation error: {m}"),
            Self::StoreTransient(m) => write!(f, "store error: {m}"),
            Self::StoreFatal(m) => write!(f, "fatal store error: {m}"),
            Self::Config(m) => write!(f, "configuration error: {m}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<IoError> for Error {
    fn from(ioe: IoError) -> Self {
        Self::Io(ioe)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
