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

//! Typed `Request`/`Response` records and the two wire dialects that (de)serialize
//! them: [`binary`] (binary-schema) and [`json`] (tagged-json). Exactly one dialect
//! is selected per server instance; see [`crate::config`].

pub mod binary;
pub mod frame;
pub mod json;

use crate::util::error::Error;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Take,
    Put,
    Wait,
    Status,
    Reset,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Take => "TAKE",
            Self::Put => "PUT",
            Self::Wait => "WAIT",
            Self::Status => "STATUS",
            Self::Reset => "RESET",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TAKE" => Some(Self::Take),
            "PUT" => Some(Self::Put),
            "WAIT" => Some(Self::Wait),
            "STATUS" => Some(Self::Status),
            "RESET" | "ERASE" => Some(Self::Reset),
            _ => None,
        }
    }

    pub fn wire_code(&self) -> u8 {
        match self {
            Self::Take => 1,
            Self::Put => 2,
            Self::Wait => 3,
            Self::Status => 4,
            Self::Reset => 5,
        }
    }

    pub fn from_wire_code(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Take),
            2 => Some(Self::Put),
            3 => Some(Self::Wait),
            4 => Some(Self::Status),
            5 => Some(Self::Reset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: Method,
    pub bucket_type: String,
    pub key: String,
    pub count: u64,
    pub all: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceStatus {
    pub remaining: u64,
    pub limit: u64,
    pub reset: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Take {
        conformant: bool,
        remaining: u64,
        limit: u64,
        reset: u64,
    },
    Put {
        remaining: u64,
        limit: u64,
        reset: u64,
    },
    Status {
        items: BTreeMap<String, InstanceStatus>,
    },
    Error {
        kind: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub body: ResponseBody,
}

impl Response {
    /// Builds an `ErrorBody` response. `id` is `0` when the originating request's id
    /// could not be recovered (per §7, every `ErrorResponse` carries an id regardless).
    pub fn error(id: u64, err: &Error) -> Self {
        Self {
            id,
            body: ResponseBody::Error {
                kind: err.wire_tag().to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// An error encountered while decoding a request frame. Distinguishes errors the
/// pipeline can recover from (an `ErrorResponse` can still be correlated and the
/// connection stays open) from ones that must close the connection (§4.2, §4.6).
pub enum DecodeError {
    /// Framing/decode failure, or an unrecoverable unknown-method with no id. Closes
    /// the connection.
    Fatal(Error),
    /// The request `id` was recovered before the failure occurred (e.g. an unknown
    /// method enumerant). An `ErrorResponse` is emitted and the connection stays open.
    Recoverable { id: u64, error: Error },
}

impl From<Error> for DecodeError {
    fn from(e: Error) -> Self {
        Self::Fatal(e)
    }
}

/// A wire dialect: turns a frame payload into a [`Request`] and a [`Response`] back
/// into a frame payload. Implemented by [`binary::BinarySchema`] and [`json::TaggedJson`].
pub trait Dialect {
    fn decode_request(payload: &[u8]) -> Result<Request, DecodeError>;
    fn encode_response(resp: &Response) -> Vec<u8>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn sample_requests() -> Vec<Request> {
        vec![
            Request {
                id: 1,
                method: Method::Take,
                bucket_type: "ip".into(),
                key: "1.2.3.4".into(),
                count: 1,
                all: false,
            },
            Request {
                id: 2,
                method: Method::Put,
                bucket_type: "ip".into(),
                key: "1.2.3.4".into(),
                count: 0,
                all: true,
            },
            Request {
                id: 3,
                method: Method::Status,
                bucket_type: "ip".into(),
                key: "1.2.3.4".into(),
                count: 1,
                all: false,
            },
            Request {
                id: 4,
                method: Method::Wait,
                bucket_type: "ip".into(),
                key: "1.2.3.4".into(),
                count: 3,
                all: false,
            },
            Request {
                id: 5,
                method: Method::Reset,
                bucket_type: "ip".into(),
                key: "1.2.3.4".into(),
                count: 1,
                all: false,
            },
        ]
    }

    pub fn sample_responses() -> Vec<Response> {
        let mut items = BTreeMap::new();
        items.insert(
            "1.2.3.4".to_string(),
            InstanceStatus {
                remaining: 9,
                limit: 10,
                reset: 1_700_000_000,
            },
        );
        vec![
            Response {
                id: 1,
                body: ResponseBody::Take {
                    conformant: true,
                    remaining: 9,
                    limit: 10,
                    reset: 1_700_000_000,
                },
            },
            Response {
                id: 2,
                body: ResponseBody::Put {
                    remaining: 10,
                    limit: 10,
                    reset: 1_700_000_000,
                },
            },
            Response {
                id: 3,
                body: ResponseBody::Status { items },
            },
            Response {
                id: 0,
                body: ResponseBody::Error {
                    kind: "UNKNOWN_BUCKET_TYPE".into(),
                    message: "no such bucket type: foo".into(),
                },
            },
        ]
    }
}
