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

//! The `binary-schema` dialect: a compact, fixed-layout typed encoding.
//!
//! Request layout: `id:u64 | method:u8 | flags:u8 | type_len:u32 | type | key_len:u32 | key | count:u64`.
//! `flags` bit 0 is `all`. Response layout: `id:u64 | variant:u8 | ...variant body`.

use super::{DecodeError, Dialect, InstanceStatus, Method, Request, Response, ResponseBody};
use crate::util::error::Error;
use std::collections::BTreeMap;

const VARIANT_TAKE: u8 = 0;
const VARIANT_PUT: u8 = 1;
const VARIANT_STATUS: u8 = 2;
const VARIANT_ERROR: u8 = 3;

const FLAG_ALL: u8 = 0b0000_0001;

pub struct BinarySchema;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8, Error> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| Error::Decode("unexpected end of payload".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos + n;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| Error::Decode("unexpected end of payload".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn string(&mut self) -> Result<String, Error> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Decode(format!("invalid utf-8: {e}")))
    }
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

impl Dialect for BinarySchema {
    fn decode_request(payload: &[u8]) -> Result<Request, DecodeError> {
        let mut r = Reader::new(payload);
        let id = r.u64().map_err(DecodeError::Fatal)?;
        let method_code = r.u8().map_err(DecodeError::Fatal)?;
        let method = match Method::from_wire_code(method_code) {
            Some(m) => m,
            None => {
                return Err(DecodeError::Recoverable {
                    id,
                    error: Error::UnknownMethod(format!("code {method_code}")),
                })
            }
        };
        let flags = r.u8().map_err(DecodeError::Fatal)?;
        let bucket_type = r.string().map_err(DecodeError::Fatal)?;
        let key = r.string().map_err(DecodeError::Fatal)?;
        let count = r.u64().map_err(DecodeError::Fatal)?;
        Ok(Request {
            id,
            method,
            bucket_type,
            key,
            count,
            all: flags & FLAG_ALL != 0,
        })
    }

    fn encode_response(resp: &Response) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64(&mut out, resp.id);
        match &resp.body {
            ResponseBody::Take {
                conformant,
                remaining,
                limit,
                reset,
            } => {
                out.push(VARIANT_TAKE);
                out.push(*conformant as u8);
                write_u64(&mut out, *remaining);
                write_u64(&mut out, *limit);
                write_u64(&mut out, *reset);
            }
            ResponseBody::Put {
                remaining,
                limit,
                reset,
            } => {
                out.push(VARIANT_PUT);
                write_u64(&mut out, *remaining);
                write_u64(&mut out, *limit);
                write_u64(&mut out, *reset);
            }
            ResponseBody::Status { items } => {
                out.push(VARIANT_STATUS);
                write_u32(&mut out, items.len() as u32);
                for (key, status) in items {
                    write_string(&mut out, key);
                    write_u64(&mut out, status.remaining);
                    write_u64(&mut out, status.limit);
                    write_u64(&mut out, status.reset);
                }
            }
            ResponseBody::Error { kind, message } => {
                out.push(VARIANT_ERROR);
                write_string(&mut out, kind);
                write_string(&mut out, message);
            }
        }
        out
    }
}

fn decode_response(payload: &[u8]) -> Result<Response, Error> {
    let mut r = Reader::new(payload);
    let id = r.u64()?;
    let variant = r.u8()?;
    let body = match variant {
        VARIANT_TAKE => ResponseBody::Take {
            conformant: r.u8()? != 0,
            remaining: r.u64()?,
            limit: r.u64()?,
            reset: r.u64()?,
        },
        VARIANT_PUT => ResponseBody::Put {
            remaining: r.u64()?,
            limit: r.u64()?,
            reset: r.u64()?,
        },
        VARIANT_STATUS => {
            let count = r.u32()?;
            let mut items = BTreeMap::new();
            for _ in 0..count {
                let key = r.string()?;
                let remaining = r.u64()?;
                let limit = r.u64()?;
                let reset = r.u64()?;
                items.insert(
                    key,
                    InstanceStatus {
                        remaining,
                        limit,
                        reset,
                    },
                );
            }
            ResponseBody::Status { items }
        }
        VARIANT_ERROR => ResponseBody::Error {
            kind: r.string()?,
            message: r.string()?,
        },
        other => return Err(Error::Decode(format!("unknown response variant {other}"))),
    };
    Ok(Response { id, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::test_support::{sample_requests, sample_responses};

    fn encode_request(req: &Request) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64(&mut out, req.id);
        out.push(req.method.wire_code());
        out.push(if req.all { FLAG_ALL } else { 0 });
        write_string(&mut out, &req.bucket_type);
        write_string(&mut out, &req.key);
        write_u64(&mut out, req.count);
        out
    }

    #[test]
    fn requests_round_trip() {
        for req in sample_requests() {
            let encoded = encode_request(&req);
            let decoded = BinarySchema::decode_request(&encoded).ok().unwrap();
            assert_eq!(decoded, req);
        }
    }

    #[test]
    fn responses_round_trip() {
        for resp in sample_responses() {
            let encoded = BinarySchema::encode_response(&resp);
            let decoded = decode_response(&encoded).unwrap();
            assert_eq!(decoded, resp);
        }
    }

    #[test]
    fn unknown_method_is_recoverable_with_id() {
        let mut out = Vec::new();
        write_u64(&mut out, 42);
        out.push(0xFF); // not a valid method code
        out.push(0);
        write_string(&mut out, "ip");
        write_string(&mut out, "k");
        write_u64(&mut out, 1);
        match BinarySchema::decode_request(&out) {
            Err(DecodeError::Recoverable { id, .. }) => assert_eq!(id, 42),
            _ => panic!("expected a recoverable unknown-method error"),
        }
    }

    #[test]
    fn truncated_payload_is_fatal() {
        let out = vec![1, 2, 3];
        assert!(matches!(
            BinarySchema::decode_request(&out),
            Err(DecodeError::Fatal(Error::Decode(_)))
        ));
    }
}
