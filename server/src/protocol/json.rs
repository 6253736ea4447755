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

//! The `tagged-json` dialect: `{"request_id": <u64>, "body": {"<TypeTag>": {...}}}`.
//! Responses embed a single-key wrapper naming the body variant, e.g. `"limitd.StatusBody"`.

use super::{DecodeError, Dialect, InstanceStatus, Method, Request, Response, ResponseBody};
use crate::util::error::Error;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

fn tag_for_method(m: Method) -> &'static str {
    match m {
        Method::Take => "limitd.Take",
        Method::Put => "limitd.Put",
        Method::Wait => "limitd.Wait",
        Method::Status => "limitd.Status",
        Method::Reset => "limitd.Reset",
    }
}

fn method_for_tag(tag: &str) -> Option<Method> {
    match tag {
        "limitd.Take" => Some(Method::Take),
        "limitd.Put" => Some(Method::Put),
        "limitd.Wait" => Some(Method::Wait),
        "limitd.Status" => Some(Method::Status),
        "limitd.Reset" | "limitd.Erase" => Some(Method::Reset),
        _ => None,
    }
}

fn u64_field(obj: &Map<String, Value>, key: &str) -> Result<u64, Error> {
    obj.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Decode(format!("missing or invalid field `{key}`")))
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Result<String, Error> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Decode(format!("missing or invalid field `{key}`")))
}

pub struct TaggedJson;

impl Dialect for TaggedJson {
    fn decode_request(payload: &[u8]) -> Result<Request, DecodeError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| DecodeError::Fatal(Error::Decode(e.to_string())))?;
        let obj = value
            .as_object()
            .ok_or_else(|| DecodeError::Fatal(Error::Decode("request is not a JSON object".into())))?;
        let id = obj
            .get("request_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| DecodeError::Fatal(Error::Decode("missing `request_id`".into())))?;
        let body = obj
            .get("body")
            .and_then(Value::as_object)
            .ok_or_else(|| DecodeError::Fatal(Error::Decode("missing `body`".into())))?;
        let (tag, fields) = body
            .iter()
            .next()
            .ok_or_else(|| DecodeError::Fatal(Error::Decode("`body` has no variant key".into())))?;
        let fields = fields
            .as_object()
            .ok_or_else(|| DecodeError::Fatal(Error::Decode("variant body is not an object".into())))?;
        let method = match method_for_tag(tag) {
            Some(m) => m,
            None => {
                return Err(DecodeError::Recoverable {
                    id,
                    error: Error::UnknownMethod(tag.clone()),
                })
            }
        };
        let bucket_type = str_field(fields, "type").map_err(DecodeError::Fatal)?;
        let key = str_field(fields, "key").map_err(DecodeError::Fatal)?;
        let count = fields
            .get("count")
            .map(|_| u64_field(fields, "count"))
            .transpose()
            .map_err(DecodeError::Fatal)?
            .unwrap_or(1);
        let all = fields
            .get("all")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Request {
            id,
            method,
            bucket_type,
            key,
            count,
            all,
        })
    }

    fn encode_response(resp: &Response) -> Vec<u8> {
        let body = match &resp.body {
            ResponseBody::Take {
                conformant,
                remaining,
                limit,
                reset,
            } => json!({ "limitd.TakeBody": { "conformant": conformant, "remaining": remaining, "limit": limit, "reset": reset } }),
            ResponseBody::Put {
                remaining,
                limit,
                reset,
            } => json!({ "limitd.PutBody": { "remaining": remaining, "limit": limit, "reset": reset } }),
            ResponseBody::Status { items } => {
                let items: BTreeMap<&str, Value> = items
                    .iter()
                    .map(|(k, s)| {
                        (
                            k.as_str(),
                            json!({ "remaining": s.remaining, "limit": s.limit, "reset": s.reset }),
                        )
                    })
                    .collect();
                json!({ "limitd.StatusBody": { "items": items } })
            }
            ResponseBody::Error { kind, message } => {
                json!({ "limitd.ErrorBody": { "type": kind, "message": message } })
            }
        };
        let envelope = json!({ "request_id": resp.id, "body": body });
        serde_json::to_vec(&envelope).expect("response JSON is always serializable")
    }
}

fn decode_response(payload: &[u8]) -> Result<Response, Error> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| Error::Decode(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| Error::Decode("response is not a JSON object".into()))?;
    let id = u64_field(obj, "request_id")?;
    let body = obj
        .get("body")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::Decode("missing `body`".into()))?;
    let (tag, fields) = body
        .iter()
        .next()
        .ok_or_else(|| Error::Decode("`body` has no variant key".into()))?;
    let fields = fields
        .as_object()
        .ok_or_else(|| Error::Decode("variant body is not an object".into()))?;
    let resp_body = match tag.as_str() {
        "limitd.TakeBody" => ResponseBody::Take {
            conformant: fields
                .get("conformant")
                .and_then(Value::as_bool)
                .ok_or_else(|| Error::Decode("missing `conformant`".into()))?,
            remaining: u64_field(fields, "remaining")?,
            limit: u64_field(fields, "limit")?,
            reset: u64_field(fields, "reset")?,
        },
        "limitd.PutBody" => ResponseBody::Put {
            remaining: u64_field(fields, "remaining")?,
            limit: u64_field(fields, "limit")?,
            reset: u64_field(fields, "reset")?,
        },
        "limitd.StatusBody" => {
            let items_obj = fields
                .get("items")
                .and_then(Value::as_object)
                .ok_or_else(|| Error::Decode("missing `items`".into()))?;
            let mut items = BTreeMap::new();
            for (key, v) in items_obj {
                let v = v
                    .as_object()
                    .ok_or_else(|| Error::Decode("status item is not an object".into()))?;
                items.insert(
                    key.clone(),
                    InstanceStatus {
                        remaining: u64_field(v, "remaining")?,
                        limit: u64_field(v, "limit")?,
                        reset: u64_field(v, "reset")?,
                    },
                );
            }
            ResponseBody::Status { items }
        }
        "limitd.ErrorBody" => ResponseBody::Error {
            kind: str_field(fields, "type")?,
            message: str_field(fields, "message")?,
        },
        other => return Err(Error::Decode(format!("unknown response variant {other}"))),
    };
    Ok(Response {
        id,
        body: resp_body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::test_support::{sample_requests, sample_responses};

    fn encode_request(req: &Request) -> Vec<u8> {
        let envelope = json!({
            "request_id": req.id,
            "body": {
                tag_for_method(req.method): {
                    "type": req.bucket_type,
                    "key": req.key,
                    "count": req.count,
                    "all": req.all,
                }
            }
        });
        serde_json::to_vec(&envelope).unwrap()
    }

    #[test]
    fn requests_round_trip() {
        for req in sample_requests() {
            let encoded = encode_request(&req);
            let decoded = TaggedJson::decode_request(&encoded).ok().unwrap();
            assert_eq!(decoded, req);
        }
    }

    #[test]
    fn responses_round_trip() {
        for resp in sample_responses() {
            let encoded = TaggedJson::encode_response(&resp);
            let decoded = decode_response(&encoded).unwrap();
            assert_eq!(decoded, resp);
        }
    }

    #[test]
    fn unknown_method_tag_is_recoverable_with_id() {
        let payload = br#"{"request_id": 7, "body": {"limitd.Bogus": {"type":"ip","key":"k"}}}"#;
        match TaggedJson::decode_request(payload) {
            Err(DecodeError::Recoverable { id, .. }) => assert_eq!(id, 7),
            _ => panic!("expected a recoverable unknown-method error"),
        }
    }

    #[test]
    fn count_defaults_to_one() {
        let payload = br#"{"request_id": 1, "body": {"limitd.Take": {"type":"ip","key":"k"}}}"#;
        let req = TaggedJson::decode_request(payload).ok().unwrap();
        assert_eq!(req.count, 1);
        assert!(!req.all);
    }
}
