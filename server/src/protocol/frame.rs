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

//! Length-prefixed framing: an unsigned LEB128 varint length `L` followed by exactly
//! `L` bytes of payload. The decoder only ever yields whole payloads; partial frames
//! stay buffered across reads.

use crate::util::error::Error;
use bytes::{Buf, BufMut, BytesMut};

pub const DEFAULT_MAX_FRAME: usize = 65536;

/// Stateful decoder over a growing byte buffer. Callers append freshly-read socket
/// bytes with [`Self::fill`] and then drain whole frames with [`Self::next_frame`].
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame: usize,
}

impl FrameDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame,
        }
    }

    pub fn fill(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Attempts to pull one complete payload out of the buffer. Returns `Ok(None)` if
    /// more bytes are needed (the buffer is left untouched). A decoded varint length
    /// exceeding `max_frame` is a [`Error::Framing`] — the caller must close the
    /// connection on this error (§4.1, §4.6).
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let mut cursor = &self.buf[..];
        let (len, varint_len) = match decode_varint(cursor) {
            Some(v) => v,
            None => return Ok(None),
        };
        if len as usize > self.max_frame {
            return Err(Error::Framing(format!(
                "frame length {len} exceeds max_frame {}",
                self.max_frame
            )));
        }
        cursor = &cursor[varint_len..];
        if cursor.len() < len as usize {
            return Ok(None);
        }
        let payload = cursor[..len as usize].to_vec();
        let consumed = varint_len + len as usize;
        self.buf.advance(consumed);
        Ok(Some(payload))
    }
}

/// Encodes `payload` as `varint(len) || payload` in one contiguous buffer so a single
/// socket write carries a whole frame atomically.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(payload.len() + 5);
    encode_varint(payload.len() as u64, &mut out);
    out.put_slice(payload);
    out.to_vec()
}

fn encode_varint(mut value: u64, out: &mut BytesMut) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Returns `(value, bytes_consumed)`, or `None` if the buffer doesn't yet hold a
/// complete varint.
fn decode_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= 10 {
            // a 64-bit varint never needs more than 10 bytes; anything longer is junk
            return Some((u64::MAX, i));
        }
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_frame() {
        let payload = b"hello world".to_vec();
        let encoded = encode_frame(&payload);
        let mut dec = FrameDecoder::new(DEFAULT_MAX_FRAME);
        dec.fill(&encoded);
        assert_eq!(dec.next_frame().unwrap(), Some(payload));
        assert_eq!(dec.next_frame().unwrap(), None);
    }

    #[test]
    fn round_trips_a_sequence_of_frames_across_partial_reads() {
        let frames: Vec<Vec<u8>> = vec![b"a".to_vec(), b"bb".to_vec(), vec![0u8; 300]];
        let mut encoded = Vec::new();
        for f in &frames {
            encoded.extend(encode_frame(f));
        }
        let mut dec = FrameDecoder::new(DEFAULT_MAX_FRAME);
        let mut out = Vec::new();
        // feed one byte at a time to exercise the partial-frame buffering path
        for byte in encoded {
            dec.fill(&[byte]);
            while let Some(frame) = dec.next_frame().unwrap() {
                out.push(frame);
            }
        }
        assert_eq!(out, frames);
    }

    #[test]
    fn oversized_frame_is_a_framing_error() {
        let mut dec = FrameDecoder::new(8);
        let encoded = encode_frame(&vec![0u8; 100]);
        dec.fill(&encoded);
        assert!(matches!(dec.next_frame(), Err(Error::Framing(_))));
    }
}
