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

//! On-disk format for the bucket store: a magic header followed by a stream of
//! length-prefixed, checksummed records. One record per `(type, key) -> BucketState`.

use crate::store::BucketState;
use crate::util::error::{CrateResult, Error};
use crc::{Crc, CRC_32_ISO_HDLC};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 8] = b"RLBKTv01";
const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub type Record = ((String, String), BucketState);

/// Reads every record out of `path`. A missing file is treated as an empty, fresh
/// store rather than an error (first run).
pub fn preload(path: &Path) -> CrateResult<Vec<Record>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 8];
    match reader.read_exact(&mut magic) {
        Ok(()) => {}
        Err(_) => return Ok(Vec::new()), // empty file: nothing preloaded yet
    }
    if magic != *MAGIC {
        return Err(Error::StoreFatal(format!(
            "bad store file magic in {}",
            path.display()
        )));
    }
    let mut out = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).is_err() {
            break;
        }
        let rec_len = u32::from_le_bytes(len_buf) as usize;
        let mut body = vec![0u8; rec_len];
        reader
            .read_exact(&mut body)
            .map_err(|e| Error::StoreFatal(format!("truncated store record: {e}")))?;
        let mut crc_buf = [0u8; 4];
        reader
            .read_exact(&mut crc_buf)
            .map_err(|e| Error::StoreFatal(format!("truncated store checksum: {e}")))?;
        let expected = u32::from_le_bytes(crc_buf);
        let actual = CRC.checksum(&body);
        if actual != expected {
            return Err(Error::StoreFatal(format!(
                "checksum mismatch reading {}",
                path.display()
            )));
        }
        out.push(decode_record(&body)?);
    }
    Ok(out)
}

/// Writes every record in `records` to `path` via a temporary file, renamed into
/// place once fully written and flushed, so a crash mid-flush never corrupts the
/// previous generation.
pub fn flush(path: &Path, records: &[Record]) -> CrateResult<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        for rec in records {
            let body = encode_record(rec);
            writer.write_all(&(body.len() as u32).to_le_bytes())?;
            writer.write_all(&body)?;
            writer.write_all(&CRC.checksum(&body).to_le_bytes())?;
        }
        writer.flush()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn encode_record(rec: &Record) -> Vec<u8> {
    let ((type_name, key), state) = rec;
    let mut buf = Vec::with_capacity(type_name.len() + key.len() + 24);
    buf.extend_from_slice(&(type_name.len() as u32).to_le_bytes());
    buf.extend_from_slice(type_name.as_bytes());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(&state.tokens.to_le_bytes());
    buf.extend_from_slice(&state.last_drip.to_le_bytes());
    buf
}

fn decode_record(body: &[u8]) -> CrateResult<Record> {
    let mut pos = 0usize;
    let type_name = read_string(body, &mut pos)?;
    let key = read_string(body, &mut pos)?;
    let tokens = f64::from_le_bytes(read_bytes::<8>(body, &mut pos)?);
    let last_drip = u64::from_le_bytes(read_bytes::<8>(body, &mut pos)?);
    Ok((
        (type_name, key),
        BucketState {
            tokens,
            last_drip,
            before_drop: None,
        },
    ))
}

fn read_bytes<const N: usize>(body: &[u8], pos: &mut usize) -> CrateResult<[u8; N]> {
    let end = *pos + N;
    let slice = body
        .get(*pos..end)
        .ok_or_else(|| Error::StoreFatal("truncated store record body".into()))?;
    *pos = end;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

fn read_string(body: &[u8], pos: &mut usize) -> CrateResult<String> {
    let len = u32::from_le_bytes(read_bytes::<4>(body, pos)?) as usize;
    let end = *pos + len;
    let slice = body
        .get(*pos..end)
        .ok_or_else(|| Error::StoreFatal("truncated store record string".into()))?;
    *pos = end;
    String::from_utf8(slice.to_vec())
        .map_err(|e| Error::StoreFatal(format!("invalid utf-8 in store record: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_shim::tmp_path;

    mod tempfile_shim {
        use std::path::PathBuf;
        pub fn tmp_path(name: &str) -> PathBuf {
            let mut p = std::env::temp_dir();
            p.push(format!("ratelimitd-test-{}-{}", std::process::id(), name));
            p
        }
    }

    #[test]
    fn flush_then_preload_round_trips() {
        let path = tmp_path("flush-roundtrip.bin");
        let _ = std::fs::remove_file(&path);
        let records: Vec<Record> = vec![
            (
                ("ip".to_string(), "1.2.3.4".to_string()),
                BucketState {
                    tokens: 3.5,
                    last_drip: 1000,
                    before_drop: None,
                },
            ),
            (
                ("ip".to_string(), "5.6.7.8".to_string()),
                BucketState {
                    tokens: 10.0,
                    last_drip: 2000,
                    before_drop: None,
                },
            ),
        ];
        flush(&path, &records).unwrap();
        let loaded = preload(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded
            .iter()
            .any(|(k, s)| k.1 == "1.2.3.4" && s.tokens == 3.5 && s.last_drip == 1000));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_preloads_empty() {
        let path = tmp_path("does-not-exist.bin");
        let _ = std::fs::remove_file(&path);
        assert!(preload(&path).unwrap().is_empty());
    }

    #[test]
    fn corrupted_checksum_is_fatal() {
        let path = tmp_path("corrupt.bin");
        let records: Vec<Record> = vec![(
            ("ip".to_string(), "k".to_string()),
            BucketState {
                tokens: 1.0,
                last_drip: 0,
                before_drop: None,
            },
        )];
        flush(&path, &records).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(preload(&path), Err(Error::StoreFatal(_))));
        let _ = std::fs::remove_file(&path);
    }
}
