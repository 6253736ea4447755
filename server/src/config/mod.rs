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

//! Configuration lifecycle: merges CLI flags, an optional YAML file, and the
//! `LOG_LEVEL` environment variable into one validated [`ConfigurationSet`].
//! Ascending precedence: defaults < YAML file < CLI flags (`LOG_LEVEL` is
//! logging-only and doesn't participate in this ladder).

use crate::registry::bucket::{BucketType, BucketTypeConfig};
use crate::util::error::{CrateResult, Error};
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolDialect {
    BinarySchema,
    TaggedJson,
}

impl ProtocolDialect {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "binary-schema" => Some(Self::BinarySchema),
            "tagged-json" => Some(Self::TaggedJson),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    port: Option<u16>,
    hostname: Option<String>,
    db: Option<String>,
    log_level: Option<String>,
    protocol: Option<String>,
    #[serde(default)]
    buckets: HashMap<String, BucketTypeConfig>,
    #[serde(rename = "remoteConfigURI")]
    remote_config_uri: Option<String>,
    #[serde(rename = "remoteConfigInterval")]
    remote_config_interval: Option<u64>,
}

/// The fully merged and validated configuration for one run of the server.
pub struct ConfigurationSet {
    pub port: u16,
    pub hostname: String,
    pub db: PathBuf,
    pub log_level: String,
    pub protocol: ProtocolDialect,
    pub buckets: HashMap<String, BucketTypeConfig>,
    pub remote_config_uri: Option<String>,
    pub remote_config_interval_ms: u64,
    /// `--profile`: accepted for compatibility, intentionally a no-op (no CPU
    /// profiler is implemented; see the purpose/scope notes).
    pub profile: bool,
}

/// Hand-rolled CLI flag parser. Accepts `--flag value` and `--flag=value` for
/// valued flags, and bare `--profile` for the one boolean flag.
#[derive(Debug, Default)]
pub struct CliArgs {
    pub db: Option<String>,
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub config_file: Option<String>,
    pub protocol: Option<String>,
    pub profile: bool,
}

impl CliArgs {
    pub fn parse<I: Iterator<Item = String>>(mut args: I) -> CrateResult<Self> {
        let mut out = Self::default();
        while let Some(arg) = args.next() {
            let (flag, inline_value) = match arg.split_once('=') {
                Some((f, v)) => (f.to_string(), Some(v.to_string())),
                None => (arg, None),
            };
            let mut value = || -> CrateResult<String> {
                if let Some(v) = &inline_value {
                    return Ok(v.clone());
                }
                args.next()
                    .ok_or_else(|| Error::Config(format!("flag `{flag}` expects a value")))
            };
            match flag.as_str() {
                "--db" => out.db = Some(value()?),
                "--port" => {
                    let v = value()?;
                    out.port = Some(
                        v.parse()
                            .map_err(|_| Error::Config(format!("invalid --port value: {v}")))?,
                    );
                }
                "--hostname" => out.hostname = Some(value()?),
                "--config-file" => out.config_file = Some(value()?),
                "--protocol" => out.protocol = Some(value()?),
                "--profile" => out.profile = true,
                other => return Err(Error::Config(format!("unrecognized flag `{other}`"))),
            }
        }
        Ok(out)
    }
}

/// Loads and validates a complete [`ConfigurationSet`]. A validation failure here is
/// a startup abort (§7: `CONFIG` "at startup, abort"), not a retained-previous-config
/// situation — there is no previous configuration yet.
pub fn load(args: CliArgs) -> CrateResult<ConfigurationSet> {
    let file_cfg = match &args.config_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("reading config file {path}: {e}")))?;
            serde_yaml::from_str::<FileConfig>(&content)?
        }
        None => FileConfig::default(),
    };

    let port = args.port.or(file_cfg.port).unwrap_or(9231);
    let hostname = args
        .hostname
        .or(file_cfg.hostname)
        .unwrap_or_else(|| "0.0.0.0".to_string());
    let db = args
        .db
        .or(file_cfg.db)
        .ok_or_else(|| Error::Config("`--db` (or config file `db`) is required".into()))?;
    let protocol_str = args
        .protocol
        .or(file_cfg.protocol)
        .unwrap_or_else(|| "binary-schema".to_string());
    let protocol = ProtocolDialect::parse(&protocol_str)
        .ok_or_else(|| Error::Config(format!("unknown protocol `{protocol_str}`")))?;
    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or(file_cfg.log_level)
        .unwrap_or_else(|| "info".to_string());

    // validate every bucket type eagerly: a bad entry aborts startup rather than
    // surfacing as a runtime UNKNOWN_BUCKET_TYPE later
    for (name, cfg) in &file_cfg.buckets {
        BucketType::compile(name.clone(), cfg.clone())?;
    }

    Ok(ConfigurationSet {
        port,
        hostname,
        db: PathBuf::from(db),
        log_level,
        protocol,
        buckets: file_cfg.buckets,
        remote_config_uri: file_cfg.remote_config_uri,
        remote_config_interval_ms: file_cfg.remote_config_interval.unwrap_or(60_000),
        profile: args.profile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_flags_in_both_forms() {
        let args = CliArgs::parse(
            vec![
                "--db".to_string(),
                "/tmp/x.db".to_string(),
                "--port=1234".to_string(),
                "--profile".to_string(),
            ]
            .into_iter(),
        )
        .unwrap();
        assert_eq!(args.db.as_deref(), Some("/tmp/x.db"));
        assert_eq!(args.port, Some(1234));
        assert!(args.profile);
    }

    #[test]
    fn missing_db_is_a_config_error() {
        let args = CliArgs::default();
        assert!(matches!(load(args), Err(Error::Config(_))));
    }

    #[test]
    fn unknown_yaml_key_is_rejected() {
        let yaml = "port: 1\nbogus_key: true\n";
        assert!(serde_yaml::from_str::<FileConfig>(yaml).is_err());
    }

    #[test]
    fn invalid_bucket_definition_aborts_load() {
        let mut args = CliArgs::default();
        args.db = Some("/tmp/x.db".to_string());
        let yaml = "db: /tmp/x.db\nbuckets:\n  ip:\n    size: 0\n    per_interval: 1\n    interval: 1\n";
        let dir = std::env::temp_dir().join(format!("ratelimitd-cfg-test-{}.yaml", std::process::id()));
        std::fs::write(&dir, yaml).unwrap();
        args.config_file = Some(dir.to_str().unwrap().to_string());
        assert!(load(args).is_err());
        let _ = std::fs::remove_file(&dir);
    }
}
