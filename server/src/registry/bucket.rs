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

//! The bucket-type routing table: name -> [`BucketType`], swapped atomically.

use crate::util::error::{CrateResult, Error};
use parking_lot::RwLock;
use regex::Regex;
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideConfig {
    pub key: Option<String>,
    #[serde(rename = "match")]
    pub pattern: Option<String>,
    pub size: u64,
    pub per_interval: u64,
    pub interval: u64,
}

#[derive(Debug, Clone)]
pub struct Override {
    key: Option<String>,
    pattern: Option<Arc<Regex>>,
    pub size: u64,
    pub per_interval: u64,
    pub interval: u64,
}

impl Override {
    fn compile(cfg: OverrideConfig) -> CrateResult<Self> {
        validate_rates(cfg.size, cfg.per_interval, cfg.interval)?;
        let pattern = match cfg.pattern {
            Some(ref p) => Some(Arc::new(Regex::new(p).map_err(|e| {
                Error::Config(format!("invalid override match pattern {:?}: {}", p, e))
            })?)),
            None => None,
        };
        if cfg.key.is_none() && pattern.is_none() {
            return Err(Error::Config(
                "override must specify either `key` or `match`".into(),
            ));
        }
        Ok(Self {
            key: cfg.key,
            pattern,
            size: cfg.size,
            per_interval: cfg.per_interval,
            interval: cfg.interval,
        })
    }

    /// True if this override's literal `key` equals `key`.
    fn matches_exact(&self, key: &str) -> bool {
        self.key.as_deref() == Some(key)
    }

    /// True if this override's pattern matches `key`. Does not consider `key`.
    fn matches_pattern(&self, key: &str) -> bool {
        match &self.pattern {
            Some(re) => re.is_match(key),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketTypeConfig {
    pub size: u64,
    pub per_interval: u64,
    pub interval: u64,
    #[serde(default)]
    pub unlimited: bool,
    #[serde(default)]
    pub overrides: Vec<OverrideConfig>,
}

#[derive(Debug, Clone)]
pub struct BucketType {
    pub name: String,
    pub size: u64,
    pub per_interval: u64,
    pub interval: u64,
    pub unlimited: bool,
    overrides: Vec<Override>,
}

impl BucketType {
    pub fn compile(name: String, cfg: BucketTypeConfig) -> CrateResult<Self> {
        if name.is_empty() {
            return Err(Error::Config("bucket type name must not be empty".into()));
        }
        validate_rates(cfg.size, cfg.per_interval, cfg.interval)?;
        let overrides = cfg
            .overrides
            .into_iter()
            .map(Override::compile)
            .collect::<CrateResult<Vec<_>>>()?;
        Ok(Self {
            name,
            size: cfg.size,
            per_interval: cfg.per_interval,
            interval: cfg.interval,
            unlimited: cfg.unlimited,
            overrides,
        })
    }

    /// Effective `(size, per_interval, interval)` for `key`. An exact `key` match
    /// anywhere in the list wins over every pattern match, regardless of which was
    /// declared first; among exact matches, and separately among pattern matches,
    /// the first in list order wins.
    pub fn effective(&self, key: &str) -> (u64, u64, u64) {
        if let Some(ov) = self.overrides.iter().find(|ov| ov.matches_exact(key)) {
            return (ov.size, ov.per_interval, ov.interval);
        }
        if let Some(ov) = self.overrides.iter().find(|ov| ov.matches_pattern(key)) {
            return (ov.size, ov.per_interval, ov.interval);
        }
        (self.size, self.per_interval, self.interval)
    }
}

fn validate_rates(size: u64, per_interval: u64, interval: u64) -> CrateResult<()> {
    if size < 1 || per_interval < 1 || interval < 1 {
        return Err(Error::Config(format!(
            "invalid bucket rates: size={size} per_interval={per_interval} interval={interval} (all must be >= 1)"
        )));
    }
    Ok(())
}

pub type BucketMap = HashMap<String, Arc<BucketType>>;

/// Atomically-swappable bucket-type routing table.
///
/// Readers take a `snapshot()` (one `Arc` clone) at dispatch time and work against it for
/// the lifetime of the request; a concurrent `replace()` never leaves a reader observing
/// a mix of old and new entries, and a reader holding an old snapshot keeps it alive even
/// after the table moves on.
pub struct Registry {
    current: RwLock<Arc<BucketMap>>,
}

impl Registry {
    pub fn new(map: BucketMap) -> Self {
        Self {
            current: RwLock::new(Arc::new(map)),
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    pub fn snapshot(&self) -> Arc<BucketMap> {
        self.current.read().clone()
    }

    /// Compile and validate every entry, then publish as a single unit. On any failure
    /// the previously published table is left untouched.
    pub fn replace(&self, configs: HashMap<String, BucketTypeConfig>) -> CrateResult<()> {
        let mut compiled = BucketMap::with_capacity(configs.len());
        for (name, cfg) in configs {
            let bt = BucketType::compile(name.clone(), cfg)?;
            compiled.insert(name, Arc::new(bt));
        }
        *self.current.write() = Arc::new(compiled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(size: u64, per_interval: u64, interval: u64) -> BucketTypeConfig {
        BucketTypeConfig {
            size,
            per_interval,
            interval,
            unlimited: false,
            overrides: vec![],
        }
    }

    #[test]
    fn replace_rejects_invalid_and_keeps_previous() {
        let reg = Registry::empty();
        let mut good = HashMap::new();
        good.insert("ip".to_string(), cfg(10, 10, 1000));
        reg.replace(good).unwrap();
        assert!(reg.snapshot().contains_key("ip"));

        let mut bad = HashMap::new();
        bad.insert("broken".to_string(), cfg(0, 10, 1000));
        assert!(reg.replace(bad).is_err());
        // previous table retained in full
        let snap = reg.snapshot();
        assert!(snap.contains_key("ip"));
        assert!(!snap.contains_key("broken"));
    }

    #[test]
    fn override_exact_key_beats_pattern_regardless_of_order() {
        let mut cfg = cfg(10, 10, 1000);
        cfg.overrides.push(OverrideConfig {
            key: None,
            pattern: Some("^10\\.".to_string()),
            size: 100,
            per_interval: 100,
            interval: 1000,
        });
        cfg.overrides.push(OverrideConfig {
            key: Some("10.0.0.1".to_string()),
            pattern: None,
            size: 5,
            per_interval: 5,
            interval: 1000,
        });
        let bt = BucketType::compile("ip".to_string(), cfg).unwrap();
        assert_eq!(bt.effective("10.0.0.1"), (5, 5, 1000));
        assert_eq!(bt.effective("10.0.0.2"), (100, 100, 1000));
        assert_eq!(bt.effective("8.8.8.8"), (10, 10, 1000));
    }

    #[test]
    fn invalid_regex_fails_compilation() {
        let mut cfg = cfg(10, 10, 1000);
        cfg.overrides.push(OverrideConfig {
            key: None,
            pattern: Some("(".to_string()),
            size: 1,
            per_interval: 1,
            interval: 1,
        });
        assert!(BucketType::compile("ip".to_string(), cfg).is_err());
    }
}
