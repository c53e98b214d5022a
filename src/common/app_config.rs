// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Responsibilities:
//! - Load the optional engine-tuning config once per process, from
//!   `$MILLRACE_CONFIG` or `./millrace.toml`.
//! - Every field has a default; a missing file is not an error for callers
//!   going through the `config::*` accessors.
//!
//! Addresses and peer sets never live here: those are passed explicitly to
//! the broker by the caller.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<MillraceConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static MillraceConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = MillraceConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static MillraceConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = MillraceConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static MillraceConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("MILLRACE_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("millrace.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $MILLRACE_CONFIG or create ./millrace.toml"
    ))
}

#[derive(Debug, Clone, Deserialize)]
pub struct MillraceConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "millrace=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl MillraceConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: MillraceConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for MillraceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Delay between writing a terminal error marker and closing the
    /// connection carrying it, so the marker wins the race with the close.
    #[serde(default = "default_exchange_close_grace_ms")]
    pub exchange_close_grace_ms: u64,

    /// Capacity of the in-process relay standing in for a self-connection.
    #[serde(default = "default_relay_buffer_batches")]
    pub relay_buffer_batches: usize,

    /// How often a parked rendezvous wait rechecks the cancel token.
    #[serde(default = "default_connect_poll_ms")]
    pub connect_poll_ms: u64,

    /// Virtual nodes per peer on the partition hash ring.
    #[serde(default = "default_hash_ring_vnodes")]
    pub hash_ring_vnodes: usize,
}

fn default_exchange_close_grace_ms() -> u64 {
    100
}

fn default_relay_buffer_batches() -> usize {
    8
}

fn default_connect_poll_ms() -> u64 {
    100
}

fn default_hash_ring_vnodes() -> usize {
    16
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            exchange_close_grace_ms: default_exchange_close_grace_ms(),
            relay_buffer_batches: default_relay_buffer_batches(),
            connect_poll_ms: default_connect_poll_ms(),
            hash_ring_vnodes: default_hash_ring_vnodes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MillraceConfig;

    #[test]
    fn test_runtime_defaults() {
        let cfg: MillraceConfig = toml::from_str(
            r#"
[runtime]
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.runtime.exchange_close_grace_ms, 100);
        assert_eq!(cfg.runtime.relay_buffer_batches, 8);
        assert_eq!(cfg.runtime.hash_ring_vnodes, 16);
    }

    #[test]
    fn test_runtime_overrides() {
        let cfg: MillraceConfig = toml::from_str(
            r#"
log_level = "debug"

[runtime]
exchange_close_grace_ms = 250
hash_ring_vnodes = 64
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.runtime.exchange_close_grace_ms, 250);
        assert_eq!(cfg.runtime.hash_ring_vnodes, 64);
        assert_eq!(cfg.runtime.connect_poll_ms, 100);
    }
}
