// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::logger::LogConfig;
use crate::scanner::DEFAULT_SCAN_CONCURRENCY;
use crate::store::StoreConfig;
use crate::swarm::DownloadConfig;
use crate::utils::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, smart_default::SmartDefault)]
#[serde(default)]
pub struct ScanConfig {
    /// Bound on in-flight `stat` calls per directory.
    #[default(DEFAULT_SCAN_CONCURRENCY)]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub scan: ScanConfig,
    pub download: DownloadConfig,
    pub retry: RetryConfig,
    pub log: LogConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.store.validate()?;
        if self.scan.concurrency == 0 {
            return Err(Error::Configuration(
                "scan concurrency must be greater than zero".into(),
            ));
        }
        self.download.validate()
    }
}
