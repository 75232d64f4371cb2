// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{future::Future, time::Duration};

use backon::{ExponentialBuilder, Retryable as _};
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::warn;

/// Bounded exponential backoff for transport and metadata operations.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, smart_default::SmartDefault)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[default(5)]
    pub max_retries: usize,
    #[default(Duration::from_millis(200))]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_delay: Duration,
    #[default(Duration::from_secs(5))]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay.max(self.min_delay))
            .with_max_times(self.max_retries)
    }
}

/// Keeps running the future created by `make_fut` until it succeeds or the
/// retry budget in `config` is spent, returning the last error.
pub async fn retry<F, Fut, T>(
    config: &RetryConfig,
    what: &str,
    make_fut: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    make_fut
        .retry(config.backoff())
        .sleep(tokio::time::sleep)
        .notify(|err: &anyhow::Error, after: Duration| {
            warn!("retrying {what} in {after:?} after {err:#}");
        })
        .await
}
