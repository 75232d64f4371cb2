// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::info;

/// Ratios are reported in steps of this many percent.
const PROGRESS_STEP: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub ratio: u8,
    pub bytes_received: u64,
    pub total_bytes: u64,
}

/// `floor(received / total * 100)`, capped at 100. `None` while the total is
/// unknown.
pub fn progress_ratio(received: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let ratio = (u128::from(received) * 100 / u128::from(total)).min(100);
    Some(ratio as u8)
}

/// Byte accounting for one download.
///
/// Chunks may be recorded from several tasks at once. Notifications go out
/// for ratios that are a multiple of 20 and strictly above the last one
/// reported, so listeners never see a repeat or a step backwards.
#[derive(Debug, Default)]
pub struct DownloadProgress {
    received: AtomicU64,
    total: AtomicU64,
    last_reported: Mutex<Option<u8>>,
    listener: Option<flume::Sender<ProgressEvent>>,
}

impl DownloadProgress {
    pub fn new(listener: Option<flume::Sender<ProgressEvent>>) -> Self {
        Self {
            listener,
            ..Default::default()
        }
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn total_bytes(&self) -> Option<u64> {
        match self.total.load(Ordering::SeqCst) {
            0 => None,
            total => Some(total),
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    pub fn ratio(&self) -> Option<u8> {
        progress_ratio(self.bytes_received(), self.total.load(Ordering::SeqCst))
    }

    /// Accounts for a received chunk. Returns the ratio if it was reported.
    pub fn record(&self, bytes: u64) -> Option<u8> {
        let received = self.received.fetch_add(bytes, Ordering::SeqCst) + bytes;
        let total = self.total.load(Ordering::SeqCst);
        let ratio = progress_ratio(received, total)?;
        if ratio % PROGRESS_STEP != 0 {
            return None;
        }
        {
            let mut last = self.last_reported.lock();
            if last.is_some_and(|last| last >= ratio) {
                return None;
            }
            *last = Some(ratio);
        }
        info!("Download progress: {ratio}%");
        if let Some(listener) = &self.listener {
            let _ = listener.send(ProgressEvent {
                ratio,
                bytes_received: received,
                total_bytes: total,
            });
        }
        Some(ratio)
    }
}
