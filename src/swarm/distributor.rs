// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{sync::Arc, time::SystemTime};

use futures::{StreamExt as _, stream};
use human_repr::HumanCount as _;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DownloadProgress, ProgressEvent, ReplicationProvider, Swarm};
use crate::address::ArchiveAddress;
use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::store::{ArchiveHandle, ContentStore};
use crate::utils::{RetryConfig, retry};

/// Default bound on entries downloaded at the same time.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, smart_default::SmartDefault)]
#[serde(default)]
pub struct DownloadConfig {
    #[default(DEFAULT_DOWNLOAD_CONCURRENCY)]
    pub concurrency: usize,
}

impl DownloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Configuration(
                "download concurrency must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// The swarm channel a [`Distributor`] is currently joined on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub address: ArchiveAddress,
    pub joined_at: SystemTime,
}

#[derive(Debug)]
pub struct MissingEntry {
    pub index: usize,
    pub path: String,
    pub error: anyhow::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Every entry is present locally.
    Complete,
    /// Some entries could not be downloaded, see [`DownloadReport::missing`].
    Partial,
}

/// Outcome of [`Distributor::download`].
#[derive(Debug)]
pub struct DownloadReport {
    pub address: ArchiveAddress,
    pub entries: usize,
    /// Unset when the size of some entry could not be fetched.
    pub total_bytes: Option<u64>,
    pub bytes_received: u64,
    /// Indices of the entries present locally, ascending.
    pub downloaded: Vec<usize>,
    pub missing: Vec<MissingEntry>,
    /// [`Error::MetadataFetch`] for every entry whose size was not known up
    /// front. These only degrade progress reporting.
    pub metadata_errors: Vec<Error>,
}

impl DownloadReport {
    pub fn status(&self) -> DownloadStatus {
        match self.missing.is_empty() {
            true => DownloadStatus::Complete,
            false => DownloadStatus::Partial,
        }
    }
}

/// Binds archives to swarm membership and pulls remote archives into the
/// local store.
///
/// A distributor is joined on at most one address at a time. Membership
/// transitions hold an async mutex, so a leave and the following join never
/// interleave with another transition on the same distributor.
pub struct Distributor<S: ContentStore, W: Swarm> {
    store: Arc<S>,
    swarm: Arc<W>,
    membership: Mutex<Option<Membership>>,
    config: DownloadConfig,
    retry: RetryConfig,
    progress_listener: Option<flume::Sender<ProgressEvent>>,
}

impl<S: ContentStore, W: Swarm> Distributor<S, W> {
    pub fn new(store: Arc<S>, swarm: Arc<W>) -> Self {
        Self {
            store,
            swarm,
            membership: Mutex::new(None),
            config: DownloadConfig::default(),
            retry: RetryConfig::default(),
            progress_listener: None,
        }
    }

    pub fn with_config(mut self, config: DownloadConfig, retry: RetryConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        self.retry = retry;
        Ok(self)
    }

    /// Every reported progress ratio is also sent to `listener`.
    pub fn with_progress_listener(mut self, listener: flume::Sender<ProgressEvent>) -> Self {
        self.progress_listener = Some(listener);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn membership(&self) -> Option<Membership> {
        *self.membership.lock().await
    }

    /// Makes `archive` available to the swarm, leaving the previous channel
    /// first.
    pub async fn advertise(&self, archive: &Archive<S::Handle>) -> Result<ArchiveAddress> {
        self.join(archive.address(), archive.handle().clone()).await
    }

    async fn join(&self, address: ArchiveAddress, handle: Arc<S::Handle>) -> Result<ArchiveAddress> {
        let mut membership = self.membership.lock().await;
        if let Some(current) = *membership {
            let previous = current.address;
            retry(&self.retry, "leaving swarm", || self.swarm.leave(&previous))
                .await
                .map_err(Error::Transport)?;
            info!(%previous, "Left swarm");
            *membership = None;
        }
        let provider: ReplicationProvider = Arc::new(move || handle.replicate());
        retry(&self.retry, "joining swarm", || {
            self.swarm.join(&address, provider.clone())
        })
        .await
        .map_err(Error::Transport)?;
        *membership = Some(Membership {
            address,
            joined_at: SystemTime::now(),
        });
        info!(%address, "Joined swarm");
        Ok(address)
    }

    /// Leaves the current swarm channel. Returns the address that was left.
    pub async fn leave(&self) -> Result<Option<ArchiveAddress>> {
        let mut membership = self.membership.lock().await;
        let Some(current) = *membership else {
            return Ok(None);
        };
        retry(&self.retry, "leaving swarm", || {
            self.swarm.leave(&current.address)
        })
        .await
        .map_err(Error::Transport)?;
        *membership = None;
        info!(address = %current.address, "Left swarm");
        Ok(Some(current.address))
    }

    async fn leave_if_joined(&self, address: &ArchiveAddress) -> Result<()> {
        let mut membership = self.membership.lock().await;
        if membership.is_some_and(|m| &m.address == address) {
            retry(&self.retry, "leaving swarm", || self.swarm.leave(address))
                .await
                .map_err(Error::Transport)?;
            *membership = None;
            info!(%address, "Left swarm");
        }
        Ok(())
    }

    /// Joins the swarm for `address` and pulls every entry into the local
    /// store.
    ///
    /// Failing to open, join or list the archive is fatal. Entries that still
    /// fail after retrying are reported as missing. On cancellation the swarm
    /// channel is left and everything written so far is discarded.
    pub async fn download(
        &self,
        address: &ArchiveAddress,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        let handle = Arc::new(
            self.store
                .open_archive(address)
                .await
                .map_err(Error::Store)?,
        );
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.fetch(*address, &handle) => Some(result),
        };
        match outcome {
            Some(result) => result,
            None => {
                warn!(%address, "Download cancelled");
                if let Err(e) = self.leave_if_joined(address).await {
                    warn!("failed to leave swarm after cancellation: {e}");
                }
                if let Err(e) = handle.discard().await {
                    warn!("failed to discard partial download: {e:#}");
                }
                Err(Error::Cancelled)
            }
        }
    }

    async fn fetch(
        &self,
        address: ArchiveAddress,
        handle: &Arc<S::Handle>,
    ) -> Result<DownloadReport> {
        self.join(address, handle.clone()).await?;
        let chunks = handle.subscribe_downloads();
        let handle = handle.as_ref();

        let entries = retry(&self.retry, "listing archive entries", move || handle.list())
            .await
            .map_err(Error::Transport)?;

        let progress = DownloadProgress::new(self.progress_listener.clone());
        let (total_bytes, metadata_errors) = self.fetch_total(handle, entries.len()).await;
        match total_bytes {
            Some(total) => {
                progress.set_total(total);
                info!(
                    %address,
                    "Downloading {} entries ({})",
                    entries.len(),
                    total.human_count_bytes()
                );
                progress.record(0);
            }
            None => info!(%address, "Downloading {} entries", entries.len()),
        }

        let done = CancellationToken::new();
        let downloads = async {
            let results = stream::iter(0..entries.len())
                .map(|index| async move {
                    let what = format!("downloading entry {index}");
                    let result = retry(&self.retry, &what, move || handle.download(index)).await;
                    (index, result)
                })
                .buffer_unordered(self.config.concurrency)
                .collect::<Vec<_>>()
                .await;
            done.cancel();
            results
        };
        let track = async {
            loop {
                tokio::select! {
                    chunk = chunks.recv_async() => match chunk {
                        Ok(len) => {
                            progress.record(len);
                        }
                        Err(_) => break,
                    },
                    _ = done.cancelled() => break,
                }
            }
            // chunks that arrived after the last download finished
            for len in chunks.try_iter() {
                progress.record(len);
            }
        };
        let (mut results, ()) = tokio::join!(downloads, track);

        results.sort_by_key(|(index, _)| *index);
        let mut downloaded = vec![];
        let mut missing = vec![];
        for (index, result) in results {
            match result {
                Ok(()) => downloaded.push(index),
                Err(error) => {
                    let path = entries[index].path.clone();
                    warn!("Entry {index} ({path}) is missing: {error:#}");
                    missing.push(MissingEntry { index, path, error });
                }
            }
        }
        let report = DownloadReport {
            address,
            entries: entries.len(),
            total_bytes,
            bytes_received: progress.bytes_received(),
            downloaded,
            missing,
            metadata_errors,
        };
        info!(
            %address,
            "Download finished: {}/{} entries, {} received",
            report.downloaded.len(),
            report.entries,
            report.bytes_received.human_count_bytes()
        );
        Ok(report)
    }

    /// Sums the size of every entry. Any entry whose metadata cannot be
    /// fetched leaves the total unset.
    async fn fetch_total(&self, handle: &S::Handle, count: usize) -> (Option<u64>, Vec<Error>) {
        let sizes = stream::iter(0..count)
            .map(|index| async move {
                let what = format!("fetching metadata of entry {index}");
                retry(&self.retry, &what, move || handle.get(index))
                    .await
                    .map(|entry| {
                        debug!("Entry {index}: {} ({})", entry.path, entry.size.human_count_bytes());
                        entry.size
                    })
                    .map_err(|source| Error::MetadataFetch { index, source })
            })
            .buffered(self.config.concurrency)
            .collect::<Vec<_>>()
            .await;
        let mut total = 0u64;
        let mut errors = vec![];
        for size in sizes {
            match size {
                Ok(size) => total += size,
                Err(e) => {
                    warn!("{e}");
                    errors.push(e);
                }
            }
        }
        match errors.is_empty() {
            true => (Some(total), errors),
            false => (None, errors),
        }
    }
}
