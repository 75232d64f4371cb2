// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Building archives from directories and single files.
//!
//! Entries are appended in scan emission order (depth-first, siblings sorted
//! by name), so archiving the same tree twice yields the same address. A
//! build that fails or is cancelled discards everything it wrote; callers
//! only ever see finalized archives.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use futures::TryStreamExt as _;
use human_repr::HumanCount as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address::ArchiveAddress;
use crate::error::{Error, Result};
use crate::scanner::{self, DEFAULT_SCAN_CONCURRENCY, Filter, ScanPolicy, ScanResult};
use crate::store::{ArchiveHandle, ContentStore, EntryDescriptor, entry_path, validate_entry_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Building,
    Finalized,
}

/// What to do with directories past the maximum depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TruncationPolicy {
    /// Leave them out of the archive and log it.
    #[default]
    Skip,
    /// Abort the build with [`Error::DepthExceeded`].
    Fail,
}

#[derive(Clone, Default)]
pub struct ArchiveOptions {
    pub max_depth: Option<usize>,
    pub filters: Vec<Filter>,
    pub on_truncated: TruncationPolicy,
}

impl fmt::Debug for ArchiveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveOptions")
            .field("max_depth", &self.max_depth)
            .field("filters", &self.filters.len())
            .field("on_truncated", &self.on_truncated)
            .finish()
    }
}

impl ArchiveOptions {
    pub fn max_depth(mut self, max_depth: impl Into<Option<usize>>) -> Self {
        self.max_depth = max_depth.into();
        self
    }

    pub fn filter(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.filters.push(Arc::new(move |name| Ok(f(name))));
        self
    }

    pub fn try_filter(
        mut self,
        f: impl Fn(&str) -> anyhow::Result<bool> + Send + Sync + 'static,
    ) -> Self {
        self.filters.push(Arc::new(f));
        self
    }

    pub fn on_truncated(mut self, policy: TruncationPolicy) -> Self {
        self.on_truncated = policy;
        self
    }
}

/// A finalized archive and the store handle backing it.
pub struct Archive<H> {
    handle: Arc<H>,
    address: ArchiveAddress,
    entries: Vec<EntryDescriptor>,
}

impl<H: ArchiveHandle> Archive<H> {
    async fn sealed(handle: Arc<H>, address: ArchiveAddress) -> Result<Self> {
        let entries = handle.list().await.map_err(Error::Store)?;
        Ok(Self {
            handle,
            address,
            entries,
        })
    }

    pub fn address(&self) -> ArchiveAddress {
        self.address
    }

    pub fn entries(&self) -> &[EntryDescriptor] {
        &self.entries
    }

    pub fn state(&self) -> ArchiveState {
        match self.handle.is_finalized() {
            true => ArchiveState::Finalized,
            false => ArchiveState::Building,
        }
    }

    pub fn handle(&self) -> &Arc<H> {
        &self.handle
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

impl<H> fmt::Debug for Archive<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("address", &self.address)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

/// Turns directories and files under the store root into archives.
pub struct Archiver<S> {
    store: Arc<S>,
    scan_concurrency: usize,
}

impl<S: ContentStore> Archiver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            scan_concurrency: DEFAULT_SCAN_CONCURRENCY,
        }
    }

    pub fn with_scan_concurrency(mut self, scan_concurrency: usize) -> Result<Self> {
        if scan_concurrency == 0 {
            return Err(Error::Configuration(
                "scan concurrency must be greater than zero".into(),
            ));
        }
        self.scan_concurrency = scan_concurrency;
        Ok(self)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn root(&self) -> &Path {
        self.store.root()
    }

    /// Resolves `directory` against the store root. The result must stay
    /// inside the root so entry paths can be made relative to it.
    fn resolve(&self, directory: &Path) -> Result<PathBuf> {
        if directory.components().any(|c| c == Component::ParentDir) {
            return Err(Error::Configuration(format!(
                "{} must not contain `..`",
                directory.display()
            )));
        }
        let resolved = self.root().join(directory);
        if !resolved.starts_with(self.root()) {
            return Err(Error::Configuration(format!(
                "{} is outside of the store root {}",
                directory.display(),
                self.root().display()
            )));
        }
        Ok(resolved)
    }

    /// Archives every file under `directory` that passes `options`.
    pub async fn archive(
        &self,
        directory: impl AsRef<Path>,
        options: ArchiveOptions,
        cancel: &CancellationToken,
    ) -> Result<Archive<S::Handle>> {
        let directory = self.resolve(directory.as_ref())?;
        let handle = Arc::new(self.store.create_archive().await.map_err(Error::Store)?);
        let build = self.build(&handle, &directory, options);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = build => Some(result),
        };
        let result = outcome.unwrap_or(Err(Error::Cancelled));
        self.seal_or_discard(handle, result).await
    }

    async fn build(
        &self,
        handle: &S::Handle,
        directory: &Path,
        options: ArchiveOptions,
    ) -> Result<ArchiveAddress> {
        let policy = ScanPolicy {
            max_depth: options.max_depth,
            filters: options.filters,
            concurrency: self.scan_concurrency,
        };
        let mut results = scanner::scan(directory, policy);
        while let Some(result) = results.try_next().await? {
            match result {
                ScanResult::File { path, .. } if self.store.is_reserved(&path) => {
                    debug!("Skipping {}: owned by the store", path.display());
                }
                ScanResult::File { path, metadata } => {
                    let relative = entry_path(self.root(), &path)?;
                    debug!("Appending {relative} ({})", metadata.len().human_count_bytes());
                    handle.append(&relative).await.map_err(into_store_error)?;
                }
                ScanResult::TruncatedDirectory { path } => match options.on_truncated {
                    TruncationPolicy::Skip => {
                        warn!("Skipping {}: maximum depth reached", path.display());
                    }
                    TruncationPolicy::Fail => return Err(Error::DepthExceeded { path }),
                },
            }
        }
        handle.finalize().await.map_err(into_store_error)
    }

    /// Archives a single file as one entry named `identifier`.
    pub async fn archive_solo(
        &self,
        file: impl AsRef<Path>,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<Archive<S::Handle>> {
        validate_entry_path(identifier)?;
        let file = file.as_ref();
        let handle = Arc::new(self.store.create_archive().await.map_err(Error::Store)?);
        let write = async {
            let mut source = tokio::fs::File::open(file)
                .await
                .map_err(|e| Error::filesystem(file, e))?;
            handle
                .write_entry(identifier, &mut source)
                .await
                .map_err(into_store_error)?;
            handle.finalize().await.map_err(into_store_error)
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = write => Some(result),
        };
        let result = outcome.unwrap_or(Err(Error::Cancelled));
        self.seal_or_discard(handle, result).await
    }

    async fn seal_or_discard(
        &self,
        handle: Arc<S::Handle>,
        result: Result<ArchiveAddress>,
    ) -> Result<Archive<S::Handle>> {
        match result {
            Ok(address) => {
                let archive = Archive::sealed(handle, address).await?;
                info!(
                    %address,
                    "Archived {} entries ({})",
                    archive.entries().len(),
                    archive.total_size().human_count_bytes()
                );
                Ok(archive)
            }
            Err(e) => {
                if let Err(discard) = handle.discard().await {
                    warn!("failed to discard partial archive: {discard:#}");
                }
                Err(e)
            }
        }
    }
}

/// Store errors that wrap one of ours are surfaced as-is.
fn into_store_error(e: anyhow::Error) -> Error {
    match e.downcast::<Error>() {
        Ok(e) => e,
        Err(e) => Error::Store(e),
    }
}
