// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Recursive directory traversal under a [`ScanPolicy`].
//!
//! Children of a directory are sorted by name, filtered, then stat'ed with
//! bounded concurrency. Results come out depth-first in that sorted order, so
//! the same tree always yields the same sequence regardless of how the stat
//! calls complete.

use std::{
    fmt,
    fs::Metadata,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::{
    Future, StreamExt as _, TryStreamExt as _,
    future::ready,
    stream::{self, BoxStream},
};
use tracing::warn;

use crate::error::{Error, Result};

/// Default bound on in-flight `stat` calls per directory.
pub const DEFAULT_SCAN_CONCURRENCY: usize = 16;

/// Predicate over a child's file name. Returning `Ok(false)` drops the child,
/// returning `Err` aborts the scan.
pub type Filter = Arc<dyn Fn(&str) -> anyhow::Result<bool> + Send + Sync>;

#[derive(Clone)]
pub struct ScanPolicy {
    /// `None` means unbounded.
    pub max_depth: Option<usize>,
    pub filters: Vec<Filter>,
    pub concurrency: usize,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            max_depth: None,
            filters: vec![],
            concurrency: DEFAULT_SCAN_CONCURRENCY,
        }
    }
}

impl fmt::Debug for ScanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanPolicy")
            .field("max_depth", &self.max_depth)
            .field("filters", &self.filters.len())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl ScanPolicy {
    pub fn max_depth(mut self, max_depth: impl Into<Option<usize>>) -> Self {
        self.max_depth = max_depth.into();
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Appends an infallible filter.
    pub fn filter(self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.try_filter(move |name| Ok(f(name)))
    }

    /// Appends a filter that may fail.
    pub fn try_filter(
        mut self,
        f: impl Fn(&str) -> anyhow::Result<bool> + Send + Sync + 'static,
    ) -> Self {
        self.filters.push(Arc::new(f));
        self
    }

    /// Applies every filter in order, stopping at the first rejection.
    fn accepts(&self, name: &str) -> Result<bool> {
        for filter in &self.filters {
            if !filter(name).map_err(Error::Filter)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn descends_into(&self, depth: usize) -> bool {
        self.max_depth.is_none_or(|max| depth <= max)
    }
}

#[derive(Debug)]
pub enum ScanResult {
    File { path: PathBuf, metadata: Metadata },
    /// A directory deeper than [`ScanPolicy::max_depth`], reported without
    /// being listed.
    TruncatedDirectory { path: PathBuf },
}

impl ScanResult {
    pub fn path(&self) -> &Path {
        match self {
            ScanResult::File { path, .. } | ScanResult::TruncatedDirectory { path } => path,
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, ScanResult::TruncatedDirectory { .. })
    }
}

/// Collected output of [`scan_all`].
#[derive(Debug)]
pub struct Scan {
    pub root: PathBuf,
    pub results: Vec<ScanResult>,
}

impl Scan {
    /// Every emitted path in emission order, followed by the traversal root.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.results
            .iter()
            .map(|r| r.path().to_path_buf())
            .chain(std::iter::once(self.root.clone()))
            .collect()
    }
}

/// Lazily walks `root`. Nothing touches the filesystem until the stream is
/// polled.
pub fn scan(root: impl Into<PathBuf>, policy: ScanPolicy) -> BoxStream<'static, Result<ScanResult>> {
    walk(Arc::new(policy), root.into(), 0)
}

pub async fn scan_all(root: impl Into<PathBuf>, policy: ScanPolicy) -> Result<Scan> {
    let root = root.into();
    let results = scan(root.clone(), policy).try_collect().await?;
    Ok(Scan { root, results })
}

/// `depth` is the number of separators between the traversal root and `dir`.
fn walk(
    policy: Arc<ScanPolicy>,
    dir: PathBuf,
    depth: usize,
) -> BoxStream<'static, Result<ScanResult>> {
    let concurrency = policy.concurrency.max(1);
    stream::once(read_children(policy.clone(), dir))
        .map_ok(move |children| {
            let policy = policy.clone();
            stream::iter(children)
                .map(stat_child)
                .buffered(concurrency)
                .map_ok(move |(path, metadata)| expand(&policy, path, metadata, depth + 1))
                .try_flatten()
        })
        .try_flatten()
        .boxed()
}

async fn read_children(policy: Arc<ScanPolicy>, dir: PathBuf) -> Result<Vec<PathBuf>> {
    let fs_err = |source| Error::filesystem(&dir, source);
    let mut entries = tokio::fs::read_dir(&dir).await.map_err(fs_err)?;
    let mut names = vec![];
    while let Some(entry) = entries.next_entry().await.map_err(fs_err)? {
        names.push(entry.file_name());
    }
    names.sort();

    let mut children = Vec::with_capacity(names.len());
    for name in names {
        if policy.accepts(&name.to_string_lossy())? {
            children.push(dir.join(name));
        }
    }
    Ok(children)
}

fn stat_child(path: PathBuf) -> impl Future<Output = Result<(PathBuf, Metadata)>> {
    async move {
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok((path, metadata)),
            Err(source) => Err(Error::filesystem(path, source)),
        }
    }
}

fn expand(
    policy: &Arc<ScanPolicy>,
    path: PathBuf,
    metadata: Metadata,
    depth: usize,
) -> BoxStream<'static, Result<ScanResult>> {
    if !metadata.is_dir() {
        return stream::once(ready(Ok(ScanResult::File { path, metadata }))).boxed();
    }
    if policy.descends_into(depth) {
        return walk(policy.clone(), path, depth);
    }
    warn!(
        "MaxDepth ({}) reached on {}, not descending",
        policy.max_depth.unwrap_or_default(),
        path.display()
    );
    stream::once(ready(Ok(ScanResult::TruncatedDirectory { path }))).boxed()
}
