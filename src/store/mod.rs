// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Interfaces to the content-addressed store that holds archive entries.
//!
//! The archiver and the distributor only talk to [`ContentStore`] and
//! [`ArchiveHandle`]; [`FileStore`] is the filesystem-backed implementation.

mod file;
mod replication;

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::address::{ArchiveAddress, ContentDigest, Hasher};
use crate::error::Error;

pub use file::{FileArchive, FileStore, StoreConfig};
pub use replication::{PeerSet, Replica, ReplicationStream};

/// Size of the blocks entries are replicated in.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// One logical file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryDescriptor {
    /// `/`-separated, relative to the store root.
    pub path: String,
    pub size: u64,
    pub digest: ContentDigest,
}

impl EntryDescriptor {
    /// Location of the entry's bytes under `root`.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        self.path.split('/').fold(root.to_path_buf(), |p, c| p.join(c))
    }
}

/// Ordered entry list of a finalized archive. Its hash is the archive address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<EntryDescriptor>,
}

impl Manifest {
    pub fn address(&self) -> ArchiveAddress {
        let mut hasher = Hasher::default();
        hasher.update(&(self.entries.len() as u64).to_le_bytes());
        for entry in &self.entries {
            hasher
                .update(&(entry.path.len() as u64).to_le_bytes())
                .update(entry.path.as_bytes())
                .update(&entry.size.to_le_bytes())
                .update(entry.digest.as_bytes());
        }
        ArchiveAddress::new(hasher.finalize())
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Checks a manifest received from a peer against the address it was
    /// requested under.
    pub fn verify(&self, address: &ArchiveAddress) -> Result<(), Error> {
        for entry in &self.entries {
            validate_entry_path(&entry.path)?;
        }
        let actual = self.address();
        if &actual != address {
            return Err(Error::Integrity {
                what: "archive manifest".into(),
                expected: address.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

/// Entry paths are relative, `/`-separated and never leave the root.
pub fn validate_entry_path(path: &str) -> Result<(), Error> {
    let invalid = || Error::InvalidEntryPath(path.to_owned());
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return Err(invalid());
    }
    for component in path.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Turns `path` (which must live under `root`) into an entry path.
pub fn entry_path(root: &Path, path: &Path) -> Result<String, Error> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Error::InvalidEntryPath(path.display().to_string()))?;
    let mut parts = vec![];
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| Error::InvalidEntryPath(path.display().to_string()))?,
            ),
            _ => return Err(Error::InvalidEntryPath(path.display().to_string())),
        }
    }
    let joined = parts.join("/");
    validate_entry_path(&joined)?;
    Ok(joined)
}

/// A content store that creates and opens archives.
#[async_trait]
pub trait ContentStore: Send + Sync {
    type Handle: ArchiveHandle + 'static;

    /// Directory every entry path is relative to.
    fn root(&self) -> &Path;

    /// Files under the root that belong to the store itself, such as
    /// in-flight transfers, and must not be archived.
    fn is_reserved(&self, _path: &Path) -> bool {
        false
    }

    /// Starts a new, empty archive.
    async fn create_archive(&self) -> anyhow::Result<Self::Handle>;

    /// Opens an existing archive by address without creating content. The
    /// entries become known once a local copy or a peer provides them.
    async fn open_archive(&self, address: &ArchiveAddress) -> anyhow::Result<Self::Handle>;
}

/// A single archive, either being built or finalized.
#[async_trait]
pub trait ArchiveHandle: Send + Sync {
    /// Set once finalized, or from the start when opened by address.
    fn address(&self) -> Option<ArchiveAddress>;

    fn is_finalized(&self) -> bool;

    /// Appends the file already stored at `root/relative_path`.
    async fn append(&self, relative_path: &str) -> anyhow::Result<EntryDescriptor>;

    /// Streams `reader` into a new entry named `name`.
    async fn write_entry(
        &self,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> anyhow::Result<EntryDescriptor>;

    /// Seals the append sequence and assigns the address.
    async fn finalize(&self) -> anyhow::Result<ArchiveAddress>;

    async fn list(&self) -> anyhow::Result<Vec<EntryDescriptor>>;

    async fn get(&self, index: usize) -> anyhow::Result<EntryDescriptor>;

    /// Materializes the content of entry `index` locally.
    async fn download(&self, index: usize) -> anyhow::Result<()>;

    /// Feed of chunk sizes received by [`ArchiveHandle::download`].
    fn subscribe_downloads(&self) -> flume::Receiver<u64>;

    /// Replication stream for one connected peer.
    fn replicate(&self) -> ReplicationStream;

    /// Removes everything this handle wrote. Files appended in place are
    /// left alone.
    async fn discard(&self) -> anyhow::Result<()>;
}
