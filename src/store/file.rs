// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Filesystem-backed content store.
//!
//! Entry bytes live at `root/<entry path>`: appended files are hashed in
//! place, written and downloaded entries land there through a temporary
//! sibling that is renamed once complete. Finalized manifests are kept in
//! memory and, when `manifest_dir` is set, as `<address>.json` files.

use std::{
    collections::HashSet,
    io::{self, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

use ahash::HashMap;
use anyhow::{Context as _, anyhow, bail};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncSeekExt as _, AsyncWriteExt as _};
use tracing::{debug, warn};

use super::{
    ArchiveHandle, ContentStore, DEFAULT_CHUNK_SIZE, EntryDescriptor, Manifest, PeerSet, Replica,
    ReplicationStream, validate_entry_path,
};
use crate::address::{ArchiveAddress, ContentDigest, Hasher};
use crate::error::Error;

// like `crdownload` for the chrome browser
const DOWNLOAD_EXTENSION: &str = "download";
const PARTIAL_EXTENSION: &str = "partial";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, smart_default::SmartDefault)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory entry paths are relative to.
    pub root: PathBuf,
    /// Replication block size in bytes.
    #[default(DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Where finalized manifests are persisted, relative to `root` unless
    /// absolute. In-memory only when unset.
    pub manifest_dir: Option<PathBuf>,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.root.as_os_str().is_empty() {
            return Err(Error::Configuration("store root must be provided".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Configuration(
                "chunk size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    config: StoreConfig,
    manifests: RwLock<HashMap<ArchiveAddress, Arc<Manifest>>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        Self::with_config(StoreConfig {
            root: root.into(),
            ..Default::default()
        })
    }

    pub fn with_config(config: StoreConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                manifests: Default::default(),
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn manifest_dir(&self) -> Option<PathBuf> {
        let config = &self.inner.config;
        config.manifest_dir.as_ref().map(|dir| config.root.join(dir))
    }

    fn manifest_file(&self, address: &ArchiveAddress) -> Option<PathBuf> {
        self.manifest_dir()
            .map(|dir| dir.join(format!("{address}.json")))
    }

    /// Manifest of an archive finalized or fully listed through this store.
    pub async fn local_manifest(
        &self,
        address: &ArchiveAddress,
    ) -> anyhow::Result<Option<Arc<Manifest>>> {
        if let Some(manifest) = self.inner.manifests.read().get(address) {
            return Ok(Some(manifest.clone()));
        }
        let Some(path) = self.manifest_file(address) else {
            return Ok(None);
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding {}", path.display()))?;
        manifest.verify(address)?;
        let manifest = Arc::new(manifest);
        self.inner
            .manifests
            .write()
            .insert(*address, manifest.clone());
        Ok(Some(manifest))
    }

    async fn remember(&self, manifest: Arc<Manifest>) -> anyhow::Result<()> {
        let address = manifest.address();
        if let Some(path) = self.manifest_file(&address) {
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(&path, serde_json::to_vec_pretty(manifest.as_ref())?)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
        }
        self.inner.manifests.write().insert(address, manifest);
        Ok(())
    }

    async fn forget(&self, address: &ArchiveAddress) {
        self.inner.manifests.write().remove(address);
        if let Some(path) = self.manifest_file(address) {
            remove_if_exists(&path).await;
        }
    }
}

#[async_trait]
impl ContentStore for FileStore {
    type Handle = FileArchive;

    fn root(&self) -> &Path {
        &self.inner.config.root
    }

    fn is_reserved(&self, path: &Path) -> bool {
        let temporary = path
            .extension()
            .is_some_and(|ext| ext == DOWNLOAD_EXTENSION || ext == PARTIAL_EXTENSION);
        temporary || self.manifest_dir().is_some_and(|dir| path.starts_with(dir))
    }

    async fn create_archive(&self) -> anyhow::Result<FileArchive> {
        Ok(FileArchive::new(self.clone(), None, None))
    }

    async fn open_archive(&self, address: &ArchiveAddress) -> anyhow::Result<FileArchive> {
        let local = self.local_manifest(address).await?;
        Ok(FileArchive::new(self.clone(), Some(*address), local))
    }
}

/// Handle on one archive of a [`FileStore`]. Cheap to clone.
#[derive(Clone)]
pub struct FileArchive {
    shared: Arc<ArchiveShared>,
}

struct ArchiveShared {
    store: FileStore,
    state: RwLock<ArchiveState>,
    peers: PeerSet,
    subscribers: Mutex<Vec<flume::Sender<u64>>>,
}

#[derive(Default)]
struct ArchiveState {
    /// Address the archive was opened under.
    expected: Option<ArchiveAddress>,
    sealed: Option<Sealed>,
    /// The sealed manifest was already in the store when the handle opened,
    /// so discarding the handle must not forget it.
    borrowed: bool,
    /// Appended so far, while building.
    entries: Vec<EntryDescriptor>,
    written: Vec<PathBuf>,
    partial: HashSet<PathBuf>,
}

struct Sealed {
    address: ArchiveAddress,
    manifest: Arc<Manifest>,
}

impl FileArchive {
    fn new(
        store: FileStore,
        expected: Option<ArchiveAddress>,
        local: Option<Arc<Manifest>>,
    ) -> Self {
        let mut state = ArchiveState {
            expected,
            ..Default::default()
        };
        if let (Some(address), Some(manifest)) = (expected, local) {
            state.sealed = Some(Sealed { address, manifest });
            state.borrowed = true;
        }
        Self {
            shared: Arc::new(ArchiveShared {
                store,
                state: RwLock::new(state),
                peers: PeerSet::default(),
                subscribers: Default::default(),
            }),
        }
    }

    fn root(&self) -> &Path {
        &self.shared.store.inner.config.root
    }

    fn chunk_size(&self) -> usize {
        self.shared.store.inner.config.chunk_size
    }

    /// Peers this archive is connected to.
    pub fn peers(&self) -> &PeerSet {
        &self.shared.peers
    }

    fn ensure_appendable(&self) -> anyhow::Result<()> {
        let state = self.shared.state.read();
        if state.sealed.is_some() || state.expected.is_some() {
            return Err(Error::Finalized.into());
        }
        Ok(())
    }

    fn push_entry(&self, entry: EntryDescriptor) -> anyhow::Result<()> {
        let mut state = self.shared.state.write();
        if state.sealed.is_some() {
            return Err(Error::Finalized.into());
        }
        state.entries.push(entry);
        Ok(())
    }

    fn emit(&self, len: u64) {
        self.shared
            .subscribers
            .lock()
            .retain(|tx| tx.send(len).is_ok());
    }

    /// The sealed manifest, fetched from peers on first use when the archive
    /// was opened by address. `None` while building.
    async fn manifest(&self) -> anyhow::Result<Option<Arc<Manifest>>> {
        let expected = {
            let state = self.shared.state.read();
            if let Some(sealed) = &state.sealed {
                return Ok(Some(sealed.manifest.clone()));
            }
            match state.expected {
                Some(expected) => expected,
                None => return Ok(None),
            }
        };
        let manifest = self.fetch_manifest(&expected).await?;
        self.shared.state.write().sealed = Some(Sealed {
            address: expected,
            manifest: manifest.clone(),
        });
        self.shared.store.remember(manifest.clone()).await?;
        Ok(Some(manifest))
    }

    async fn fetch_manifest(&self, address: &ArchiveAddress) -> anyhow::Result<Arc<Manifest>> {
        let peers = self.shared.peers.snapshot();
        if peers.is_empty() {
            return Err(Error::NotFound(*address).into());
        }
        let mut last_error = None;
        for peer in peers {
            match peer.manifest().await {
                Ok(manifest) => match manifest.verify(address) {
                    Ok(()) => return Ok(Arc::new(manifest)),
                    Err(e) => {
                        warn!("peer sent an invalid manifest for {address}: {e}");
                        last_error = Some(e.into());
                    }
                },
                Err(e) => {
                    debug!("peer failed to provide manifest for {address}: {e:#}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("no manifest for {address}")))
    }

    /// Pulls entry `index` from `peer` into `tmp`, verifying size and digest.
    async fn fetch_entry(
        &self,
        peer: &dyn Replica,
        index: usize,
        entry: &EntryDescriptor,
        tmp: &Path,
    ) -> anyhow::Result<()> {
        let mut file = tokio::fs::File::create(tmp)
            .await
            .with_context(|| format!("creating {}", tmp.display()))?;
        let mut hasher = Hasher::default();
        let mut offset = 0u64;
        loop {
            let chunk = peer.read_chunk(index, offset, self.chunk_size()).await?;
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len() as u64;
            if offset + len > entry.size {
                bail!("peer sent more than {} bytes for {}", entry.size, entry.path);
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            offset += len;
            self.emit(len);
        }
        file.flush().await?;
        file.sync_all().await?;
        if offset != entry.size {
            bail!(
                "entry {} ended after {offset} of {} bytes",
                entry.path,
                entry.size
            );
        }
        let digest = ContentDigest::new(hasher.finalize());
        if digest != entry.digest {
            return Err(Error::Integrity {
                what: entry.path.clone(),
                expected: entry.digest.to_string(),
                actual: digest.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Runs `write` against a temporary sibling of `dest` and renames it into
    /// place on success.
    async fn write_through<T, F, Fut>(
        &self,
        dest: &Path,
        extension: &str,
        write: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp = temporary_path(dest, extension);
        self.shared.state.write().partial.insert(tmp.clone());
        let result = match write(tmp.clone()).await {
            Ok(value) => tokio::fs::rename(&tmp, dest)
                .await
                .with_context(|| format!("renaming into {}", dest.display()))
                .map(|()| value),
            Err(e) => Err(e),
        };
        if result.is_err() {
            remove_if_exists(&tmp).await;
        }
        let mut state = self.shared.state.write();
        state.partial.remove(&tmp);
        if result.is_ok() {
            state.written.push(dest.to_path_buf());
        }
        result
    }
}

#[async_trait]
impl ArchiveHandle for FileArchive {
    fn address(&self) -> Option<ArchiveAddress> {
        let state = self.shared.state.read();
        state.sealed.as_ref().map(|s| s.address).or(state.expected)
    }

    fn is_finalized(&self) -> bool {
        self.shared.state.read().sealed.is_some()
    }

    async fn append(&self, relative_path: &str) -> anyhow::Result<EntryDescriptor> {
        validate_entry_path(relative_path)?;
        self.ensure_appendable()?;
        let path = self.root().join(relative_path);
        let (size, digest) = digest_file(&path, self.chunk_size())
            .await
            .map_err(|e| Error::filesystem(&path, e))?;
        let entry = EntryDescriptor {
            path: relative_path.to_owned(),
            size,
            digest,
        };
        self.push_entry(entry.clone())?;
        Ok(entry)
    }

    async fn write_entry(
        &self,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> anyhow::Result<EntryDescriptor> {
        validate_entry_path(name)?;
        self.ensure_appendable()?;
        let dest = self.root().join(name);
        let chunk_size = self.chunk_size();
        let (size, digest) = self
            .write_through(&dest, PARTIAL_EXTENSION, |tmp| async move {
                let mut file = tokio::fs::File::create(&tmp).await?;
                let mut hasher = Hasher::default();
                let mut buf = vec![0; chunk_size];
                let mut size = 0u64;
                loop {
                    let n = reader.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                    file.write_all(&buf[..n]).await?;
                    size += n as u64;
                }
                file.flush().await?;
                Ok((size, ContentDigest::new(hasher.finalize())))
            })
            .await?;
        let entry = EntryDescriptor {
            path: name.to_owned(),
            size,
            digest,
        };
        self.push_entry(entry.clone())?;
        Ok(entry)
    }

    async fn finalize(&self) -> anyhow::Result<ArchiveAddress> {
        let (address, manifest) = {
            let mut state = self.shared.state.write();
            if state.sealed.is_some() || state.expected.is_some() {
                return Err(Error::Finalized.into());
            }
            let manifest = Arc::new(Manifest {
                entries: std::mem::take(&mut state.entries),
            });
            let address = manifest.address();
            state.sealed = Some(Sealed {
                address,
                manifest: manifest.clone(),
            });
            (address, manifest)
        };
        self.shared.store.remember(manifest).await?;
        debug!(%address, "archive finalized");
        Ok(address)
    }

    async fn list(&self) -> anyhow::Result<Vec<EntryDescriptor>> {
        Ok(match self.manifest().await? {
            Some(manifest) => manifest.entries.clone(),
            None => self.shared.state.read().entries.clone(),
        })
    }

    async fn get(&self, index: usize) -> anyhow::Result<EntryDescriptor> {
        let entry = match self.manifest().await? {
            Some(manifest) => manifest.entries.get(index).cloned(),
            None => self.shared.state.read().entries.get(index).cloned(),
        };
        entry.ok_or_else(|| anyhow!("entry {index} is out of range"))
    }

    async fn download(&self, index: usize) -> anyhow::Result<()> {
        let entry = self.get(index).await?;
        let dest = entry.local_path(self.root());
        if let Ok((size, digest)) = digest_file(&dest, self.chunk_size()).await {
            if size == entry.size && digest == entry.digest {
                debug!("{} is already present", entry.path);
                if size > 0 {
                    self.emit(size);
                }
                return Ok(());
            }
        }
        let peers = self.shared.peers.snapshot();
        if peers.is_empty() {
            bail!("no peer to download {} from", entry.path);
        }
        let mut last_error = None;
        for peer in peers {
            let wanted = &entry;
            let result = self
                .write_through(&dest, DOWNLOAD_EXTENSION, |tmp| async move {
                    self.fetch_entry(peer.as_ref(), index, wanted, &tmp).await
                })
                .await;
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("failed to download {} from a peer: {e:#}", entry.path);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("no peer served {}", entry.path)))
    }

    fn subscribe_downloads(&self) -> flume::Receiver<u64> {
        let (tx, rx) = flume::unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    fn replicate(&self) -> ReplicationStream {
        ReplicationStream::new(self.shared.clone(), self.shared.peers.clone())
    }

    async fn discard(&self) -> anyhow::Result<()> {
        let (paths, address) = {
            let mut state = self.shared.state.write();
            let mut paths = std::mem::take(&mut state.written);
            paths.extend(state.partial.drain());
            state.entries.clear();
            let address = match state.borrowed {
                true => None,
                false => state.sealed.take().map(|s| s.address),
            };
            (paths, address)
        };
        for path in paths {
            remove_if_exists(&path).await;
        }
        if let Some(address) = address {
            self.shared.store.forget(&address).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Replica for ArchiveShared {
    async fn manifest(&self) -> anyhow::Result<Manifest> {
        match &self.state.read().sealed {
            Some(sealed) => Ok(sealed.manifest.as_ref().clone()),
            None => bail!("archive is not finalized"),
        }
    }

    async fn read_chunk(&self, index: usize, offset: u64, len: usize) -> anyhow::Result<Vec<u8>> {
        let entry = {
            let state = self.state.read();
            let Some(sealed) = &state.sealed else {
                bail!("archive is not finalized");
            };
            sealed
                .manifest
                .entries
                .get(index)
                .cloned()
                .ok_or_else(|| anyhow!("entry {index} is out of range"))?
        };
        if offset >= entry.size {
            return Ok(vec![]);
        }
        let path = entry.local_path(&self.store.inner.config.root);
        let mut file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("entry {} is not available", entry.path))?;
        file.seek(SeekFrom::Start(offset)).await?;
        let want = (entry.size - offset).min(len as u64);
        let mut chunk = Vec::with_capacity(want as usize);
        file.take(want).read_to_end(&mut chunk).await?;
        Ok(chunk)
    }
}

async fn digest_file(path: &Path, chunk_size: usize) -> io::Result<(u64, ContentDigest)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Hasher::default();
    let mut buf = vec![0; chunk_size.max(1)];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, ContentDigest::new(hasher.finalize())))
}

fn temporary_path(dest: &Path, extension: &str) -> PathBuf {
    let mut path = dest.to_path_buf();
    match dest.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => path.set_extension(format!("{ext}.{extension}")),
        None => path.set_extension(extension),
    };
    path
}

async fn remove_if_exists(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("failed to remove {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use tempfile::TempDir;

    fn error_of(e: &anyhow::Error) -> Option<&Error> {
        e.downcast_ref::<Error>()
    }

    #[tokio::test]
    async fn append_and_finalize() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let archive = store.create_archive().await.unwrap();
        assert_eq!(archive.address(), None);

        let entry = archive.append("a.txt").await.unwrap();
        assert_eq!(entry.size, 5);
        assert_eq!(entry.digest, ContentDigest::of(b"hello"));

        let address = archive.finalize().await.unwrap();
        assert_eq!(archive.address(), Some(address));
        assert!(archive.is_finalized());
        assert!(matches!(
            error_of(&archive.finalize().await.unwrap_err()),
            Some(Error::Finalized)
        ));
        assert!(matches!(
            error_of(&archive.append("a.txt").await.unwrap_err()),
            Some(Error::Finalized)
        ));
        assert_eq!(archive.get(0).await.unwrap(), entry);
        assert!(archive.get(1).await.is_err());
    }

    #[tokio::test]
    async fn appending_a_missing_file_is_a_filesystem_error() {
        let dir = TempDir::new().unwrap();
        let archive = FileStore::new(dir.path())
            .unwrap()
            .create_archive()
            .await
            .unwrap();
        let err = archive.append("nope").await.unwrap_err();
        assert!(matches!(error_of(&err), Some(Error::Filesystem { .. })));
        assert!(matches!(
            error_of(&archive.append("../escape").await.unwrap_err()),
            Some(Error::InvalidEntryPath(_))
        ));
    }

    #[tokio::test]
    async fn discard_removes_written_entries() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let archive = store.create_archive().await.unwrap();
        let mut reader: &[u8] = b"streamed";
        archive
            .write_entry("nested/blob.bin", &mut reader)
            .await
            .unwrap();
        let dest = dir.path().join("nested/blob.bin");
        assert_eq!(std::fs::read(&dest).unwrap(), b"streamed");
        assert!(!dir.path().join("nested/blob.bin.partial").exists());

        let address = archive.finalize().await.unwrap();
        assert!(store.local_manifest(&address).await.unwrap().is_some());
        archive.discard().await.unwrap();
        assert!(!dest.exists());
        assert!(store.local_manifest(&address).await.unwrap().is_none());
        assert!(archive.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn manifests_persist_across_stores() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"persisted").unwrap();
        let config = StoreConfig {
            root: dir.path().to_path_buf(),
            manifest_dir: Some(dir.path().join(".manifests")),
            ..Default::default()
        };
        let address = {
            let archive = FileStore::with_config(config.clone())
                .unwrap()
                .create_archive()
                .await
                .unwrap();
            archive.append("a.txt").await.unwrap();
            archive.finalize().await.unwrap()
        };

        let reopened = FileStore::with_config(config)
            .unwrap()
            .open_archive(&address)
            .await
            .unwrap();
        assert!(reopened.is_finalized());
        assert_eq!(reopened.list().await.unwrap()[0].path, "a.txt");
        // nothing to fetch, the file is already in place
        reopened.download(0).await.unwrap();
    }

    #[tokio::test]
    async fn opening_an_unknown_address_needs_a_peer() {
        let dir = TempDir::new().unwrap();
        let address = Manifest::default().address();
        let archive = FileStore::new(dir.path())
            .unwrap()
            .open_archive(&address)
            .await
            .unwrap();
        assert_eq!(archive.address(), Some(address));
        assert!(!archive.is_finalized());
        assert!(matches!(
            error_of(&archive.list().await.unwrap_err()),
            Some(Error::NotFound(a)) if *a == address
        ));
        assert!(matches!(
            error_of(&archive.append("x").await.unwrap_err()),
            Some(Error::Finalized)
        ));
    }

    #[tokio::test]
    async fn replicas_serve_chunks() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("data"), (0..=255).collect::<Vec<u8>>()).unwrap();
        let store = FileStore::with_config(StoreConfig {
            root: dir.path().to_path_buf(),
            chunk_size: 100,
            ..Default::default()
        })
        .unwrap();
        let archive = store.create_archive().await.unwrap();
        archive.append("data").await.unwrap();
        assert!(archive.shared.manifest().await.is_err());
        let address = archive.finalize().await.unwrap();

        let manifest = archive.shared.manifest().await.unwrap();
        assert_eq!(manifest.address(), address);
        let chunk = archive.shared.read_chunk(0, 200, 100).await.unwrap();
        assert_eq!(chunk, (200..=255).collect::<Vec<u8>>());
        assert!(archive.shared.read_chunk(0, 256, 100).await.unwrap().is_empty());
        assert!(archive.shared.read_chunk(1, 0, 100).await.is_err());
    }

    #[tokio::test]
    async fn discard_keeps_manifests_it_did_not_create() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"seeded").unwrap();
        let store = FileStore::with_config(StoreConfig {
            root: dir.path().to_path_buf(),
            manifest_dir: Some(".manifests".into()),
            ..Default::default()
        })
        .unwrap();
        let archive = store.create_archive().await.unwrap();
        archive.append("a.txt").await.unwrap();
        let address = archive.finalize().await.unwrap();
        let manifest_file = dir.path().join(format!(".manifests/{address}.json"));
        assert!(manifest_file.exists());

        let reopened = store.open_archive(&address).await.unwrap();
        reopened.download(0).await.unwrap();
        reopened.discard().await.unwrap();
        assert!(manifest_file.exists());
        assert!(store.local_manifest(&address).await.unwrap().is_some());
        assert!(reopened.is_finalized());
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"seeded");
    }

    struct Counting {
        manifest: Manifest,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Replica for Counting {
        async fn manifest(&self) -> anyhow::Result<Manifest> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(self.manifest.clone())
        }

        async fn read_chunk(&self, _: usize, _: u64, _: usize) -> anyhow::Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn entries_are_fetched_once() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest {
            entries: (0..100u64)
                .map(|i| EntryDescriptor {
                    path: format!("f{i}"),
                    size: i,
                    digest: ContentDigest::of(&[]),
                })
                .collect(),
        };
        let address = manifest.address();
        let remote = Arc::new(Counting {
            manifest,
            calls: AtomicUsize::new(0),
        });
        let archive = FileStore::new(dir.path())
            .unwrap()
            .open_archive(&address)
            .await
            .unwrap();
        let replica: Arc<dyn Replica> = remote.clone();
        archive.peers().connect(&replica);

        for i in 0..100 {
            assert_eq!(archive.get(i).await.unwrap().size, i as u64);
        }
        assert!(archive.get(100).await.is_err());
        assert_eq!(archive.list().await.unwrap().len(), 100);
        assert_eq!(remote.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn piped_archives_do_not_keep_each_other_alive() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let a = store.create_archive().await.unwrap();
        let b = store.create_archive().await.unwrap();
        a.replicate().pipe(b.replicate());
        assert_eq!(a.peers().len(), 1);
        assert_eq!(b.peers().len(), 1);

        let (weak_a, weak_b) = (Arc::downgrade(&a.shared), Arc::downgrade(&b.shared));
        drop(a);
        drop(b);
        assert!(weak_a.upgrade().is_none());
        assert!(weak_b.upgrade().is_none());
    }

    #[test]
    fn transfers_and_manifests_are_reserved() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::with_config(StoreConfig {
            root: dir.path().to_path_buf(),
            manifest_dir: Some(".manifests".into()),
            ..Default::default()
        })
        .unwrap();
        let root = dir.path();
        assert!(store.is_reserved(&root.join(".manifests/abc.json")));
        assert!(store.is_reserved(&root.join("a/b.txt.download")));
        assert!(store.is_reserved(&root.join("blob.partial")));
        assert!(!store.is_reserved(&root.join("a/b.txt")));
        assert!(!store.is_reserved(&root.join("manifests.json")));
        assert!(!FileStore::new(root).unwrap().is_reserved(&root.join(".manifests/abc.json")));
    }

    #[test]
    fn temporary_paths_keep_the_extension() {
        assert_eq!(
            temporary_path(Path::new("/a/b.txt"), DOWNLOAD_EXTENSION),
            PathBuf::from("/a/b.txt.download")
        );
        assert_eq!(
            temporary_path(Path::new("/a/b"), PARTIAL_EXTENSION),
            PathBuf::from("/a/b.partial")
        );
    }
}
