// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Swarm membership and replication of archives.

mod distributor;
mod local;
mod progress;

use std::sync::Arc;

use async_trait::async_trait;

use crate::address::ArchiveAddress;
use crate::store::ReplicationStream;

pub use distributor::{
    DEFAULT_DOWNLOAD_CONCURRENCY, Distributor, DownloadConfig, DownloadReport, DownloadStatus,
    Membership, MissingEntry,
};
pub use local::{LocalPeer, LocalSwarm, PeerId};
pub use progress::{DownloadProgress, ProgressEvent, progress_ratio};

/// Invoked by the swarm once per connected peer to obtain the local side of
/// the replication session.
pub type ReplicationProvider = Arc<dyn Fn() -> ReplicationStream + Send + Sync>;

/// Peer discovery and transport.
#[async_trait]
pub trait Swarm: Send + Sync {
    /// Announces interest in `address`. Every peer already joined on it gets
    /// connected through `provider`.
    async fn join(&self, address: &ArchiveAddress, provider: ReplicationProvider)
    -> anyhow::Result<()>;

    async fn leave(&self, address: &ArchiveAddress) -> anyhow::Result<()>;
}

