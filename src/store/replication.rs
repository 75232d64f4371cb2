// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{
    fmt,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::Manifest;

/// What an archive serves to a connected peer.
#[async_trait]
pub trait Replica: Send + Sync {
    async fn manifest(&self) -> anyhow::Result<Manifest>;

    /// Reads at most `len` bytes of entry `index` starting at `offset`. An
    /// empty chunk means end of entry.
    async fn read_chunk(&self, index: usize, offset: u64, len: usize) -> anyhow::Result<Vec<u8>>;
}

/// Remote replicas an archive can pull blocks from.
///
/// Only weak references are kept: a replica stays reachable while its owner
/// (usually the swarm membership of the remote archive) holds it, and two
/// archives piped together never keep each other alive.
#[derive(Clone, Default)]
pub struct PeerSet(Arc<RwLock<Vec<Weak<dyn Replica>>>>);

impl PeerSet {
    pub fn connect(&self, replica: &Arc<dyn Replica>) {
        let mut peers = self.0.write();
        peers.retain(|p| p.strong_count() > 0);
        if !peers.iter().any(|p| same_replica(p, replica)) {
            peers.push(Arc::downgrade(replica));
        }
    }

    pub fn disconnect(&self, replica: &Arc<dyn Replica>) {
        self.0
            .write()
            .retain(|p| p.strong_count() > 0 && !same_replica(p, replica));
    }

    /// Replicas that are still alive.
    pub fn snapshot(&self) -> Vec<Arc<dyn Replica>> {
        self.0.read().iter().filter_map(Weak::upgrade).collect()
    }

    pub fn len(&self) -> usize {
        self.0.read().iter().filter(|p| p.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn same_replica(weak: &Weak<dyn Replica>, replica: &Arc<dyn Replica>) -> bool {
    weak.ptr_eq(&Arc::downgrade(replica))
}

impl fmt::Debug for PeerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerSet").field(&self.len()).finish()
    }
}

/// One side of a replication session. The swarm layer obtains one per
/// connected peer and pipes the two sides together; what flows over it is up
/// to the store. The local replica must be owned elsewhere for the other side
/// to keep reaching it.
pub struct ReplicationStream {
    local: Arc<dyn Replica>,
    peers: PeerSet,
}

impl ReplicationStream {
    pub fn new(local: Arc<dyn Replica>, peers: PeerSet) -> Self {
        Self { local, peers }
    }

    /// Connects both sides so each can pull from the other.
    pub fn pipe(self, other: ReplicationStream) {
        self.peers.connect(&other.local);
        other.peers.connect(&self.local);
    }

    /// Undoes [`ReplicationStream::pipe`].
    pub fn unpipe(self, other: ReplicationStream) {
        self.peers.disconnect(&other.local);
        other.peers.disconnect(&self.local);
    }
}

impl fmt::Debug for ReplicationStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationStream")
            .field("peers", &self.peers)
            .finish_non_exhaustive()
    }
}
