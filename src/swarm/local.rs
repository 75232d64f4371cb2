// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{fmt, sync::Arc};

use ahash::HashMap;
use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{ReplicationProvider, Swarm};
use crate::address::ArchiveAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// In-process discovery hub. Every [`LocalPeer`] created from the same hub
/// sees the others; joining an address connects the new member to each
/// member already on it.
#[derive(Clone, Default)]
pub struct LocalSwarm {
    hub: Arc<Mutex<Hub>>,
}

#[derive(Default)]
struct Hub {
    next_peer: u64,
    topics: HashMap<ArchiveAddress, Vec<Member>>,
}

struct Member {
    peer: PeerId,
    provider: ReplicationProvider,
}

impl LocalSwarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer(&self) -> LocalPeer {
        let mut hub = self.hub.lock();
        let id = PeerId(hub.next_peer);
        hub.next_peer += 1;
        LocalPeer {
            id,
            swarm: self.clone(),
        }
    }

    /// Peers currently joined on `address`.
    pub fn members(&self, address: &ArchiveAddress) -> Vec<PeerId> {
        self.hub
            .lock()
            .topics
            .get(address)
            .map(|members| members.iter().map(|m| m.peer).collect())
            .unwrap_or_default()
    }
}

/// One participant of a [`LocalSwarm`].
#[derive(Clone)]
pub struct LocalPeer {
    id: PeerId,
    swarm: LocalSwarm,
}

impl LocalPeer {
    pub fn id(&self) -> PeerId {
        self.id
    }
}

#[async_trait]
impl Swarm for LocalPeer {
    async fn join(
        &self,
        address: &ArchiveAddress,
        provider: ReplicationProvider,
    ) -> anyhow::Result<()> {
        let mut hub = self.swarm.hub.lock();
        let members = hub.topics.entry(*address).or_default();
        members.retain(|m| m.peer != self.id);
        for member in members.iter() {
            debug!(%address, "connecting {} with {}", self.id, member.peer);
            provider().pipe((member.provider)());
        }
        members.push(Member {
            peer: self.id,
            provider,
        });
        Ok(())
    }

    async fn leave(&self, address: &ArchiveAddress) -> anyhow::Result<()> {
        let mut hub = self.swarm.hub.lock();
        let Some(members) = hub.topics.get_mut(address) else {
            bail!("{} has not joined {address}", self.id);
        };
        let Some(position) = members.iter().position(|m| m.peer == self.id) else {
            bail!("{} has not joined {address}", self.id);
        };
        let leaving = members.remove(position);
        for member in members.iter() {
            debug!(%address, "disconnecting {} from {}", self.id, member.peer);
            (leaving.provider)().unpipe((member.provider)());
        }
        if members.is_empty() {
            hub.topics.remove(address);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Manifest, PeerSet, Replica, ReplicationStream};

    struct Stub;

    #[async_trait]
    impl Replica for Stub {
        async fn manifest(&self) -> anyhow::Result<Manifest> {
            Ok(Manifest::default())
        }

        async fn read_chunk(&self, _: usize, _: u64, _: usize) -> anyhow::Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    fn provider(peers: &PeerSet) -> ReplicationProvider {
        let peers = peers.clone();
        let local: Arc<dyn Replica> = Arc::new(Stub);
        Arc::new(move || ReplicationStream::new(local.clone(), peers.clone()))
    }

    #[tokio::test]
    async fn joining_connects_existing_members() {
        let swarm = LocalSwarm::new();
        let (a, b, c) = (swarm.peer(), swarm.peer(), swarm.peer());
        let (pa, pb, pc) = (PeerSet::default(), PeerSet::default(), PeerSet::default());
        let address = Manifest::default().address();

        a.join(&address, provider(&pa)).await.unwrap();
        assert!(pa.is_empty());
        b.join(&address, provider(&pb)).await.unwrap();
        c.join(&address, provider(&pc)).await.unwrap();

        assert_eq!(pa.len(), 2);
        assert_eq!(pb.len(), 2);
        assert_eq!(pc.len(), 2);
        assert_eq!(swarm.members(&address), vec![a.id(), b.id(), c.id()]);
    }

    #[tokio::test]
    async fn leaving_disconnects_the_remaining_members() {
        let swarm = LocalSwarm::new();
        let (a, b, c) = (swarm.peer(), swarm.peer(), swarm.peer());
        let (pa, pb, pc) = (PeerSet::default(), PeerSet::default(), PeerSet::default());
        let address = Manifest::default().address();
        a.join(&address, provider(&pa)).await.unwrap();
        b.join(&address, provider(&pb)).await.unwrap();
        c.join(&address, provider(&pc)).await.unwrap();

        b.leave(&address).await.unwrap();
        assert!(pb.is_empty());
        assert_eq!(pa.len(), 1);
        assert_eq!(pc.len(), 1);
        assert_eq!(swarm.members(&address), vec![a.id(), c.id()]);
    }

    #[tokio::test]
    async fn leave_requires_membership() {
        let swarm = LocalSwarm::new();
        let peer = swarm.peer();
        let address = Manifest::default().address();
        assert!(peer.leave(&address).await.is_err());
        peer.join(&address, provider(&PeerSet::default()))
            .await
            .unwrap();
        peer.leave(&address).await.unwrap();
        assert!(swarm.members(&address).is_empty());
        assert!(peer.leave(&address).await.is_err());
    }
}
