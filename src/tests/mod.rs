// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT


use std::sync::{Arc, Weak};

use ahash::HashMap;
use asynchronous_codec::{Decoder as _, Encoder as _};
use bytes::BytesMut;
use cid::Cid;
use libp2p::PeerId;
use parking_lot::Mutex;

use crate::{
    Bitswap, BitswapCodec, BitswapConfig, BitswapMessage, ProtocolVersion, network::Network,
    store::MemoryBlockstore, test_utils,
};

/// In-process switchboard that frames every message with the version both
/// ends negotiate.
#[derive(Default)]
pub struct Hub {
    nodes: Mutex<HashMap<PeerId, (Weak<Bitswap>, Vec<ProtocolVersion>)>>,
}

pub struct HubNetwork {
    local: PeerId,
    versions: Vec<ProtocolVersion>,
    max_message_size: usize,
    hub: Arc<Hub>,
}

pub struct TestNode {
    pub bitswap: Arc<Bitswap>,
    pub store: Arc<MemoryBlockstore>,
}

impl TestNode {
    pub fn id(&self) -> PeerId {
        *self.bitswap.local_peer()
    }
}

impl Hub {
    pub fn node(self: &Arc<Self>, versions: &[ProtocolVersion]) -> TestNode {
        let local = test_utils::peer();
        let config = BitswapConfig::default();
        let network = Arc::new(HubNetwork {
            local,
            versions: versions.to_vec(),
            max_message_size: config.max_message_size,
            hub: Arc::clone(self),
        });
        let store = Arc::new(MemoryBlockstore::new());
        let bitswap = Arc::new(
            Bitswap::new(local, network, store.clone(), config).expect("valid config"),
        );
        self.nodes
            .lock()
            .insert(local, (Arc::downgrade(&bitswap), versions.to_vec()));
        TestNode { bitswap, store }
    }

    fn lookup(&self, peer: &PeerId) -> Option<(Arc<Bitswap>, Vec<ProtocolVersion>)> {
        let nodes = self.nodes.lock();
        let (node, versions) = nodes.get(peer)?;
        Some((node.upgrade()?, versions.clone()))
    }
}

/// Connects both nodes to each other.
pub fn connect(a: &TestNode, b: &TestNode) {
    a.bitswap.peer_connected(b.id());
    b.bitswap.peer_connected(a.id());
}

#[async_trait::async_trait]
impl Network for HubNetwork {
    async fn connect_to(&self, peer: &PeerId) -> anyhow::Result<()> {
        anyhow::ensure!(self.hub.lookup(peer).is_some(), "unknown peer {peer}");
        Ok(())
    }

    async fn send_message(&self, peer: &PeerId, message: BitswapMessage) -> anyhow::Result<()> {
        let (remote, remote_versions) = self
            .hub
            .lookup(peer)
            .ok_or_else(|| anyhow::anyhow!("unknown peer {peer}"))?;
        let version = ProtocolVersion::negotiate(&self.versions, &remote_versions)
            .ok_or_else(|| anyhow::anyhow!("no common protocol with {peer}"))?;
        let mut codec = BitswapCodec::new(version, self.max_message_size);
        let mut frame = BytesMut::new();
        codec.encode(message, &mut frame)?;
        let decoded = codec
            .decode(&mut frame)?
            .ok_or_else(|| anyhow::anyhow!("incomplete frame"))?;
        remote.receive_message(self.local, decoded);
        Ok(())
    }

    async fn find_and_connect(&self, _cid: &Cid) -> anyhow::Result<()> {
        Ok(())
    }

    async fn provide(&self, _cid: &Cid) -> anyhow::Result<()> {
        Ok(())
    }
}
